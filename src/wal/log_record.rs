use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN};
use crate::storage::page::Tuple;

/// Types of log records in the WAL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogRecordType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Insert = 4,
    ApplyDelete = 5,
    MarkDelete = 6,
    RollbackDelete = 7,
    Update = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Commit),
            3 => Some(Self::Abort),
            4 => Some(Self::Insert),
            5 => Some(Self::ApplyDelete),
            6 => Some(Self::MarkDelete),
            7 => Some(Self::RollbackDelete),
            8 => Some(Self::Update),
            9 => Some(Self::NewPage),
            _ => None,
        }
    }
}

/// Type-specific payload of a log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// Begin / Commit / Abort carry no payload
    None,
    Insert {
        rid: Rid,
        tuple: Tuple,
    },
    /// Shared by the three delete flavors; the record type tells them apart
    Delete {
        rid: Rid,
        tuple: Tuple,
    },
    Update {
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    },
    NewPage {
        prev_page_id: PageId,
        page_id: PageId,
    },
}

/// A write-ahead log record.
///
/// Wire layout: a 20-byte header `size(4) lsn(4) txn_id(4) prev_lsn(4)
/// type(4)` followed by the payload. RIDs are 8 bytes; tuples carry a
/// 4-byte length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub size: i32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    pub const HEADER_SIZE: usize = 20;

    fn new(txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType, payload: LogPayload) -> Self {
        let size = (Self::HEADER_SIZE + payload_len(&payload)) as i32;
        Self {
            size,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordType::Begin, LogPayload::None)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Commit, LogPayload::None)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Abort, LogPayload::None)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Insert,
            LogPayload::Insert { rid, tuple },
        )
    }

    pub fn new_mark_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::MarkDelete,
            LogPayload::Delete { rid, tuple },
        )
    }

    pub fn new_rollback_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::RollbackDelete,
            LogPayload::Delete { rid, tuple },
        )
    }

    pub fn new_apply_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::ApplyDelete,
            LogPayload::Delete { rid, tuple },
        )
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    pub fn new_new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId, page_id: PageId) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::NewPage,
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        )
    }

    /// Append the record's wire form to `buf`
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.resize(start + self.size as usize, 0);
        let out = &mut buf[start..];

        LittleEndian::write_i32(&mut out[0..4], self.size);
        LittleEndian::write_i32(&mut out[4..8], self.lsn);
        LittleEndian::write_i32(&mut out[8..12], self.txn_id);
        LittleEndian::write_i32(&mut out[12..16], self.prev_lsn);
        LittleEndian::write_i32(&mut out[16..20], self.record_type as i32);

        let payload = &mut out[Self::HEADER_SIZE..];
        match &self.payload {
            LogPayload::None => {}
            LogPayload::Insert { rid, tuple } | LogPayload::Delete { rid, tuple } => {
                rid.write_to(&mut payload[0..Rid::ENCODED_LEN]);
                tuple.write_to(&mut payload[Rid::ENCODED_LEN..]);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                rid.write_to(&mut payload[0..Rid::ENCODED_LEN]);
                let mut pos = Rid::ENCODED_LEN;
                old_tuple.write_to(&mut payload[pos..]);
                pos += old_tuple.encoded_len();
                new_tuple.write_to(&mut payload[pos..]);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                LittleEndian::write_i32(&mut payload[0..4], *prev_page_id);
                LittleEndian::write_i32(&mut payload[4..8], *page_id);
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size as usize);
        self.serialize_into(&mut buf);
        buf
    }

    /// Decode one record from the front of `data`. Returns None when the
    /// window holds only a partial (or no) record — the "incomplete"
    /// signal that terminates a recovery scan.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let size = LittleEndian::read_i32(&data[0..4]);
        if size < Self::HEADER_SIZE as i32 || size as usize > data.len() {
            return None;
        }

        let lsn = LittleEndian::read_i32(&data[4..8]);
        let txn_id = LittleEndian::read_i32(&data[8..12]);
        let prev_lsn = LittleEndian::read_i32(&data[12..16]);
        let record_type = LogRecordType::from_i32(LittleEndian::read_i32(&data[16..20]))?;

        let payload_bytes = &data[Self::HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => LogPayload::None,
            LogRecordType::Insert => {
                let (rid, tuple) = read_rid_tuple(payload_bytes)?;
                LogPayload::Insert { rid, tuple }
            }
            LogRecordType::ApplyDelete
            | LogRecordType::MarkDelete
            | LogRecordType::RollbackDelete => {
                let (rid, tuple) = read_rid_tuple(payload_bytes)?;
                LogPayload::Delete { rid, tuple }
            }
            LogRecordType::Update => {
                if payload_bytes.len() < Rid::ENCODED_LEN {
                    return None;
                }
                let rid = Rid::read_from(payload_bytes);
                let old_tuple = Tuple::read_from(&payload_bytes[Rid::ENCODED_LEN..])?;
                let new_tuple =
                    Tuple::read_from(&payload_bytes[Rid::ENCODED_LEN + old_tuple.encoded_len()..])?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if payload_bytes.len() < 8 {
                    return None;
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_i32(&payload_bytes[0..4]),
                    page_id: LittleEndian::read_i32(&payload_bytes[4..8]),
                }
            }
        };

        Some(Self {
            size,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        })
    }
}

fn payload_len(payload: &LogPayload) -> usize {
    match payload {
        LogPayload::None => 0,
        LogPayload::Insert { tuple, .. } | LogPayload::Delete { tuple, .. } => {
            Rid::ENCODED_LEN + tuple.encoded_len()
        }
        LogPayload::Update {
            old_tuple,
            new_tuple,
            ..
        } => Rid::ENCODED_LEN + old_tuple.encoded_len() + new_tuple.encoded_len(),
        LogPayload::NewPage { .. } => 8,
    }
}

fn read_rid_tuple(payload: &[u8]) -> Option<(Rid, Tuple)> {
    if payload.len() < Rid::ENCODED_LEN {
        return None;
    }
    let rid = Rid::read_from(payload);
    let tuple = Tuple::read_from(&payload[Rid::ENCODED_LEN..])?;
    Some((rid, tuple))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(mut record: LogRecord) -> LogRecord {
        record.lsn = 17;
        let bytes = record.serialize();
        assert_eq!(bytes.len(), record.size as usize);
        let decoded = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
        decoded
    }

    #[test]
    fn test_begin_round_trip() {
        let decoded = round_trip(LogRecord::new_begin(3));
        assert_eq!(decoded.record_type, LogRecordType::Begin);
        assert_eq!(decoded.txn_id, 3);
        assert_eq!(decoded.prev_lsn, INVALID_LSN);
        assert_eq!(decoded.size as usize, LogRecord::HEADER_SIZE);
    }

    #[test]
    fn test_insert_round_trip() {
        let rid = Rid::new(4, 2);
        let record = LogRecord::new_insert(1, 5, rid, Tuple::from_slice(b"payload"));
        let decoded = round_trip(record);
        match decoded.payload {
            LogPayload::Insert { rid: r, tuple } => {
                assert_eq!(r, rid);
                assert_eq!(tuple.as_slice(), b"payload");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_update_round_trip() {
        let record = LogRecord::new_update(
            2,
            9,
            Rid::new(1, 1),
            Tuple::from_slice(b"old"),
            Tuple::from_slice(b"newer"),
        );
        round_trip(record);
    }

    #[test]
    fn test_new_page_round_trip() {
        let record = LogRecord::new_new_page(2, 9, 3, 4);
        let decoded = round_trip(record);
        assert_eq!(
            decoded.payload,
            LogPayload::NewPage {
                prev_page_id: 3,
                page_id: 4
            }
        );
    }

    #[test]
    fn test_partial_record_is_incomplete() {
        let mut record = LogRecord::new_insert(1, 5, Rid::new(4, 2), Tuple::from_slice(b"payload"));
        record.lsn = 1;
        let bytes = record.serialize();

        assert!(LogRecord::deserialize(&bytes[..3]).is_none());
        assert!(LogRecord::deserialize(&bytes[..bytes.len() - 1]).is_none());
        assert!(LogRecord::deserialize(&[]).is_none());
    }
}
