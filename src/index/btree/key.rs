use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};

/// Fixed-width key stored in B+tree pages.
///
/// Ordering comes from `Ord` on the decoded value; the encoded form only
/// needs to round-trip, not to sort bytewise.
pub trait IndexKey: Copy + Ord + Debug + Send + Sync + 'static {
    /// Encoded size in bytes; every key of the type occupies exactly this
    /// much space in a page slot.
    const ENCODED_LEN: usize;

    fn encode_into(&self, buf: &mut [u8]);

    fn decode_from(buf: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(&buf[0..4])
    }
}

impl IndexKey for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(&mut buf[0..8], *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(&buf[0..8])
    }
}

impl IndexKey for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(&buf[0..8])
    }
}
