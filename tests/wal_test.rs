use std::sync::Arc;

use anyhow::Result;

use karstdb::common::types::{Rid, INVALID_LSN};
use karstdb::storage::page::Tuple;
use karstdb::wal::{LogRecord, LogRecordType};

mod common;
use common::create_test_engine;

#[test]
fn test_appends_survive_flush_and_reread() -> Result<()> {
    let (disk_manager, log_manager, _buffer_pool, _dir) = create_test_engine(10)?;

    let mut begin = LogRecord::new_begin(1);
    let begin_lsn = log_manager.append_log_record(&mut begin)?;
    let mut insert = LogRecord::new_insert(
        1,
        begin_lsn,
        Rid::new(3, 0),
        Tuple::from_slice(b"tuple-bytes"),
    );
    let insert_lsn = log_manager.append_log_record(&mut insert)?;
    let mut commit = LogRecord::new_commit(1, insert_lsn);
    let commit_lsn = log_manager.append_log_record(&mut commit)?;

    log_manager.flush();
    assert_eq!(log_manager.persistent_lsn(), commit_lsn);

    // Read the records back off disk and check identity.
    let mut buf = vec![0u8; 4096];
    assert!(disk_manager.read_log(&mut buf, 0)?);
    let mut pos = 0;
    let mut decoded = Vec::new();
    while let Some(record) = LogRecord::deserialize(&buf[pos..]) {
        pos += record.size as usize;
        decoded.push(record);
    }
    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[0], begin);
    assert_eq!(decoded[1], insert);
    assert_eq!(decoded[2], commit);
    Ok(())
}

#[test]
fn test_lsn_order_matches_append_order_across_threads() -> Result<()> {
    let (disk_manager, log_manager, _buffer_pool, _dir) = create_test_engine(10)?;
    log_manager.run_flush_thread();

    let mut handles = Vec::new();
    for txn_id in 0..4 {
        let log_manager = log_manager.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..50 {
                let mut record = LogRecord::new_begin(txn_id);
                log_manager.append_log_record(&mut record).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    log_manager.flush();
    log_manager.stop_flush_thread();

    // On disk the records appear in strictly increasing LSN order.
    let mut buf = vec![0u8; 64 * 1024];
    assert!(disk_manager.read_log(&mut buf, 0)?);
    let mut pos = 0;
    let mut last_lsn = INVALID_LSN;
    let mut count = 0;
    while let Some(record) = LogRecord::deserialize(&buf[pos..]) {
        assert!(record.lsn > last_lsn, "LSN order broken at {}", record.lsn);
        last_lsn = record.lsn;
        pos += record.size as usize;
        count += 1;
    }
    assert_eq!(count, 200);
    assert_eq!(log_manager.persistent_lsn(), last_lsn);
    Ok(())
}

#[test]
fn test_persistent_lsn_is_monotonic() -> Result<()> {
    let (_disk_manager, log_manager, _buffer_pool, _dir) = create_test_engine(10)?;

    let mut previous = log_manager.persistent_lsn();
    for i in 0..20 {
        let mut record = LogRecord::new_begin(i);
        log_manager.append_log_record(&mut record)?;
        if i % 5 == 0 {
            log_manager.flush();
        }
        let current = log_manager.persistent_lsn();
        assert!(current >= previous);
        previous = current;
    }
    Ok(())
}

#[test]
fn test_dirty_eviction_respects_wal_rule() -> Result<()> {
    let (_disk_manager, log_manager, buffer_pool, _dir) = create_test_engine(4)?;
    log_manager.run_flush_thread();

    // Dirty a page stamped with an unflushed LSN.
    let (page, page_id) = buffer_pool.new_page()?;
    let mut record = LogRecord::new_begin(1);
    let lsn = log_manager.append_log_record(&mut record)?;
    page.write().set_lsn(lsn);
    buffer_pool.unpin_page(page_id, true)?;

    // Fill the pool so the dirty page gets evicted.
    for _ in 0..8 {
        let (_, pid) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(pid, false)?;
    }

    // The eviction had to make the record durable first.
    assert!(log_manager.persistent_lsn() >= lsn);
    log_manager.stop_flush_thread();
    Ok(())
}

#[test]
fn test_commit_record_round_trip_types() -> Result<()> {
    let (_disk_manager, log_manager, _buffer_pool, _dir) = create_test_engine(10)?;

    let rid = Rid::new(7, 4);
    let mut records = vec![
        LogRecord::new_begin(9),
        LogRecord::new_insert(9, 0, rid, Tuple::from_slice(b"v1")),
        LogRecord::new_update(9, 1, rid, Tuple::from_slice(b"v1"), Tuple::from_slice(b"v2")),
        LogRecord::new_mark_delete(9, 2, rid, Tuple::from_slice(b"v2")),
        LogRecord::new_rollback_delete(9, 3, rid, Tuple::from_slice(b"v2")),
        LogRecord::new_apply_delete(9, 4, rid, Tuple::from_slice(b"v2")),
        LogRecord::new_new_page(9, 5, 6, 7),
        LogRecord::new_commit(9, 6),
        LogRecord::new_abort(10, INVALID_LSN),
    ];
    for record in &mut records {
        log_manager.append_log_record(record)?;
    }
    log_manager.flush();

    let types: Vec<LogRecordType> = records.iter().map(|r| r.record_type).collect();
    assert_eq!(
        types,
        vec![
            LogRecordType::Begin,
            LogRecordType::Insert,
            LogRecordType::Update,
            LogRecordType::MarkDelete,
            LogRecordType::RollbackDelete,
            LogRecordType::ApplyDelete,
            LogRecordType::NewPage,
            LogRecordType::Commit,
            LogRecordType::Abort,
        ]
    );
    assert_eq!(log_manager.persistent_lsn(), records.last().unwrap().lsn);
    Ok(())
}
