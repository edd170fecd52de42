use karstdb::storage::hash::ExtendibleHashTable;

#[test]
fn test_behaves_as_a_map() {
    let table = ExtendibleHashTable::new(4);

    for i in 0..16 {
        table.insert(i, format!("value-{}", i));
    }
    assert_eq!(table.len(), 16);
    for i in 0..16 {
        assert_eq!(table.find(&i), Some(format!("value-{}", i)));
    }

    assert!(table.remove(&7));
    assert_eq!(table.find(&7), None);
    assert!(!table.remove(&7));
    assert_eq!(table.len(), 15);

    table.insert(7, "replaced".to_string());
    assert_eq!(table.find(&7), Some("replaced".to_string()));
}

#[test]
fn test_directory_growth_under_overflow() {
    // Bucket size 2 forces repeated splits and directory doubling.
    let table = ExtendibleHashTable::new(2);
    for i in 0..40 {
        table.insert(i, i * 2);
    }

    assert!(table.global_depth() >= 2, "directory never grew");
    assert!(table.num_buckets() >= 4);
    for i in 0..40 {
        assert_eq!(table.find(&i), Some(i * 2), "key {} lost across splits", i);
    }
}

#[test]
fn test_removal_does_not_shrink_directory() {
    let table = ExtendibleHashTable::new(2);
    for i in 0..40 {
        table.insert(i, i);
    }
    let depth = table.global_depth();
    let buckets = table.num_buckets();

    for i in 0..40 {
        assert!(table.remove(&i));
    }
    assert!(table.is_empty());
    assert_eq!(table.global_depth(), depth);
    assert_eq!(table.num_buckets(), buckets);

    // Still usable after draining.
    table.insert(1, 10);
    assert_eq!(table.find(&1), Some(10));
}

#[test]
fn test_concurrent_inserts_and_finds() {
    use std::sync::Arc;

    let table = Arc::new(ExtendibleHashTable::new(4));
    let mut handles = Vec::new();
    for worker in 0..4u64 {
        let table = table.clone();
        handles.push(std::thread::spawn(move || {
            for i in (worker..1000).step_by(4) {
                table.insert(i, i + 1);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.len(), 1000);
    for i in 0..1000u64 {
        assert_eq!(table.find(&i), Some(i + 1));
    }
}
