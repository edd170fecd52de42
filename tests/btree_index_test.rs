use std::sync::Arc;

use anyhow::Result;

use karstdb::common::types::{PageId, Rid, INVALID_PAGE_ID};
use karstdb::concurrency::Transaction;
use karstdb::index::btree::page::tree_page;
use karstdb::index::btree::page::{InternalRef, LeafRef};
use karstdb::index::BPlusTree;
use karstdb::storage::buffer::BufferPoolManager;

mod common;
use common::create_test_buffer_pool;

fn leaf_sizes(buffer_pool: &Arc<BufferPoolManager>, tree: &BPlusTree<i32>) -> Result<Vec<usize>> {
    let mut sizes = Vec::new();
    let mut page_id = leftmost_leaf(buffer_pool, tree.root_page_id())?;
    while page_id != INVALID_PAGE_ID {
        let page = buffer_pool.fetch_page(page_id)?;
        let next = {
            let guard = page.read();
            let leaf = LeafRef::<i32>::new(&guard.data);
            sizes.push(leaf.size());
            leaf.next_page_id()
        };
        buffer_pool.unpin_page(page_id, false)?;
        page_id = next;
    }
    Ok(sizes)
}

fn leftmost_leaf(buffer_pool: &Arc<BufferPoolManager>, mut page_id: PageId) -> Result<PageId> {
    loop {
        let page = buffer_pool.fetch_page(page_id)?;
        let (is_leaf, child) = {
            let guard = page.read();
            if tree_page::is_leaf(&guard.data) {
                (true, INVALID_PAGE_ID)
            } else {
                (false, InternalRef::<i32>::new(&guard.data).value_at(0))
            }
        };
        buffer_pool.unpin_page(page_id, false)?;
        if is_leaf {
            return Ok(page_id);
        }
        page_id = child;
    }
}

/// Check size bounds and key order for every node under `page_id`
fn verify_subtree(
    buffer_pool: &Arc<BufferPoolManager>,
    page_id: PageId,
    is_root: bool,
) -> Result<()> {
    let page = buffer_pool.fetch_page(page_id)?;
    let children = {
        let guard = page.read();
        let data = &guard.data;
        let size = tree_page::size(data);
        if !is_root {
            assert!(
                size >= tree_page::min_size(data),
                "page {} below occupancy floor",
                page_id
            );
        }
        assert!(size <= tree_page::max_size(data), "page {} overflows", page_id);

        if tree_page::is_leaf(data) {
            let leaf = LeafRef::<i32>::new(data);
            for i in 1..leaf.size() {
                assert!(leaf.key_at(i - 1) < leaf.key_at(i), "leaf keys out of order");
            }
            Vec::new()
        } else {
            let internal = InternalRef::<i32>::new(data);
            for i in 2..internal.size() {
                assert!(
                    internal.key_at(i - 1) < internal.key_at(i),
                    "separators out of order"
                );
            }
            (0..internal.size()).map(|i| internal.value_at(i)).collect()
        }
    };
    buffer_pool.unpin_page(page_id, false)?;

    for child in children {
        verify_subtree(buffer_pool, child, false)?;
    }
    Ok(())
}

#[test]
fn test_insert_and_point_lookup() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i32>::new("lookup_idx", buffer_pool)?;
    let mut txn = Transaction::new(0);

    assert!(tree.is_empty());
    for key in [5, 3, 8, 2, 7] {
        assert!(tree.insert(key, Rid::new(0, key as u32), &mut txn)?);
    }
    assert!(!tree.is_empty());

    for key in [5, 3, 8, 2, 7] {
        assert_eq!(
            tree.get_value(&key, &mut txn)?,
            Some(Rid::new(0, key as u32))
        );
    }
    assert_eq!(tree.get_value(&100, &mut txn)?, None);
    Ok(())
}

#[test]
fn test_duplicate_insert_is_rejected() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i32>::new("dup_idx", buffer_pool)?;
    let mut txn = Transaction::new(0);

    assert!(tree.insert(1, Rid::new(0, 1), &mut txn)?);
    assert!(!tree.insert(1, Rid::new(0, 99), &mut txn)?);
    // The original value is untouched.
    assert_eq!(tree.get_value(&1, &mut txn)?, Some(Rid::new(0, 1)));
    Ok(())
}

#[test]
fn test_split_produces_expected_leaves() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i32>::with_max_sizes("split_idx", buffer_pool.clone(), 4, 5)?;
    let mut txn = Transaction::new(0);

    for key in 1..=10 {
        assert!(tree.insert(key, Rid::new(0, key as u32), &mut txn)?);
    }

    assert_eq!(leaf_sizes(&buffer_pool, &tree)?, vec![3, 3, 4]);
    assert_eq!(tree.get_value(&7, &mut txn)?, Some(Rid::new(0, 7)));

    let scanned: Vec<i32> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(scanned, (1..=10).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_iterator_from_key() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i32>::with_max_sizes("range_idx", buffer_pool, 4, 5)?;
    let mut txn = Transaction::new(0);

    for key in (1..=20).step_by(2) {
        tree.insert(key, Rid::new(0, key as u32), &mut txn)?;
    }

    // 8 is absent; the scan starts at the next key up.
    let from_eight: Vec<i32> = tree.iter_from(&8)?.map(|(key, _)| key).collect();
    assert_eq!(from_eight, vec![9, 11, 13, 15, 17, 19]);

    let from_past_end: Vec<i32> = tree.iter_from(&100)?.map(|(key, _)| key).collect();
    assert!(from_past_end.is_empty());
    Ok(())
}

#[test]
fn test_delete_coalesces_to_root_replacement() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i32>::with_max_sizes("coalesce_idx", buffer_pool.clone(), 4, 5)?;
    let mut txn = Transaction::new(0);

    for key in 1..=5 {
        tree.insert(key, Rid::new(0, key as u32), &mut txn)?;
    }
    // The root split on the fifth insert.
    {
        let root = buffer_pool.fetch_page(tree.root_page_id())?;
        assert!(!tree_page::is_leaf(&root.read().data));
        buffer_pool.unpin_page(tree.root_page_id(), false)?;
    }

    tree.remove(&5, &mut txn)?;
    tree.remove(&4, &mut txn)?;

    // The internal root collapsed into its sole leaf child.
    {
        let root = buffer_pool.fetch_page(tree.root_page_id())?;
        assert!(tree_page::is_leaf(&root.read().data));
        buffer_pool.unpin_page(tree.root_page_id(), false)?;
    }
    for key in 1..=3 {
        assert_eq!(
            tree.get_value(&key, &mut txn)?,
            Some(Rid::new(0, key as u32))
        );
    }
    assert_eq!(tree.get_value(&4, &mut txn)?, None);
    Ok(())
}

#[test]
fn test_delete_to_empty_tree() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i32>::with_max_sizes("empty_idx", buffer_pool, 4, 5)?;
    let mut txn = Transaction::new(0);

    for key in 1..=8 {
        tree.insert(key, Rid::new(0, key as u32), &mut txn)?;
    }
    for key in 1..=8 {
        tree.remove(&key, &mut txn)?;
    }

    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&1, &mut txn)?, None);
    assert_eq!(tree.iter()?.count(), 0);

    // The tree grows again after being emptied.
    assert!(tree.insert(42, Rid::new(0, 42), &mut txn)?);
    assert_eq!(tree.get_value(&42, &mut txn)?, Some(Rid::new(0, 42)));
    Ok(())
}

#[test]
fn test_mixed_workload_keeps_invariants() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(100)?;
    let tree = BPlusTree::<i32>::with_max_sizes("mixed_idx", buffer_pool.clone(), 4, 5)?;
    let mut txn = Transaction::new(0);

    // Deterministic shuffle: stride through the key space.
    let keys: Vec<i32> = (0..200).map(|i| (i * 37) % 200).collect();
    for &key in &keys {
        tree.insert(key, Rid::new(1, key as u32), &mut txn)?;
    }
    verify_subtree(&buffer_pool, tree.root_page_id(), true)?;

    for key in (0..200).filter(|k| k % 3 == 0) {
        tree.remove(&key, &mut txn)?;
    }
    verify_subtree(&buffer_pool, tree.root_page_id(), true)?;

    for key in 0..200 {
        let found = tree.get_value(&key, &mut txn)?;
        if key % 3 == 0 {
            assert_eq!(found, None, "key {} should be gone", key);
        } else {
            assert_eq!(found, Some(Rid::new(1, key as u32)), "key {} lost", key);
        }
    }

    let scanned: Vec<i32> = tree.iter()?.map(|(key, _)| key).collect();
    let expected: Vec<i32> = (0..200).filter(|k| k % 3 != 0).collect();
    assert_eq!(scanned, expected);
    Ok(())
}

#[test]
fn test_concurrent_inserts_from_many_threads() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(200)?;
    let tree = Arc::new(BPlusTree::<i32>::with_max_sizes(
        "concurrent_idx",
        buffer_pool,
        4,
        5,
    )?);

    let mut handles = Vec::new();
    for worker in 0..4 {
        let tree = tree.clone();
        handles.push(std::thread::spawn(move || {
            let mut txn = Transaction::new(worker);
            for key in (worker..400).step_by(4) {
                tree.insert(key, Rid::new(2, key as u32), &mut txn).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut txn = Transaction::new(99);
    for key in 0..400 {
        assert_eq!(
            tree.get_value(&key, &mut txn)?,
            Some(Rid::new(2, key as u32)),
            "key {} missing after concurrent insert",
            key
        );
    }
    let scanned: Vec<i32> = tree.iter()?.map(|(key, _)| key).collect();
    assert_eq!(scanned, (0..400).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_root_persists_in_header_page() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(50)?;
    let root_before = {
        let tree = BPlusTree::<i32>::new("persist_idx", buffer_pool.clone())?;
        let mut txn = Transaction::new(0);
        tree.insert(1, Rid::new(0, 1), &mut txn)?;
        tree.root_page_id()
    };

    // A second handle over the same pool sees the registered root.
    let reopened = BPlusTree::<i32>::new("persist_idx", buffer_pool)?;
    assert_eq!(reopened.root_page_id(), root_before);
    let mut txn = Transaction::new(1);
    assert_eq!(reopened.get_value(&1, &mut txn)?, Some(Rid::new(0, 1)));
    Ok(())
}
