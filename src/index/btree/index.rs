use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{
    LatchedPage, PageId, PagePtr, PageReadGuard, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::concurrency::transaction::Transaction;
use crate::index::btree::error::{BTreeError, Result};
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::internal::{InternalMut, InternalRef};
use crate::index::btree::page::leaf::{LeafMut, LeafRef};
use crate::index::btree::page::tree_page::{self, LEAF_PAGE_HEADER_SIZE, TREE_PAGE_HEADER_SIZE};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::HeaderPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeOp {
    Find,
    Insert,
    Delete,
}

enum Rebalance {
    Redistributed,
    Coalesced,
}

/// B+tree index over fixed-size buffer-pool pages: an ordered map from
/// fixed-width keys to RIDs, unique keys only.
///
/// Concurrency is latch crabbing: descents latch the child before
/// releasing the parent, and writers keep the whole ancestor chain latched
/// while a split or merge might propagate into it. The tree-level mutex
/// guards `root_page_id`; descents re-check it after latching the first
/// page and retry if the root moved.
pub struct BPlusTree<K: IndexKey> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: Mutex<PageId>,
    leaf_max_size: usize,
    internal_max_size: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open the index named `name`, creating its header-page registration
    /// lazily on first insert.
    pub fn new(name: impl Into<String>, buffer_pool: Arc<BufferPoolManager>) -> Result<Self> {
        Self::with_max_sizes(
            name,
            buffer_pool,
            default_leaf_max::<K>(),
            default_internal_max::<K>(),
        )
    }

    /// Open the index with explicit fanout bounds. `leaf_max_size` must be
    /// even and `internal_max_size` odd, so splits land on the occupancy
    /// floor exactly.
    pub fn with_max_sizes(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2 && leaf_max_size % 2 == 0);
        assert!(internal_max_size >= 3 && internal_max_size % 2 == 1);

        let index_name = name.into();
        let root_page_id = {
            let page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
            let root = {
                let mut guard = page.write();
                let mut header = HeaderPage::new(&mut guard);
                header.ensure_init();
                header.get_root_id(&index_name)
            };
            buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
            root.unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: Mutex::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _key: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    /// Current root page (diagnostics and structural tests)
    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup
    pub fn get_value(&self, key: &K, txn: &mut Transaction) -> Result<Option<Rid>> {
        if self.is_empty() {
            return Ok(None);
        }
        let result = self.get_value_inner(key, txn);
        let released = self.release_latches(txn, false);
        let value = result?;
        released?;
        Ok(value)
    }

    fn get_value_inner(&self, key: &K, txn: &mut Transaction) -> Result<Option<Rid>> {
        if !self.find_leaf(Some(key), txn, TreeOp::Find)? {
            return Ok(None);
        }
        let leaf = txn.page_set().last().expect("descent leaves a latched leaf");
        Ok(LeafRef::<K>::new(&leaf.page().data).lookup(key))
    }

    /// Insert a (key, RID) pair. Returns Ok(false) without mutating
    /// anything when the key already exists.
    pub fn insert(&self, key: K, rid: Rid, txn: &mut Transaction) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree()?;
        }
        let result = self.insert_inner(&key, rid, txn);
        let released = self.release_latches(txn, true);
        let inserted = result?;
        released?;
        Ok(inserted)
    }

    fn insert_inner(&self, key: &K, rid: Rid, txn: &mut Transaction) -> Result<bool> {
        // The tree can be emptied between our start_new_tree and the
        // descent; re-create and retry in that case.
        while !self.find_leaf(Some(key), txn, TreeOp::Insert)? {
            self.start_new_tree()?;
        }

        let overflow = {
            let leaf_page = txn
                .page_set_mut()
                .last_mut()
                .expect("descent leaves a latched leaf");
            let mut leaf = LeafMut::<K>::new(&mut leaf_page.page_mut().data);
            if leaf.lookup(key).is_some() {
                return Ok(false);
            }
            leaf.insert(key, rid);
            leaf.size() > leaf.max_size()
        };

        if overflow {
            self.split_and_propagate(txn)?;
        }
        Ok(true)
    }

    /// Remove `key` if present, rebalancing as needed
    pub fn remove(&self, key: &K, txn: &mut Transaction) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let result = self.remove_inner(key, txn);
        let released = self.release_latches(txn, true);
        result?;
        released?;
        Ok(())
    }

    fn remove_inner(&self, key: &K, txn: &mut Transaction) -> Result<()> {
        if !self.find_leaf(Some(key), txn, TreeOp::Delete)? {
            return Ok(());
        }

        let underflow = {
            let leaf_page = txn
                .page_set_mut()
                .last_mut()
                .expect("descent leaves a latched leaf");
            let mut leaf = LeafMut::<K>::new(&mut leaf_page.page_mut().data);
            match leaf.remove(key) {
                None => return Ok(()),
                Some(new_size) => new_size < leaf.min_size(),
            }
        };

        if underflow {
            self.rebalance(txn)?;
        }
        Ok(())
    }

    /// Ordered scan from the smallest key
    pub fn iter(&self) -> Result<TreeIterator<K>> {
        match self.find_leaf_for_scan(None)? {
            None => Ok(TreeIterator::empty(self.buffer_pool.clone())),
            Some((page_id, guard)) => Ok(TreeIterator::new(
                self.buffer_pool.clone(),
                page_id,
                guard,
                0,
            )),
        }
    }

    /// Ordered scan from the first key >= `key`
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>> {
        match self.find_leaf_for_scan(Some(key))? {
            None => Ok(TreeIterator::empty(self.buffer_pool.clone())),
            Some((page_id, guard)) => {
                let pos = LeafRef::<K>::new(&guard.data).key_index(key);
                Ok(TreeIterator::new(self.buffer_pool.clone(), page_id, guard, pos))
            }
        }
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    /// Crab from the root to the leaf for `key` (leftmost leaf when None),
    /// recording latches in the transaction's page set. For writes, every
    /// ancestor that could be touched by a split or merge stays latched;
    /// reaching a safe child releases the chain above it. Returns false if
    /// the tree is empty.
    fn find_leaf(&self, key: Option<&K>, txn: &mut Transaction, op: TreeOp) -> Result<bool> {
        debug_assert!(txn.page_set().is_empty());

        // Latch the first page, retrying while the root moves under us.
        loop {
            let root_pid = *self.root_page_id.lock();
            if root_pid == INVALID_PAGE_ID {
                return Ok(false);
            }
            let page = self.buffer_pool.fetch_page(root_pid)?;
            let latched = match op {
                TreeOp::Find => LatchedPage::shared(&page),
                _ => LatchedPage::exclusive(&page),
            };
            if *self.root_page_id.lock() != root_pid {
                drop(latched);
                self.buffer_pool.unpin_page(root_pid, false)?;
                continue;
            }
            txn.add_to_page_set(latched);
            break;
        }

        loop {
            let child_pid = {
                let current = txn.page_set().last().expect("chain is non-empty");
                let data = &current.page().data;
                if tree_page::is_leaf(data) {
                    return Ok(true);
                }
                let internal = InternalRef::<K>::new(data);
                match key {
                    Some(key) => internal.lookup(key),
                    None => internal.value_at(0),
                }
            };

            let page = match self.buffer_pool.fetch_page(child_pid) {
                Ok(page) => page,
                Err(e) => return Err(e.into()),
            };
            let latched = match op {
                TreeOp::Find => LatchedPage::shared(&page),
                _ => LatchedPage::exclusive(&page),
            };

            let safe = {
                let data = &latched.page().data;
                match op {
                    TreeOp::Find => true,
                    TreeOp::Insert => tree_page::size(data) < tree_page::max_size(data),
                    TreeOp::Delete => tree_page::size(data) > tree_page::min_size(data),
                }
            };
            if safe {
                self.release_page_set(txn, false)?;
            }
            txn.add_to_page_set(latched);
        }
    }

    /// Transient-latch descent for iterators: hold the child's read latch
    /// before releasing the parent, never more than two at once.
    fn find_leaf_for_scan(&self, key: Option<&K>) -> Result<Option<(PageId, PageReadGuard)>> {
        let (mut page_id, mut guard) = loop {
            let root_pid = *self.root_page_id.lock();
            if root_pid == INVALID_PAGE_ID {
                return Ok(None);
            }
            let page = self.buffer_pool.fetch_page(root_pid)?;
            let guard = page.read_arc();
            if *self.root_page_id.lock() != root_pid {
                drop(guard);
                self.buffer_pool.unpin_page(root_pid, false)?;
                continue;
            }
            break (root_pid, guard);
        };

        loop {
            if tree_page::is_leaf(&guard.data) {
                return Ok(Some((page_id, guard)));
            }
            let child_pid = {
                let internal = InternalRef::<K>::new(&guard.data);
                match key {
                    Some(key) => internal.lookup(key),
                    None => internal.value_at(0),
                }
            };

            let child = match self.buffer_pool.fetch_page(child_pid) {
                Ok(page) => page,
                Err(e) => {
                    drop(guard);
                    let _ = self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            };
            let child_guard = child.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            page_id = child_pid;
            guard = child_guard;
        }
    }

    // ------------------------------------------------------------------
    // Insert path
    // ------------------------------------------------------------------

    /// Create the root leaf for an empty tree
    fn start_new_tree(&self) -> Result<()> {
        let mut root = self.root_page_id.lock();
        if *root != INVALID_PAGE_ID {
            return Ok(());
        }

        let (page, page_id) = self.allocate_page()?;
        {
            let mut guard = page.write();
            let mut leaf = LeafMut::<K>::new(&mut guard.data);
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        }
        self.buffer_pool.unpin_page(page_id, true)?;

        *root = page_id;
        self.update_root_page_id(page_id)
    }

    /// Split overflowing nodes up the retained chain. The chain holds
    /// every ancestor that can overflow, so reaching its top means the
    /// root itself split.
    fn split_and_propagate(&self, txn: &mut Transaction) -> Result<()> {
        let mut level = txn.page_set().len() - 1;
        loop {
            let (separator, right_pid) = self.split_node(txn, level)?;
            if level == 0 {
                return self.install_new_root(txn, &separator, right_pid);
            }

            level -= 1;
            let overflow = {
                let left_pid = txn.page_set()[level + 1].page_id();
                let parent = &mut txn.page_set_mut()[level];
                let mut view = InternalMut::<K>::new(&mut parent.page_mut().data);
                view.insert_after(left_pid, &separator, right_pid);
                view.size() > view.max_size()
            };
            if !overflow {
                return Ok(());
            }
        }
    }

    /// Split the node at `level` of the chain, moving its upper half into
    /// a freshly allocated right sibling. Returns the separator to push
    /// into the parent and the new sibling's page ID.
    fn split_node(&self, txn: &mut Transaction, level: usize) -> Result<(K, PageId)> {
        let (right_page, right_pid) = self.allocate_page()?;
        let is_leaf = tree_page::is_leaf(&txn.page_set()[level].page().data);

        if is_leaf {
            let (separator, old_next) = {
                let node = &mut txn.page_set_mut()[level];
                let mut right_guard = right_page.write();
                let mut left = LeafMut::<K>::new(&mut node.page_mut().data);
                let mut right = LeafMut::<K>::new(&mut right_guard.data);

                right.init(right_pid, left.parent_page_id(), left.max_size());
                let size = left.size();
                let split_at = size - size / 2;
                for i in split_at..size {
                    let (key, rid) = left.item(i);
                    right.push_item(&key, rid);
                }
                left.set_size(split_at);

                let old_next = left.next_page_id();
                right.set_next_page_id(old_next);
                right.set_prev_page_id(left.page_id());
                left.set_next_page_id(right_pid);
                (right.key_at(0), old_next)
            };

            if old_next != INVALID_PAGE_ID {
                let next = self.buffer_pool.fetch_page(old_next)?;
                {
                    let mut guard = next.write();
                    LeafMut::<K>::new(&mut guard.data).set_prev_page_id(right_pid);
                }
                self.buffer_pool.unpin_page(old_next, true)?;
            }
            self.buffer_pool.unpin_page(right_pid, true)?;
            Ok((separator, right_pid))
        } else {
            let (separator, moved_children) = {
                let node = &mut txn.page_set_mut()[level];
                let mut right_guard = right_page.write();
                let mut left = InternalMut::<K>::new(&mut node.page_mut().data);
                let mut right = InternalMut::<K>::new(&mut right_guard.data);

                right.init(right_pid, left.parent_page_id(), left.max_size());
                let size = left.size();
                let split_at = size - size / 2;
                for i in split_at..size {
                    let (key, child) = left.entry(i);
                    right.push_entry(&key, child);
                }
                left.set_size(split_at);

                let moved: Vec<PageId> = (0..right.size()).map(|i| right.value_at(i)).collect();
                (right.key_at(0), moved)
            };

            self.reparent(&moved_children, right_pid)?;
            self.buffer_pool.unpin_page(right_pid, true)?;
            Ok((separator, right_pid))
        }
    }

    /// Root split: allocate a new internal root over the old root and its
    /// new sibling. Serialized on the tree mutex.
    fn install_new_root(
        &self,
        txn: &mut Transaction,
        separator: &K,
        right_pid: PageId,
    ) -> Result<()> {
        let mut root = self.root_page_id.lock();
        let (root_page, new_root_pid) = self.allocate_page()?;

        {
            let node = &mut txn.page_set_mut()[0];
            let mut guard = root_page.write();
            let mut view = InternalMut::<K>::new(&mut guard.data);
            view.init(new_root_pid, INVALID_PAGE_ID, self.internal_max_size);
            view.populate_new_root(node.page_id(), separator, right_pid);
            tree_page::set_parent_page_id(&mut node.page_mut().data, new_root_pid);
        }
        self.buffer_pool.unpin_page(new_root_pid, true)?;
        self.reparent(&[right_pid], new_root_pid)?;

        *root = new_root_pid;
        self.update_root_page_id(new_root_pid)
    }

    // ------------------------------------------------------------------
    // Delete path
    // ------------------------------------------------------------------

    /// Fix underflow from the leaf upward. Redistribution stops the walk;
    /// a merge removes an entry from the parent, which may underflow in
    /// turn.
    fn rebalance(&self, txn: &mut Transaction) -> Result<()> {
        let mut level = txn.page_set().len() - 1;
        loop {
            let (size, min_size, parent_pid) = {
                let data = &txn.page_set()[level].page().data;
                (
                    tree_page::size(data),
                    tree_page::min_size(data),
                    tree_page::parent_page_id(data),
                )
            };
            if size >= min_size {
                return Ok(());
            }
            if parent_pid == INVALID_PAGE_ID {
                return self.adjust_root(txn, level);
            }
            debug_assert!(level > 0, "non-root underflow must have its parent latched");

            match self.coalesce_or_redistribute(txn, level)? {
                Rebalance::Redistributed => return Ok(()),
                Rebalance::Coalesced => level -= 1,
            }
        }
    }

    /// The root is exempt from occupancy bounds, but collapses in two
    /// cases: an empty leaf root clears the tree, and a single-child
    /// internal root is replaced by that child.
    fn adjust_root(&self, txn: &mut Transaction, level: usize) -> Result<()> {
        let mut root = self.root_page_id.lock();

        let (node_pid, is_leaf, size, only_child) = {
            let data = &txn.page_set()[level].page().data;
            let only_child = if tree_page::is_leaf(data) {
                INVALID_PAGE_ID
            } else {
                InternalRef::<K>::new(data).value_at(0)
            };
            (
                tree_page::page_id(data),
                tree_page::is_leaf(data),
                tree_page::size(data),
                only_child,
            )
        };

        if is_leaf {
            if size == 0 {
                *root = INVALID_PAGE_ID;
                txn.deleted_page_set_mut().insert(node_pid);
                return self.update_root_page_id(INVALID_PAGE_ID);
            }
        } else if size == 1 {
            self.reparent(&[only_child], INVALID_PAGE_ID)?;
            *root = only_child;
            txn.deleted_page_set_mut().insert(node_pid);
            return self.update_root_page_id(only_child);
        }
        Ok(())
    }

    /// Borrow from a sibling when one has spare entries (left preferred),
    /// otherwise merge the deficient node into a sibling.
    fn coalesce_or_redistribute(&self, txn: &mut Transaction, level: usize) -> Result<Rebalance> {
        let node_pid = txn.page_set()[level].page_id();
        let (index, left_pid, right_pid) = {
            let parent = InternalRef::<K>::new(&txn.page_set()[level - 1].page().data);
            let index = parent
                .value_index(node_pid)
                .expect("deficient node missing from its parent");
            let left = if index >= 1 {
                Some(parent.value_at(index - 1))
            } else {
                None
            };
            let right = if index + 1 < parent.size() {
                Some(parent.value_at(index + 1))
            } else {
                None
            };
            (index, left, right)
        };

        let mut left_sibling = match left_pid {
            Some(pid) => Some(Sibling::acquire(&self.buffer_pool, pid)?),
            None => None,
        };
        if let Some(sibling) = left_sibling.as_mut() {
            if has_spare(sibling.data()) {
                self.redistribute_from_left(txn, level, sibling, index)?;
                sibling.mark_dirty();
                return Ok(Rebalance::Redistributed);
            }
        }

        let mut right_sibling = match right_pid {
            Some(pid) => Some(Sibling::acquire(&self.buffer_pool, pid)?),
            None => None,
        };
        if let Some(sibling) = right_sibling.as_mut() {
            if has_spare(sibling.data()) {
                self.redistribute_from_right(txn, level, sibling, index)?;
                sibling.mark_dirty();
                return Ok(Rebalance::Redistributed);
            }
        }

        if let Some(sibling) = left_sibling.as_mut() {
            self.merge_into_left(txn, level, sibling, index)?;
            sibling.mark_dirty();
        } else {
            let sibling = right_sibling
                .as_mut()
                .expect("non-root deficient node has at least one sibling");
            self.merge_into_right(txn, level, sibling, index)?;
            sibling.mark_dirty();
        }
        txn.deleted_page_set_mut().insert(node_pid);
        Ok(Rebalance::Coalesced)
    }

    /// Move the left sibling's last entry to the front of the deficient
    /// node, rotating through the parent separator at `index`.
    fn redistribute_from_left(
        &self,
        txn: &mut Transaction,
        level: usize,
        sibling: &mut Sibling<'_>,
        index: usize,
    ) -> Result<()> {
        let node_pid = txn.page_set()[level].page_id();
        let moved_child = {
            let (head, tail) = txn.page_set_mut().split_at_mut(level);
            let parent = &mut head[level - 1];
            let node = &mut tail[0];
            let mut parent_view = InternalMut::<K>::new(&mut parent.page_mut().data);

            if tree_page::is_leaf(sibling.data()) {
                let mut left = LeafMut::<K>::new(sibling.data_mut());
                let mut node_view = LeafMut::<K>::new(&mut node.page_mut().data);
                let last = left.size() - 1;
                let (key, rid) = left.item(last);
                left.remove_item_at(last);
                node_view.insert_item_at(0, &key, rid);
                parent_view.set_key_at(index, &key);
                None
            } else {
                let mut left = InternalMut::<K>::new(sibling.data_mut());
                let mut node_view = InternalMut::<K>::new(&mut node.page_mut().data);
                let last = left.size() - 1;
                let (last_key, last_child) = left.entry(last);
                left.set_size(last);

                let old_separator = parent_view.key_at(index);
                node_view.insert_entry_at(0, &last_key, last_child);
                node_view.set_key_at(1, &old_separator);
                parent_view.set_key_at(index, &last_key);
                Some(last_child)
            }
        };

        if let Some(child) = moved_child {
            self.reparent(&[child], node_pid)?;
        }
        Ok(())
    }

    /// Move the right sibling's first entry to the end of the deficient
    /// node; the right sibling sits at parent slot `index + 1`.
    fn redistribute_from_right(
        &self,
        txn: &mut Transaction,
        level: usize,
        sibling: &mut Sibling<'_>,
        index: usize,
    ) -> Result<()> {
        let node_pid = txn.page_set()[level].page_id();
        let moved_child = {
            let (head, tail) = txn.page_set_mut().split_at_mut(level);
            let parent = &mut head[level - 1];
            let node = &mut tail[0];
            let mut parent_view = InternalMut::<K>::new(&mut parent.page_mut().data);

            if tree_page::is_leaf(sibling.data()) {
                let mut right = LeafMut::<K>::new(sibling.data_mut());
                let mut node_view = LeafMut::<K>::new(&mut node.page_mut().data);
                let (key, rid) = right.item(0);
                right.remove_item_at(0);
                node_view.push_item(&key, rid);
                let new_first = right.key_at(0);
                parent_view.set_key_at(index + 1, &new_first);
                None
            } else {
                let mut right = InternalMut::<K>::new(sibling.data_mut());
                let mut node_view = InternalMut::<K>::new(&mut node.page_mut().data);
                let old_separator = parent_view.key_at(index + 1);
                let (_, first_child) = right.entry(0);
                let next_key = right.key_at(1);
                right.remove_entry(0);
                node_view.push_entry(&old_separator, first_child);
                parent_view.set_key_at(index + 1, &next_key);
                Some(first_child)
            }
        };

        if let Some(child) = moved_child {
            self.reparent(&[child], node_pid)?;
        }
        Ok(())
    }

    /// Merge the deficient node into its left sibling, pulling the parent
    /// separator down for internals, and drop the node's parent entry.
    fn merge_into_left(
        &self,
        txn: &mut Transaction,
        level: usize,
        sibling: &mut Sibling<'_>,
        index: usize,
    ) -> Result<()> {
        let left_pid = sibling.page_id();
        let (orphan_next, moved_children) = {
            let (head, tail) = txn.page_set_mut().split_at_mut(level);
            let parent = &mut head[level - 1];
            let node = &mut tail[0];
            let mut parent_view = InternalMut::<K>::new(&mut parent.page_mut().data);

            if tree_page::is_leaf(sibling.data()) {
                let mut left = LeafMut::<K>::new(sibling.data_mut());
                let node_view = LeafRef::<K>::new(&node.page().data);
                for i in 0..node_view.size() {
                    let (key, rid) = node_view.item(i);
                    left.push_item(&key, rid);
                }
                let orphan_next = node_view.next_page_id();
                left.set_next_page_id(orphan_next);
                parent_view.remove_entry(index);
                (orphan_next, Vec::new())
            } else {
                let mut left = InternalMut::<K>::new(sibling.data_mut());
                let node_view = InternalRef::<K>::new(&node.page().data);
                let join_key = parent_view.key_at(index);
                let mut moved = Vec::with_capacity(node_view.size());
                for i in 0..node_view.size() {
                    let (key, child) = (node_view.key_at(i), node_view.value_at(i));
                    if i == 0 {
                        left.push_entry(&join_key, child);
                    } else {
                        left.push_entry(&key, child);
                    }
                    moved.push(child);
                }
                parent_view.remove_entry(index);
                (INVALID_PAGE_ID, moved)
            }
        };

        if orphan_next != INVALID_PAGE_ID {
            let next = self.buffer_pool.fetch_page(orphan_next)?;
            {
                let mut guard = next.write();
                LeafMut::<K>::new(&mut guard.data).set_prev_page_id(left_pid);
            }
            self.buffer_pool.unpin_page(orphan_next, true)?;
        }
        self.reparent(&moved_children, left_pid)?;
        Ok(())
    }

    /// Merge the deficient (leftmost) node into its right sibling: prepend
    /// its entries, then redirect the node's parent slot at the sibling
    /// and drop the sibling's old entry.
    fn merge_into_right(
        &self,
        txn: &mut Transaction,
        level: usize,
        sibling: &mut Sibling<'_>,
        index: usize,
    ) -> Result<()> {
        let right_pid = sibling.page_id();
        let (orphan_prev, moved_children) = {
            let (head, tail) = txn.page_set_mut().split_at_mut(level);
            let parent = &mut head[level - 1];
            let node = &mut tail[0];
            let mut parent_view = InternalMut::<K>::new(&mut parent.page_mut().data);

            if tree_page::is_leaf(sibling.data()) {
                let mut right = LeafMut::<K>::new(sibling.data_mut());
                let node_view = LeafRef::<K>::new(&node.page().data);
                for i in (0..node_view.size()).rev() {
                    let (key, rid) = node_view.item(i);
                    right.insert_item_at(0, &key, rid);
                }
                let orphan_prev = node_view.prev_page_id();
                right.set_prev_page_id(orphan_prev);
                parent_view.remove_entry(index + 1);
                parent_view.set_value_at(index, right_pid);
                (orphan_prev, Vec::new())
            } else {
                let mut right = InternalMut::<K>::new(sibling.data_mut());
                let node_view = InternalRef::<K>::new(&node.page().data);
                let join_key = parent_view.key_at(index + 1);
                let moved_count = node_view.size();
                let mut moved = Vec::with_capacity(moved_count);
                for i in (0..moved_count).rev() {
                    let (key, child) = (node_view.key_at(i), node_view.value_at(i));
                    right.insert_entry_at(0, &key, child);
                    moved.push(child);
                }
                // The sibling's old slot-0 key, now at moved_count, takes
                // the pulled-down separator.
                right.set_key_at(moved_count, &join_key);
                parent_view.remove_entry(index + 1);
                parent_view.set_value_at(index, right_pid);
                (INVALID_PAGE_ID, moved)
            }
        };

        if orphan_prev != INVALID_PAGE_ID {
            let prev = self.buffer_pool.fetch_page(orphan_prev)?;
            {
                let mut guard = prev.write();
                LeafMut::<K>::new(&mut guard.data).set_next_page_id(right_pid);
            }
            self.buffer_pool.unpin_page(orphan_prev, true)?;
        }
        self.reparent(&moved_children, right_pid)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    /// Point the given pages' parent pointers at `parent_pid`
    fn reparent(&self, children: &[PageId], parent_pid: PageId) -> Result<()> {
        for &child_pid in children {
            let child = self.buffer_pool.fetch_page(child_pid)?;
            {
                let mut guard = child.write();
                tree_page::set_parent_page_id(&mut guard.data, parent_pid);
            }
            self.buffer_pool.unpin_page(child_pid, true)?;
        }
        Ok(())
    }

    /// Release the transaction's latch chain in acquisition order
    fn release_page_set(&self, txn: &mut Transaction, dirty: bool) -> Result<()> {
        for latched in txn.page_set_mut().drain(..) {
            let page_id = latched.page_id();
            drop(latched);
            self.buffer_pool.unpin_page(page_id, dirty)?;
        }
        Ok(())
    }

    /// Release every latch and pin, then free pages scheduled for
    /// deletion. Runs identically on success and error paths.
    fn release_latches(&self, txn: &mut Transaction, dirty: bool) -> Result<()> {
        self.release_page_set(txn, dirty)?;
        let deleted: Vec<PageId> = txn.deleted_page_set_mut().drain().collect();
        for page_id in deleted {
            self.buffer_pool.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Record the root change in the header page
    fn update_root_page_id(&self, root_pid: PageId) -> Result<()> {
        let page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = page.write();
            let mut header = HeaderPage::new(&mut guard);
            header.ensure_init();
            if !header.update_record(&self.index_name, root_pid) {
                header.insert_record(&self.index_name, root_pid);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    fn allocate_page(&self) -> Result<(PagePtr, PageId)> {
        self.buffer_pool.new_page().map_err(|e| match e {
            BufferPoolError::BufferPoolFull => BTreeError::OutOfMemory,
            other => BTreeError::BufferPool(other),
        })
    }
}

fn has_spare(data: &[u8]) -> bool {
    tree_page::size(data) > tree_page::min_size(data)
}

fn default_leaf_max<K: IndexKey>() -> usize {
    let per_item = K::ENCODED_LEN + Rid::ENCODED_LEN;
    // Leave room for the transient overflow entry before a split.
    let capacity = (PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / per_item - 1;
    capacity / 2 * 2
}

fn default_internal_max<K: IndexKey>() -> usize {
    let per_entry = K::ENCODED_LEN + 4;
    let capacity = (PAGE_SIZE - TREE_PAGE_HEADER_SIZE) / per_entry - 2;
    capacity / 2 * 2 + 1
}

/// An exclusively latched, pinned sibling page held outside the
/// transaction's chain; releases its latch and pin on drop.
struct Sibling<'a> {
    buffer_pool: &'a BufferPoolManager,
    page_id: PageId,
    latch: Option<LatchedPage>,
    dirty: bool,
}

impl<'a> Sibling<'a> {
    fn acquire(buffer_pool: &'a Arc<BufferPoolManager>, page_id: PageId) -> Result<Self> {
        let page = buffer_pool.fetch_page(page_id)?;
        Ok(Self {
            buffer_pool: buffer_pool.as_ref(),
            page_id,
            latch: Some(LatchedPage::exclusive(&page)),
            dirty: false,
        })
    }

    fn page_id(&self) -> PageId {
        self.page_id
    }

    fn data(&self) -> &[u8] {
        &self.latch.as_ref().expect("latch held until drop").page().data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self
            .latch
            .as_mut()
            .expect("latch held until drop")
            .page_mut()
            .data
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for Sibling<'_> {
    fn drop(&mut self) {
        self.latch.take();
        let _ = self.buffer_pool.unpin_page(self.page_id, self.dirty);
    }
}
