use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{PageId, PageReadGuard, Rid, INVALID_PAGE_ID};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::leaf::LeafRef;
use crate::storage::buffer::BufferPoolManager;

/// Lazy ordered scan over (key, RID) pairs.
///
/// The iterator owns exactly one pinned, share-latched leaf at a time;
/// stepping past the last item releases the leaf before fetching and
/// latching its successor.
pub struct TreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    current: Option<(PageId, PageReadGuard)>,
    pos: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> TreeIterator<K> {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        page_id: PageId,
        guard: PageReadGuard,
        pos: usize,
    ) -> Self {
        Self {
            buffer_pool,
            current: Some((page_id, guard)),
            pos,
            _key: PhantomData,
        }
    }

    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            current: None,
            pos: 0,
            _key: PhantomData,
        }
    }

    fn release_current(&mut self) {
        if let Some((page_id, guard)) = self.current.take() {
            drop(guard);
            let _ = self.buffer_pool.unpin_page(page_id, false);
        }
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next_pid = {
                let (_, guard) = self.current.as_ref()?;
                let leaf = LeafRef::<K>::new(&guard.data);
                if self.pos < leaf.size() {
                    let item = leaf.item(self.pos);
                    self.pos += 1;
                    return Some(item);
                }
                leaf.next_page_id()
            };

            self.release_current();
            if next_pid == INVALID_PAGE_ID {
                return None;
            }

            let Ok(page) = self.buffer_pool.fetch_page(next_pid) else {
                return None;
            };
            self.current = Some((next_pid, page.read_arc()));
            self.pos = 0;
        }
    }
}

impl<K: IndexKey> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        self.release_current();
    }
}
