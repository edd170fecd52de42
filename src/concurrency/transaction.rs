use std::collections::HashSet;

use crate::common::types::{LatchedPage, Lsn, PageId, Rid, TxnId, INVALID_LSN};

/// Transaction lifecycle under two-phase locking.
///
/// Growing transactions may acquire locks; the first unlock (in non-strict
/// mode) moves them to Shrinking, after which any lock request is a
/// protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// An active transaction and everything it owns: its lock sets, its
/// ordered page-latch set, and the pages it has scheduled for deletion.
pub struct Transaction {
    id: TxnId,
    state: TransactionState,
    prev_lsn: Lsn,
    shared_lock_set: HashSet<Rid>,
    exclusive_lock_set: HashSet<Rid>,
    page_set: Vec<LatchedPage>,
    deleted_page_set: HashSet<PageId>,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: TransactionState::Growing,
            prev_lsn: INVALID_LSN,
            shared_lock_set: HashSet::new(),
            exclusive_lock_set: HashSet::new(),
            page_set: Vec::new(),
            deleted_page_set: HashSet::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// LSN of this transaction's most recent log record
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    pub fn shared_lock_set(&self) -> &HashSet<Rid> {
        &self.shared_lock_set
    }

    pub fn shared_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.shared_lock_set
    }

    pub fn exclusive_lock_set(&self) -> &HashSet<Rid> {
        &self.exclusive_lock_set
    }

    pub fn exclusive_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.exclusive_lock_set
    }

    pub fn holds_lock(&self, rid: &Rid) -> bool {
        self.shared_lock_set.contains(rid) || self.exclusive_lock_set.contains(rid)
    }

    /// Ordered list of page latches currently held (oldest first)
    pub fn page_set(&self) -> &[LatchedPage] {
        &self.page_set
    }

    pub fn page_set_mut(&mut self) -> &mut Vec<LatchedPage> {
        &mut self.page_set
    }

    pub fn add_to_page_set(&mut self, page: LatchedPage) {
        self.page_set.push(page);
    }

    pub fn deleted_page_set(&self) -> &HashSet<PageId> {
        &self.deleted_page_set
    }

    pub fn deleted_page_set_mut(&mut self) -> &mut HashSet<PageId> {
        &mut self.deleted_page_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
        assert!(txn.shared_lock_set().is_empty());
        assert!(txn.exclusive_lock_set().is_empty());
        assert!(txn.page_set().is_empty());
    }

    #[test]
    fn test_lock_set_tracking() {
        let mut txn = Transaction::new(2);
        let rid = Rid::new(1, 0);
        txn.shared_lock_set_mut().insert(rid);
        assert!(txn.holds_lock(&rid));
        txn.shared_lock_set_mut().remove(&rid);
        txn.exclusive_lock_set_mut().insert(rid);
        assert!(txn.holds_lock(&rid));
    }
}
