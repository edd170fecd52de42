use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::common::config::WAIT_TIMEOUT;
use crate::common::types::{Rid, TxnId};
use crate::concurrency::transaction::{Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A blocked request parked in an entry's waiter queue. The sender is the
/// grantor's half of a one-shot completion handle; the waiter blocks on
/// the receiving half with a bounded timeout.
struct Waiter {
    txn_id: TxnId,
    mode: LockMode,
    grant: mpsc::Sender<()>,
}

struct LockEntry {
    mode: LockMode,
    granted: HashSet<TxnId>,
    waiters: VecDeque<Waiter>,
}

impl LockEntry {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        let mut granted = HashSet::new();
        granted.insert(txn_id);
        Self {
            mode,
            granted,
            waiters: VecDeque::new(),
        }
    }
}

/// Tuple-level lock manager enforcing two-phase locking with wait-die
/// deadlock prevention.
///
/// Wait-die: a requester younger (larger TID) than any current grantee
/// aborts instead of waiting; older requesters wait, but never longer than
/// the configured timeout. Both rules apply to every blocking request.
pub struct LockManager {
    strict: bool,
    wait_timeout: Duration,
    table: Mutex<HashMap<Rid, LockEntry>>,
}

impl LockManager {
    pub fn new(strict_2pl: bool) -> Self {
        Self::with_timeout(strict_2pl, WAIT_TIMEOUT)
    }

    pub fn with_timeout(strict_2pl: bool, wait_timeout: Duration) -> Self {
        Self {
            strict: strict_2pl,
            wait_timeout,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Request a shared lock on `rid`. Returns false (with the transaction
    /// forced to Aborted where the protocol demands it) on any failure.
    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if !self.check_growable(txn) {
            return false;
        }

        let mut table = self.table.lock();
        let entry = match table.entry(rid) {
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry::new(txn.id(), LockMode::Shared));
                txn.shared_lock_set_mut().insert(rid);
                return true;
            }
            Entry::Occupied(occupied) => occupied.into_mut(),
        };

        if entry.mode == LockMode::Shared && entry.waiters.is_empty() {
            entry.granted.insert(txn.id());
            txn.shared_lock_set_mut().insert(rid);
            return true;
        }

        // Blocked: the entry is exclusive, or earlier waiters are queued.
        if Self::should_die(entry, txn.id()) {
            log::debug!("wait-die: txn {} aborted requesting S on {:?}", txn.id(), rid);
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let receiver = Self::enqueue(entry, txn.id(), LockMode::Shared);
        drop(table);
        self.await_grant(txn, rid, LockMode::Shared, receiver)
    }

    /// Request an exclusive lock on `rid`
    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if !self.check_growable(txn) {
            return false;
        }

        let mut table = self.table.lock();
        let entry = match table.entry(rid) {
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry::new(txn.id(), LockMode::Exclusive));
                txn.exclusive_lock_set_mut().insert(rid);
                return true;
            }
            Entry::Occupied(occupied) => occupied.into_mut(),
        };

        // Any exclusive request against a held entry blocks.
        if Self::should_die(entry, txn.id()) {
            log::debug!("wait-die: txn {} aborted requesting X on {:?}", txn.id(), rid);
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let receiver = Self::enqueue(entry, txn.id(), LockMode::Exclusive);
        drop(table);
        self.await_grant(txn, rid, LockMode::Exclusive, receiver)
    }

    /// Upgrade a shared lock to exclusive. Permitted only for the sole
    /// shared holder; the conversion is atomic under the table mutex, so a
    /// competing upgrader simply observes false.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if !self.check_growable(txn) {
            return false;
        }

        let mut table = self.table.lock();
        let Some(entry) = table.get_mut(&rid) else {
            return false;
        };
        if entry.mode != LockMode::Shared || !entry.granted.contains(&txn.id()) {
            return false;
        }
        if entry.granted.len() > 1 {
            return false;
        }

        entry.mode = LockMode::Exclusive;
        txn.shared_lock_set_mut().remove(&rid);
        txn.exclusive_lock_set_mut().insert(rid);
        true
    }

    /// Release the lock `txn` holds on `rid`. In strict mode this is only
    /// legal once the transaction has committed or aborted.
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if self.strict
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let mut table = self.table.lock();
        let entry = table
            .get_mut(&rid)
            .expect("unlock on a RID with no lock entry");
        assert!(
            entry.granted.remove(&txn.id()),
            "unlock by a transaction that holds no grant"
        );

        if entry.mode == LockMode::Exclusive {
            txn.exclusive_lock_set_mut().remove(&rid);
        } else {
            txn.shared_lock_set_mut().remove(&rid);
        }

        if !self.strict && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        if entry.granted.is_empty() {
            Self::grant_next(entry);
            if entry.granted.is_empty() && entry.waiters.is_empty() {
                table.remove(&rid);
            }
        }
        true
    }

    /// Number of granted holders on `rid` (diagnostics)
    pub fn holders(&self, rid: &Rid) -> usize {
        self.table
            .lock()
            .get(rid)
            .map(|e| e.granted.len())
            .unwrap_or(0)
    }

    fn check_growable(&self, txn: &mut Transaction) -> bool {
        match txn.state() {
            TransactionState::Growing => true,
            TransactionState::Shrinking => {
                // Lock growth after an unlock violates 2PL.
                txn.set_state(TransactionState::Aborted);
                false
            }
            TransactionState::Committed | TransactionState::Aborted => false,
        }
    }

    /// Wait-die: die if any current grantee is older (smaller TID)
    fn should_die(entry: &LockEntry, txn_id: TxnId) -> bool {
        entry.granted.iter().any(|&granted| granted < txn_id)
    }

    fn enqueue(entry: &mut LockEntry, txn_id: TxnId, mode: LockMode) -> mpsc::Receiver<()> {
        let (sender, receiver) = mpsc::channel();
        entry.waiters.push_back(Waiter {
            txn_id,
            mode,
            grant: sender,
        });
        receiver
    }

    fn await_grant(
        &self,
        txn: &mut Transaction,
        rid: Rid,
        mode: LockMode,
        receiver: mpsc::Receiver<()>,
    ) -> bool {
        match receiver.recv_timeout(self.wait_timeout) {
            Ok(()) => {
                match mode {
                    LockMode::Shared => txn.shared_lock_set_mut().insert(rid),
                    LockMode::Exclusive => txn.exclusive_lock_set_mut().insert(rid),
                };
                true
            }
            Err(_) => {
                txn.set_state(TransactionState::Aborted);
                self.cancel_wait(txn.id(), rid);
                false
            }
        }
    }

    /// Undo a timed-out wait: drop the stale queue entry, and if the grant
    /// raced the timeout, give the lock back and pass it on.
    fn cancel_wait(&self, txn_id: TxnId, rid: Rid) {
        let mut table = self.table.lock();
        let Some(entry) = table.get_mut(&rid) else {
            return;
        };
        entry.waiters.retain(|w| w.txn_id != txn_id);
        if entry.granted.remove(&txn_id) && entry.granted.is_empty() {
            Self::grant_next(entry);
        }
        if entry.granted.is_empty() && entry.waiters.is_empty() {
            table.remove(&rid);
        }
    }

    /// Pass the lock to the head waiter, then keep admitting consecutive
    /// shared waiters while the mode stays shared. Waiters whose receiver
    /// is gone timed out and are skipped.
    fn grant_next(entry: &mut LockEntry) {
        while let Some(head) = entry.waiters.pop_front() {
            if head.grant.send(()).is_err() {
                continue;
            }
            entry.mode = head.mode;
            entry.granted.insert(head.txn_id);

            if head.mode == LockMode::Shared {
                while let Some(next) = entry.waiters.front() {
                    if next.mode != LockMode::Shared {
                        break;
                    }
                    let next = entry.waiters.pop_front().expect("front was Some");
                    if next.grant.send(()).is_ok() {
                        entry.granted.insert(next.txn_id);
                    }
                }
            }
            return;
        }
    }
}
