#![forbid(unsafe_code)]

//! Page-granularity shared/exclusive locks for strict two-phase locking.
//!
//! Every lock-table mutation happens under one mutex. A request that cannot be
//! granted waits on a condition variable that releases notify, for a bounded
//! number of slices, then fails with an abort condition. There is no waits-for
//! graph: deadlocks resolve by timing out one of the participants.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::types::{AbortCause, PageId, Permission, Result, TesseraError, TransactionId};

/// Lock strength.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LockMode {
    /// Any number of readers.
    Shared,
    /// A single writer.
    Exclusive,
}

impl From<Permission> for LockMode {
    fn from(perm: Permission) -> Self {
        match perm {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Outcome of one grant attempt under the table mutex.
enum Grant {
    Granted,
    Blocked,
    UpgradeDenied,
}

#[derive(Default, Debug)]
struct LockTable {
    pages: HashMap<PageId, HashMap<TransactionId, LockMode>>,
    by_txn: HashMap<TransactionId, HashSet<PageId>>,
}

impl LockTable {
    fn try_grant(&mut self, pid: PageId, tid: TransactionId, mode: LockMode) -> Grant {
        let holders = self.pages.entry(pid).or_default();
        let granted = match holders.get(&tid).copied() {
            Some(LockMode::Exclusive) => return Grant::Granted,
            Some(LockMode::Shared) => match mode {
                LockMode::Shared => return Grant::Granted,
                LockMode::Exclusive if holders.len() == 1 => {
                    holders.insert(tid, LockMode::Exclusive);
                    true
                }
                LockMode::Exclusive => return Grant::UpgradeDenied,
            },
            None => {
                let compatible = match mode {
                    LockMode::Shared => holders.values().all(|m| *m == LockMode::Shared),
                    LockMode::Exclusive => holders.is_empty(),
                };
                if compatible {
                    holders.insert(tid, mode);
                }
                compatible
            }
        };
        if !granted {
            return Grant::Blocked;
        }
        self.by_txn.entry(tid).or_default().insert(pid);
        Grant::Granted
    }

    fn release(&mut self, pid: PageId, tid: TransactionId) -> bool {
        let Some(holders) = self.pages.get_mut(&pid) else {
            return false;
        };
        let removed = holders.remove(&tid).is_some();
        if holders.is_empty() {
            self.pages.remove(&pid);
        }
        if let Some(held) = self.by_txn.get_mut(&tid) {
            held.remove(&pid);
            if held.is_empty() {
                self.by_txn.remove(&tid);
            }
        }
        removed
    }

    fn drop_empty(&mut self, pid: PageId) {
        if self.pages.get(&pid).is_some_and(HashMap::is_empty) {
            self.pages.remove(&pid);
        }
    }
}

/// Grants, tracks and releases page locks on behalf of transactions.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    wait_slice: Duration,
    max_waits: u32,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), 100)
    }
}

impl LockManager {
    /// Creates a lock manager whose blocked requests wait at most
    /// `max_waits` slices of `wait_slice` before aborting.
    pub fn new(wait_slice: Duration, max_waits: u32) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            wait_slice,
            max_waits,
        }
    }

    /// Acquires `mode` on `pid` for `tid`, blocking while a conflicting holder exists.
    ///
    /// Returns `Aborted(UpgradeConflict)` immediately when `tid` shares the page
    /// with other readers and asks for exclusive access, and `Aborted(LockTimeout)`
    /// once `max_waits * wait_slice` has elapsed since the request first blocked.
    /// Wakeups caused by releases on other pages do not shorten that budget.
    pub fn acquire(&self, pid: PageId, tid: TransactionId, mode: LockMode) -> Result<()> {
        let mut table = self.table.lock();
        let mut deadline: Option<Instant> = None;
        let mut wakeups = 0u32;
        loop {
            match table.try_grant(pid, tid, mode) {
                Grant::Granted => {
                    trace!(page = %pid, txn = %tid, ?mode, wakeups, "lock.acquire.granted");
                    return Ok(());
                }
                Grant::UpgradeDenied => {
                    debug!(page = %pid, txn = %tid, "lock.acquire.upgrade_denied");
                    return Err(TesseraError::Aborted(AbortCause::UpgradeConflict));
                }
                Grant::Blocked => {
                    table.drop_empty(pid);
                    let now = Instant::now();
                    let deadline = *deadline.get_or_insert_with(|| self.deadline_from(now));
                    let remaining = deadline.saturating_duration_since(now);
                    if remaining.is_zero() {
                        debug!(page = %pid, txn = %tid, ?mode, wakeups, "lock.acquire.timeout");
                        return Err(TesseraError::Aborted(AbortCause::LockTimeout));
                    }
                    wakeups += 1;
                    self.released
                        .wait_for(&mut table, remaining.min(self.wait_slice));
                }
            }
        }
    }

    fn deadline_from(&self, now: Instant) -> Instant {
        let budget = self
            .wait_slice
            .checked_mul(self.max_waits)
            .unwrap_or(Duration::MAX);
        // an unrepresentable deadline falls back to the latest one we can express
        now.checked_add(budget)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
    }

    /// Releases `tid`'s lock on `pid`, if any, and wakes blocked requests.
    pub fn release(&self, pid: PageId, tid: TransactionId) {
        let removed = self.table.lock().release(pid, tid);
        if removed {
            trace!(page = %pid, txn = %tid, "lock.release");
            self.released.notify_all();
        }
    }

    /// Releases every lock `tid` holds. Called once when the transaction ends.
    pub fn release_all(&self, tid: TransactionId) {
        let released = {
            let mut table = self.table.lock();
            let pages: Vec<PageId> = table
                .by_txn
                .get(&tid)
                .map(|held| held.iter().copied().collect())
                .unwrap_or_default();
            for pid in &pages {
                table.release(*pid, tid);
            }
            table.by_txn.remove(&tid);
            pages.len()
        };
        debug!(txn = %tid, released, "lock.release_all");
        if released > 0 {
            self.released.notify_all();
        }
    }

    /// Returns true if `tid` holds any lock on `pid` right now.
    pub fn holds_lock(&self, pid: PageId, tid: TransactionId) -> bool {
        self.table
            .lock()
            .pages
            .get(&pid)
            .is_some_and(|holders| holders.contains_key(&tid))
    }

    /// Mode `tid` holds on `pid`, if any.
    pub fn lock_mode(&self, pid: PageId, tid: TransactionId) -> Option<LockMode> {
        self.table
            .lock()
            .pages
            .get(&pid)
            .and_then(|holders| holders.get(&tid).copied())
    }

    /// Returns true if some transaction holds `pid` exclusively.
    pub fn is_exclusively_locked(&self, pid: PageId) -> bool {
        self.table
            .lock()
            .pages
            .get(&pid)
            .is_some_and(|holders| holders.values().any(|m| *m == LockMode::Exclusive))
    }

    /// Snapshot of the current holders of `pid`.
    pub fn holders(&self, pid: PageId) -> Vec<(TransactionId, LockMode)> {
        let table = self.table.lock();
        let mut holders: Vec<_> = table
            .pages
            .get(&pid)
            .map(|h| h.iter().map(|(t, m)| (*t, *m)).collect())
            .unwrap_or_default();
        holders.sort_by_key(|(t, _)| *t);
        holders
    }

    /// Pages on which `tid` currently holds a lock.
    pub fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<_> = table
            .by_txn
            .get(&tid)
            .map(|held| held.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    /// Number of pages with at least one holder.
    pub fn locked_pages(&self) -> usize {
        self.table.lock().pages.len()
    }
}
