//! Process-wide page cache that consults the lock manager before handing out pages.
//!
//! The pool follows a no-steal/force policy: a page carrying uncommitted
//! changes is never written back or evicted before its transaction ends, and
//! commit writes every page the transaction dirtied before releasing its locks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::frame::{Frame, FrameState, PageRef};
use crate::primitives::concurrency::{LockManager, LockMode};
use crate::storage::Catalog;
use crate::types::{
    PageId, Permission, RecordId, Result, TableId, TesseraError, TransactionId, Tuple,
};

/// Cache counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// Requests served from the cache.
    pub hits: u64,
    /// Requests that installed a freshly read page in the cache.
    pub misses: u64,
    /// Pages dropped to make room for others.
    pub evictions: u64,
}

struct PoolInner {
    frames: LruCache<PageId, Frame>,
    touched: HashMap<TransactionId, HashSet<PageId>>,
    stats: PoolStats,
}

/// Bounded cache of live pages shared by all transactions.
pub struct BufferPool {
    catalog: Arc<Catalog>,
    locks: LockManager,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Creates a pool caching at most `capacity` pages of tables registered in `catalog`.
    pub fn new(catalog: Arc<Catalog>, capacity: usize, locks: LockManager) -> Result<Self> {
        if capacity == 0 {
            return Err(TesseraError::Invalid("buffer pool capacity must be positive"));
        }
        Ok(Self {
            catalog,
            locks,
            capacity,
            inner: Mutex::new(PoolInner {
                frames: LruCache::unbounded(),
                touched: HashMap::new(),
                stats: PoolStats::default(),
            }),
        })
    }

    /// Maximum number of cached pages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Catalog used to resolve table files.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Lock manager guarding page access.
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// Returns the page `pid` after locking it for `tid` in the mode `perm` requires.
    ///
    /// Blocks while another transaction holds a conflicting lock. On a miss the
    /// page is read from its heap file; a full cache evicts its least recently
    /// used clean page that no transaction holds exclusively, or fails with
    /// [`TesseraError::BufferFull`] when no such page exists.
    pub fn get_page(&self, tid: TransactionId, pid: PageId, perm: Permission) -> Result<PageRef> {
        self.locks.acquire(pid, tid, LockMode::from(perm))?;
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.touched.entry(tid).or_default().insert(pid);
            if let Some(frame) = inner.frames.get(&pid) {
                inner.stats.hits += 1;
                return Ok(frame.page.clone());
            }
        }

        let file = self.catalog.file(pid.table)?;
        let page = file.read_page(pid)?;
        trace!(page = %pid, txn = %tid, "pool.load");

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        // another request may have loaded the page while the file was read
        if let Some(frame) = inner.frames.get(&pid) {
            inner.stats.hits += 1;
            return Ok(frame.page.clone());
        }
        if inner.frames.len() >= self.capacity {
            self.evict_one(inner)?;
        }
        inner.stats.misses += 1;
        let frame = Frame::new(page);
        let handle = frame.page.clone();
        inner.frames.put(pid, frame);
        Ok(handle)
    }

    fn evict_one(&self, inner: &mut PoolInner) -> Result<()> {
        let victim = inner
            .frames
            .iter()
            .rev()
            .find(|(pid, frame)| frame.is_clean() && !self.locks.is_exclusively_locked(**pid))
            .map(|(pid, _)| *pid);
        match victim {
            Some(pid) => {
                inner.frames.pop(&pid);
                inner.stats.evictions += 1;
                debug!(page = %pid, "pool.evict");
                Ok(())
            }
            None => {
                warn!(capacity = self.capacity, "pool.evict.no_victim");
                Err(TesseraError::BufferFull {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Releases `tid`'s lock on `pid` before the transaction ends.
    ///
    /// Only meant for pages the transaction inspected without modifying; a page
    /// carrying its uncommitted changes is refused with `Invalid`.
    pub fn unsafe_release_page(&self, tid: TransactionId, pid: PageId) -> Result<()> {
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if let Some(frame) = inner.frames.peek(&pid) {
                if frame.state() == FrameState::DirtiedBy(tid) {
                    return Err(TesseraError::Invalid(
                        "cannot release a page holding uncommitted changes",
                    ));
                }
            }
            if let Some(pages) = inner.touched.get_mut(&tid) {
                pages.remove(&pid);
                if pages.is_empty() {
                    inner.touched.remove(&tid);
                }
            }
        }
        self.locks.release(pid, tid);
        Ok(())
    }

    /// Returns true if `tid` currently holds a lock on `pid`.
    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.locks.holds_lock(pid, tid)
    }

    /// Ends `tid`: on commit writes every page it dirtied, on abort restores those
    /// pages from disk. Either way all of its locks are released afterwards.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let touched: Vec<(PageId, PageRef)> = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let pages = inner.touched.remove(&tid).unwrap_or_default();
            pages
                .into_iter()
                .filter_map(|pid| inner.frames.peek(&pid).map(|f| (pid, f.page.clone())))
                .collect()
        };
        let mut dirty: Vec<(PageId, PageRef)> = touched
            .into_iter()
            .filter(|(_, page)| page.read().dirtied_by() == Some(tid))
            .collect();
        dirty.sort_by_key(|(pid, _)| *pid);

        let outcome = if commit {
            self.force_pages(tid, &dirty)
        } else {
            self.restore_pages(tid, &dirty);
            Ok(())
        };
        self.locks.release_all(tid);
        debug!(txn = %tid, commit, dirty = dirty.len(), ok = outcome.is_ok(), "pool.transaction_complete");
        outcome
    }

    fn force_pages(&self, tid: TransactionId, dirty: &[(PageId, PageRef)]) -> Result<()> {
        for (idx, (pid, page)) in dirty.iter().enumerate() {
            let written = self.catalog.file(pid.table).and_then(|file| {
                let mut page = page.write();
                file.write_page(&page)?;
                page.mark_dirty(None);
                Ok(())
            });
            if let Err(err) = written {
                warn!(txn = %tid, page = %pid, error = %err, "pool.commit.write_failed");
                let unwritten: Vec<PageId> = dirty[idx..].iter().map(|(pid, _)| *pid).collect();
                self.drop_frames(&unwritten);
                return Err(err);
            }
        }
        Ok(())
    }

    fn restore_pages(&self, tid: TransactionId, dirty: &[(PageId, PageRef)]) {
        let mut lost = Vec::new();
        for (pid, page) in dirty {
            match self
                .catalog
                .file(pid.table)
                .and_then(|file| file.read_page(*pid))
            {
                Ok(fresh) => *page.write() = fresh,
                Err(err) => {
                    warn!(txn = %tid, page = %pid, error = %err, "pool.abort.reload_failed");
                    lost.push(*pid);
                }
            }
        }
        self.drop_frames(&lost);
    }

    fn drop_frames(&self, pids: &[PageId]) {
        if pids.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for pid in pids {
            inner.frames.pop(pid);
        }
    }

    fn mark_dirty(&self, tid: TransactionId, pages: &[PageRef]) {
        for page in pages {
            page.write().mark_dirty(Some(tid));
        }
    }

    /// Inserts `tuple` into `table` on behalf of `tid` and stamps its record id.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table: TableId,
        tuple: &mut Tuple,
    ) -> Result<RecordId> {
        let file = self.catalog.file(table)?;
        let pages = file.insert_tuple(self, tid, tuple)?;
        self.mark_dirty(tid, &pages);
        tuple
            .record_id()
            .ok_or(TesseraError::Invalid("insert did not place the tuple"))
    }

    /// Deletes `tuple` from the table its record id points into.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple
            .record_id()
            .ok_or(TesseraError::Invalid("tuple has no record id"))?;
        let file = self.catalog.file(rid.page.table)?;
        let pages = file.delete_tuple(self, tid, tuple)?;
        self.mark_dirty(tid, &pages);
        Ok(())
    }

    /// Writes `pid` to disk if it is cached and dirty, regardless of its owner.
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        let Some(page) = self.inner.lock().frames.peek(&pid).map(|f| f.page.clone()) else {
            return Ok(());
        };
        let mut page = page.write();
        if page.dirtied_by().is_some() {
            self.catalog.file(pid.table)?.write_page(&page)?;
            page.mark_dirty(None);
        }
        Ok(())
    }

    /// Writes every dirty cached page. Bypasses no-steal; meant for shutdown and tests.
    pub fn flush_all_pages(&self) -> Result<()> {
        for pid in self.cached_pages() {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    /// Drops `pid` from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        self.inner.lock().frames.pop(&pid);
    }

    /// Pages currently cached, most recently used first.
    pub fn cached_pages(&self) -> Vec<PageId> {
        self.inner.lock().frames.iter().map(|(pid, _)| *pid).collect()
    }

    /// Returns true if `pid` is cached.
    pub fn is_cached(&self, pid: PageId) -> bool {
        self.inner.lock().frames.contains(&pid)
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats
    }

    /// Transactions with pool bookkeeping still open.
    pub fn active_transactions(&self) -> usize {
        self.inner.lock().touched.len()
    }
}
