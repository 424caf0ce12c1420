#![forbid(unsafe_code)]

//! Process-level entry point tying the catalog, buffer pool and lock manager together.

mod config;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

pub use config::StoreOptions;

use crate::primitives::pager::BufferPool;
use crate::query::SeqScan;
use crate::storage::{Catalog, HeapFile};
use crate::types::{RecordId, Result, TableId, TransactionId, Tuple, TupleDesc};

/// Shared handle to one store. Clones refer to the same catalog and pool.
#[derive(Clone)]
pub struct Database {
    options: StoreOptions,
    catalog: Arc<Catalog>,
    pool: Arc<BufferPool>,
}

impl Database {
    /// Creates an empty store configured by `options`.
    pub fn open(options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let catalog = Arc::new(Catalog::new());
        let pool = Arc::new(BufferPool::new(
            catalog.clone(),
            options.pool_pages,
            options.lock_manager(),
        )?);
        info!(
            page_size = options.page_size,
            pool_pages = options.pool_pages,
            "db.open"
        );
        Ok(Self {
            options,
            catalog,
            pool,
        })
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Table registry.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Shared buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Opens (creating if needed) the heap file at `path` and registers it as `name`.
    pub fn open_table(&self, name: &str, path: impl AsRef<Path>, desc: TupleDesc) -> Result<TableId> {
        let file = HeapFile::open(path, Arc::new(desc), self.options.page_size)?;
        Ok(self.catalog.add_table(file, name, None))
    }

    /// Starts a transaction.
    pub fn begin(&self) -> TransactionId {
        let tid = TransactionId::new();
        debug!(txn = %tid, "db.begin");
        tid
    }

    /// Forces `tid`'s changes to disk and releases its locks.
    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        self.pool.transaction_complete(tid, true)
    }

    /// Discards `tid`'s changes and releases its locks.
    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        self.pool.transaction_complete(tid, false)
    }

    /// Inserts `tuple` into `table` under `tid`.
    pub fn insert(&self, tid: TransactionId, table: TableId, tuple: &mut Tuple) -> Result<RecordId> {
        self.pool.insert_tuple(tid, table, tuple)
    }

    /// Deletes `tuple` under `tid`.
    pub fn delete(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        self.pool.delete_tuple(tid, tuple)
    }

    /// Opens a scan of `table` under `tid`, aliased by the table name.
    pub fn scan(&self, tid: TransactionId, table: TableId) -> Result<SeqScan> {
        SeqScan::with_table_alias(self.pool.clone(), tid, table)
    }

    /// Runs `f` in a fresh transaction and commits its effects.
    ///
    /// Any error from `f` aborts the transaction. When the error is an abort
    /// condition the whole transaction is retried with a new id, up to
    /// `txn_retries` attempts; other errors are returned as is.
    pub fn run<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Database, TransactionId) -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            let tid = self.begin();
            let err = match f(self, tid) {
                Ok(value) => {
                    self.commit(tid)?;
                    return Ok(value);
                }
                Err(err) => err,
            };
            self.abort(tid)?;
            if !err.is_abort() || attempt >= self.options.txn_retries {
                warn!(txn = %tid, attempt, error = %err, "db.run.failed");
                return Err(err);
            }
            debug!(txn = %tid, attempt, error = %err, "db.run.retry");
            thread::sleep(Duration::from_millis(self.options.lock_wait_ms * attempt as u64));
            attempt += 1;
        }
    }
}
