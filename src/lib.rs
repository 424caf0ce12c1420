//! Tessera: a small transactional page store.
//!
//! Tables live in heap files of fixed-size slotted pages. All page access goes
//! through a shared [`BufferPool`](primitives::pager::BufferPool), which takes
//! page-level shared or exclusive locks under strict two-phase locking. Pages a
//! transaction dirties stay in memory until it ends: commit forces them to disk,
//! abort reloads them from disk.

#![warn(missing_docs)]

pub mod db;
pub mod logging;
pub mod primitives;
pub mod query;
pub mod storage;
pub mod types;

pub use db::{Database, StoreOptions};
pub use primitives::concurrency::{LockManager, LockMode};
pub use primitives::io::{FileIo, StdFileIo};
pub use primitives::pager::{BufferPool, PageRef, PoolStats};
pub use query::SeqScan;
pub use storage::{Catalog, HeapFile, HeapFileIter, HeapPage, TupleCursor};
pub use types::{
    AbortCause, Field, FieldType, PageId, Permission, RecordId, Result, TableId, TesseraError,
    TransactionId, Tuple, TupleDesc,
};
