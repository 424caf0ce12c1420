#![forbid(unsafe_code)]

//! Identifiers, the tuple model, and the crate-wide error type.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod tuple;

pub use tuple::{Field, FieldType, Tuple, TupleDesc, TupleDescItem};

/// Identifies one table (and therefore one heap file).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableId(pub u32);

impl TableId {
    /// Derives a stable table id from the backing file path.
    ///
    /// The same absolute path always maps to the same id, so reopening a table
    /// after a restart keeps page identities intact.
    pub fn from_path(path: &Path) -> Self {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let digest = xxhash_rust::xxh64::xxh64(absolute.to_string_lossy().as_bytes(), 0);
        TableId(digest as u32)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a page by table and page number within that table's file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId {
    /// Table owning the page.
    pub table: TableId,
    /// Zero-based position of the page in the table's file.
    pub page_no: u32,
}

impl PageId {
    /// Creates a page id.
    pub const fn new(table: TableId, page_no: u32) -> Self {
        Self { table, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table.0, self.page_no)
    }
}

/// Durable address of one tuple: its page and slot.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecordId {
    /// Page holding the tuple.
    pub page: PageId,
    /// Slot index inside the page.
    pub slot: u16,
}

impl RecordId {
    /// Creates a record id.
    pub const fn new(page: PageId, slot: u16) -> Self {
        Self { page, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page, self.slot)
    }
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for one unit of work.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Allocates a process-unique transaction id.
    pub fn new() -> Self {
        TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Access requested from the buffer pool.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Permission {
    /// Read access; maps to a shared lock.
    ReadOnly,
    /// Read-write access; maps to an exclusive lock.
    ReadWrite,
}

/// Why a transaction must be aborted.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AbortCause {
    /// A shared-to-exclusive upgrade was requested while other transactions share the page.
    UpgradeConflict,
    /// A conflicting lock was not released within the wait budget.
    LockTimeout,
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::UpgradeConflict => f.write_str("lock upgrade conflicts with other readers"),
            AbortCause::LockTimeout => f.write_str("lock wait budget exhausted"),
        }
    }
}

/// Errors surfaced by the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    /// Underlying file I/O failed, including short reads.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The calling transaction must abort and may be retried.
    #[error("transaction aborted: {0}")]
    Aborted(AbortCause),
    /// Every cached page is dirty or exclusively locked.
    #[error("buffer pool full: all {capacity} pages are pinned")]
    BufferFull {
        /// Configured pool capacity in pages.
        capacity: usize,
    },
    /// The tuple is not stored at its recorded slot.
    #[error("tuple not found at {0}")]
    TupleNotFound(RecordId),
    /// A cursor was advanced past its last element.
    #[error("no more tuples")]
    NoSuchElement,
    /// The table id is not registered in the catalog.
    #[error("unknown table {0}")]
    UnknownTable(TableId),
    /// Page bytes could not be decoded.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The API was used in a way its contract forbids.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be loaded or validated.
    #[error("config: {0}")]
    Config(String),
}

impl TesseraError {
    /// Returns true when the error means the transaction should abort and retry.
    pub fn is_abort(&self) -> bool {
        matches!(self, TesseraError::Aborted(_))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TesseraError>;
