//! Low-level primitives for building the storage engine.
//!
//! Includes positioned file I/O, page-level locking, and the buffer pool.

/// Page-level two-phase locking.
///
/// Shared/exclusive locks keyed by page, with bounded waiting on conflicts.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Page cache.
///
/// Caches decoded pages and enforces the lock protocol on every access.
pub mod pager;
