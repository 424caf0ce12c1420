//! Pull-based tuple cursors.

use std::sync::Arc;
use std::vec;

use super::heap::HeapFile;
use crate::primitives::pager::BufferPool;
use crate::types::{PageId, Permission, Result, TesseraError, TransactionId, Tuple};

/// A restartable stream of tuples.
///
/// A cursor must be opened before it yields; `next` past the end fails with
/// [`TesseraError::NoSuchElement`].
pub trait TupleCursor {
    /// Prepares the cursor to yield from the beginning.
    fn open(&mut self) -> Result<()>;
    /// Returns true if another tuple is available.
    fn has_next(&mut self) -> Result<bool>;
    /// Returns the next tuple.
    fn next(&mut self) -> Result<Tuple>;
    /// Restarts from the first tuple.
    fn rewind(&mut self) -> Result<()>;
    /// Releases cursor state; the cursor may be opened again.
    fn close(&mut self);

    /// Drains the remaining tuples.
    fn collect_remaining(&mut self) -> Result<Vec<Tuple>> {
        let mut out = Vec::new();
        while self.has_next()? {
            out.push(self.next()?);
        }
        Ok(out)
    }
}

struct ScanState {
    next_page: u32,
    pending: vec::IntoIter<Tuple>,
}

/// Lazily walks a heap file page by page through the buffer pool.
///
/// Each page is fetched read-only under the iterating transaction, so the
/// shared locks taken stay held until that transaction ends.
pub struct HeapFileIter {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    state: Option<ScanState>,
}

impl HeapFileIter {
    pub(crate) fn new(file: Arc<HeapFile>, pool: Arc<BufferPool>, tid: TransactionId) -> Self {
        Self {
            file,
            pool,
            tid,
            state: None,
        }
    }

    /// Transaction the cursor reads under.
    pub fn transaction(&self) -> TransactionId {
        self.tid
    }
}

impl TupleCursor for HeapFileIter {
    fn open(&mut self) -> Result<()> {
        self.state = Some(ScanState {
            next_page: 0,
            pending: Vec::new().into_iter(),
        });
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        let state = self
            .state
            .as_mut()
            .ok_or(TesseraError::Invalid("cursor is not open"))?;
        loop {
            if !state.pending.as_slice().is_empty() {
                return Ok(true);
            }
            if state.next_page >= self.file.num_pages()? {
                return Ok(false);
            }
            let pid = PageId::new(self.file.id(), state.next_page);
            let page = self.pool.get_page(self.tid, pid, Permission::ReadOnly)?;
            let tuples: Vec<Tuple> = page.read().tuples().cloned().collect();
            state.pending = tuples.into_iter();
            state.next_page += 1;
        }
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(TesseraError::NoSuchElement);
        }
        self.state
            .as_mut()
            .and_then(|state| state.pending.next())
            .ok_or(TesseraError::NoSuchElement)
    }

    fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.state = None;
    }
}

impl Iterator for HeapFileIter {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.is_none() {
            if let Err(err) = self.open() {
                return Some(Err(err));
            }
        }
        match self.has_next() {
            Ok(true) => Some(TupleCursor::next(self)),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
