//! A table stored as an unordered sequence of fixed-size pages in one file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::cursor::HeapFileIter;
use super::page::{empty_page_bytes, slot_capacity, HeapPage, MAX_PAGE_SIZE};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::pager::{BufferPool, PageRef};
use crate::types::{
    PageId, Permission, Result, TableId, TesseraError, TransactionId, Tuple, TupleDesc,
};

/// On-disk representation of one table.
///
/// Page `n` lives at byte offset `n * page_size`; there is no file header.
pub struct HeapFile {
    id: TableId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    io: Arc<dyn FileIo>,
    path: Option<PathBuf>,
    growth: Mutex<()>,
}

impl HeapFile {
    /// Opens (creating if needed) the heap file at `path`.
    pub fn open(path: impl AsRef<Path>, desc: Arc<TupleDesc>, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let io = StdFileIo::open(path)?;
        let mut file = Self::with_io(TableId::from_path(path), desc, page_size, Arc::new(io))?;
        file.path = Some(path.to_path_buf());
        Ok(file)
    }

    /// Builds a heap file over an arbitrary [`FileIo`].
    pub fn with_io(
        id: TableId,
        desc: Arc<TupleDesc>,
        page_size: usize,
        io: Arc<dyn FileIo>,
    ) -> Result<Self> {
        if page_size > MAX_PAGE_SIZE {
            return Err(TesseraError::Invalid("page size exceeds the supported maximum"));
        }
        if slot_capacity(&desc, page_size) == 0 {
            return Err(TesseraError::Invalid("tuple does not fit in a page"));
        }
        Ok(Self {
            id,
            desc,
            page_size,
            io,
            path: None,
            growth: Mutex::new(()),
        })
    }

    /// Table identifier.
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Schema of the stored tuples.
    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Backing path, when opened from the filesystem.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of pages, counting a trailing partial page.
    pub fn num_pages(&self) -> Result<u32> {
        let len = self.io.len()?;
        Ok(len.div_ceil(self.page_size as u64) as u32)
    }

    fn offset(&self, page_no: u32) -> u64 {
        page_no as u64 * self.page_size as u64
    }

    /// Reads and decodes page `pid`. Fails with an I/O error if the file is too short.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        if pid.table != self.id {
            return Err(TesseraError::Invalid("page belongs to another table"));
        }
        let mut buf = empty_page_bytes(self.page_size);
        self.io.read_at(self.offset(pid.page_no), &mut buf)?;
        HeapPage::decode(pid, self.desc.clone(), self.page_size, &buf)
    }

    /// Encodes `page` and writes it at its offset, extending the file if necessary.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let pid = page.id();
        if pid.table != self.id {
            return Err(TesseraError::Invalid("page belongs to another table"));
        }
        let bytes = page.encode()?;
        self.io.write_at(self.offset(pid.page_no), &bytes)?;
        self.io.sync_all()
    }

    /// Appends one empty page and returns its id.
    pub fn append_empty_page(&self) -> Result<PageId> {
        let _growth = self.growth.lock();
        let page_no = self.num_pages()?;
        self.io
            .write_at(self.offset(page_no), &empty_page_bytes(self.page_size))?;
        self.io.sync_all()?;
        debug!(table = %self.id, page_no, "heap.append_page");
        Ok(PageId::new(self.id, page_no))
    }

    /// Places `tuple` in the first page with a free slot, growing the file when
    /// every page is full. Returns the pages that were modified.
    ///
    /// Full pages that `tid` did not already hold are released again so that a
    /// scan for space does not keep every page of the table locked.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageRef>> {
        self.desc.check(tuple.fields())?;
        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.id, page_no);
            let held_before = pool.holds_lock(tid, pid);
            let page = pool.get_page(tid, pid, Permission::ReadWrite)?;
            {
                let mut guard = page.write();
                if guard.num_empty_slots() > 0 {
                    guard.insert_tuple(tuple)?;
                    drop(guard);
                    return Ok(vec![page]);
                }
            }
            if !held_before {
                pool.unsafe_release_page(tid, pid)?;
            }
        }
        loop {
            let pid = self.append_empty_page()?;
            let page = pool.get_page(tid, pid, Permission::ReadWrite)?;
            let mut guard = page.write();
            // another inserter may have filled the fresh page first
            if guard.num_empty_slots() > 0 {
                guard.insert_tuple(tuple)?;
                drop(guard);
                return Ok(vec![page]);
            }
        }
    }

    /// Frees the slot `tuple` occupies. Returns the modified page.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageRef>> {
        let rid = tuple
            .record_id()
            .ok_or(TesseraError::Invalid("tuple has no record id"))?;
        if rid.page.table != self.id || rid.page.page_no >= self.num_pages()? {
            return Err(TesseraError::TupleNotFound(rid));
        }
        let page = pool.get_page(tid, rid.page, Permission::ReadWrite)?;
        page.write().delete_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Cursor over every stored tuple, in page then slot order, read under `tid`.
    pub fn iter(self: &Arc<Self>, pool: Arc<BufferPool>, tid: TransactionId) -> HeapFileIter {
        HeapFileIter::new(self.clone(), pool, tid)
    }
}

impl fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapFile")
            .field("id", &self.id)
            .field("page_size", &self.page_size)
            .field("path", &self.path)
            .finish()
    }
}
