#![allow(missing_docs)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use tessera::{
    BufferPool, Catalog, Field, FieldType, FileIo, HeapFile, LockManager, PageId, Permission,
    Result, StdFileIo, TableId, TesseraError, TransactionId, Tuple, TupleDesc,
};

struct FlakyIo {
    inner: StdFileIo,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FileIo for FlakyIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TesseraError::Io(io::Error::other("injected read fault")));
        }
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TesseraError::Io(io::Error::other("injected write fault")));
        }
        self.inner.write_at(off, src)
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.truncate(len)
    }
}

struct Harness {
    _dir: TempDir,
    io: Arc<FlakyIo>,
    pool: Arc<BufferPool>,
    table: TableId,
}

impl Harness {
    fn new(capacity: usize, pages: u32) -> Self {
        let dir = tempdir().unwrap();
        let io = Arc::new(FlakyIo {
            inner: StdFileIo::open(dir.path().join("t.dat")).unwrap(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        });
        let desc = Arc::new(TupleDesc::new(&[FieldType::Int], &["v"]).unwrap());
        let table = TableId(77);
        let file = HeapFile::with_io(table, desc, 4096, io.clone()).unwrap();
        for _ in 0..pages {
            file.append_empty_page().unwrap();
        }
        let catalog = Arc::new(Catalog::new());
        catalog.add_table(file, "t", None);
        let locks = LockManager::new(Duration::from_millis(2), 5);
        let pool = Arc::new(BufferPool::new(catalog, capacity, locks).unwrap());
        Self {
            _dir: dir,
            io,
            pool,
            table,
        }
    }

    fn pid(&self, n: u32) -> PageId {
        PageId::new(self.table, n)
    }

    fn on_disk(&self, n: u32) -> usize {
        self.pool
            .catalog()
            .file(self.table)
            .unwrap()
            .read_page(self.pid(n))
            .unwrap()
            .tuples()
            .count()
    }

    fn write_row(&self, tid: TransactionId, n: u32, v: i32) {
        let page = self.pool.get_page(tid, self.pid(n), Permission::ReadWrite).unwrap();
        let mut page = page.write();
        page.insert_tuple(&mut Tuple::new(vec![Field::Int(v)])).unwrap();
        page.mark_dirty(Some(tid));
    }
}

#[test]
fn uncommitted_pages_never_reach_disk_under_eviction_pressure() {
    let h = Harness::new(3, 10);
    let writer = TransactionId::new();
    h.write_row(writer, 0, 1);

    let reader = TransactionId::new();
    for n in 1..10 {
        h.pool.get_page(reader, h.pid(n), Permission::ReadOnly).unwrap();
        assert!(h.pool.is_cached(h.pid(0)));
        assert!(h.pool.cached_pages().len() <= 3);
    }
    assert!(h.pool.stats().evictions >= 7);
    assert_eq!(h.on_disk(0), 0);

    h.pool.transaction_complete(writer, true).unwrap();
    assert_eq!(h.on_disk(0), 1);
}

#[test]
fn commit_write_failure_drops_unwritten_frames_and_releases_locks() {
    let h = Harness::new(8, 2);
    let tid = TransactionId::new();
    h.write_row(tid, 0, 1);
    h.write_row(tid, 1, 2);

    h.io.fail_writes.store(true, Ordering::SeqCst);
    let err = h.pool.transaction_complete(tid, true).unwrap_err();
    assert!(matches!(err, TesseraError::Io(_)));
    assert!(!h.pool.is_cached(h.pid(0)));
    assert!(!h.pool.is_cached(h.pid(1)));
    assert!(h.pool.lock_manager().pages_locked_by(tid).is_empty());

    h.io.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(h.on_disk(0), 0);
    let next = TransactionId::new();
    let page = h.pool.get_page(next, h.pid(0), Permission::ReadOnly).unwrap();
    assert_eq!(page.read().tuples().count(), 0);
}

#[test]
fn abort_reload_failure_drops_the_frame() {
    let h = Harness::new(8, 1);
    let committed = TransactionId::new();
    h.write_row(committed, 0, 1);
    h.pool.transaction_complete(committed, true).unwrap();

    let tid = TransactionId::new();
    h.write_row(tid, 0, 2);
    h.io.fail_reads.store(true, Ordering::SeqCst);
    h.pool.transaction_complete(tid, false).unwrap();
    assert!(!h.pool.is_cached(h.pid(0)));
    assert!(!h.pool.holds_lock(tid, h.pid(0)));

    h.io.fail_reads.store(false, Ordering::SeqCst);
    let page = h
        .pool
        .get_page(TransactionId::new(), h.pid(0), Permission::ReadOnly)
        .unwrap();
    let values: Vec<_> = page.read().tuples().map(|t| t.field(0).cloned()).collect();
    assert_eq!(values, vec![Some(Field::Int(1))]);
}

#[test]
fn abort_restores_the_cached_page_in_place() {
    let h = Harness::new(8, 1);
    let tid = TransactionId::new();
    let handle = h.pool.get_page(tid, h.pid(0), Permission::ReadWrite).unwrap();
    h.write_row(tid, 0, 5);
    assert_eq!(handle.read().tuples().count(), 1);

    h.pool.transaction_complete(tid, false).unwrap();
    assert_eq!(handle.read().tuples().count(), 0);
    assert_eq!(handle.read().dirtied_by(), None);
    assert!(h.pool.is_cached(h.pid(0)));
}

#[test]
fn pages_held_exclusively_by_others_block_eviction_until_commit() {
    let h = Harness::new(2, 3);
    let a = TransactionId::new();
    let b = TransactionId::new();
    h.pool.get_page(a, h.pid(0), Permission::ReadWrite).unwrap();
    h.pool.get_page(b, h.pid(1), Permission::ReadWrite).unwrap();

    let c = TransactionId::new();
    let err = h.pool.get_page(c, h.pid(2), Permission::ReadOnly).unwrap_err();
    assert!(matches!(err, TesseraError::BufferFull { capacity: 2 }));

    h.pool.transaction_complete(a, true).unwrap();
    h.pool.get_page(c, h.pid(2), Permission::ReadOnly).unwrap();
    assert!(!h.pool.is_cached(h.pid(0)));
    assert!(h.pool.is_cached(h.pid(1)));
}

#[test]
fn flush_and_discard_helpers() {
    let h = Harness::new(4, 1);
    let tid = TransactionId::new();
    h.write_row(tid, 0, 3);
    h.pool.flush_all_pages().unwrap();
    assert_eq!(h.on_disk(0), 1);

    h.pool.discard_page(h.pid(0));
    assert!(!h.pool.is_cached(h.pid(0)));
    h.pool.transaction_complete(tid, true).unwrap();
    assert_eq!(h.pool.active_transactions(), 0);
}
