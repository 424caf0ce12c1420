#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;
use tessera::{
    AbortCause, Database, Field, FieldType, PageId, Permission, Result, StoreOptions, TableId,
    TesseraError, Tuple, TupleCursor, TupleDesc,
};

fn accounts_db(dir: &std::path::Path, options: StoreOptions) -> (Database, TableId) {
    let db = Database::open(options).unwrap();
    let table = db
        .open_table(
            "accounts",
            dir.join("accounts.dat"),
            TupleDesc::new(&[FieldType::Int, FieldType::Int], &["id", "balance"]).unwrap(),
        )
        .unwrap();
    (db, table)
}

fn balances(db: &Database, table: TableId) -> Vec<(i32, i32)> {
    db.run(|db, tid| {
        let mut scan = db.scan(tid, table)?;
        scan.open()?;
        let mut rows: Vec<(i32, i32)> = scan
            .collect_remaining()?
            .iter()
            .filter_map(|t| Some((t.field(0)?.as_int()?, t.field(1)?.as_int()?)))
            .collect();
        rows.sort();
        Ok(rows)
    })
    .unwrap()
}

#[test]
fn aborted_transaction_leaves_no_trace() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = accounts_db(dir.path(), StoreOptions::default());
    let tid = db.begin();
    db.insert(tid, table, &mut Tuple::new(vec![Field::Int(1), Field::Int(100)]))?;
    db.commit(tid)?;

    let tid = db.begin();
    let mut scan = db.scan(tid, table)?;
    scan.open()?;
    let existing = TupleCursor::next(&mut scan)?;
    db.delete(tid, &existing)?;
    db.insert(tid, table, &mut Tuple::new(vec![Field::Int(1), Field::Int(0)]))?;
    db.insert(tid, table, &mut Tuple::new(vec![Field::Int(2), Field::Int(5)]))?;
    db.abort(tid)?;

    assert_eq!(balances(&db, table), vec![(1, 100)]);
    let on_disk = db.catalog().file(table)?.read_page(PageId::new(table, 0))?;
    assert_eq!(on_disk.tuples().count(), 1);
    Ok(())
}

#[test]
fn abort_mid_scan_leaves_no_residual_state() -> Result<()> {
    let dir = tempdir()?;
    let (db, table) = accounts_db(dir.path(), StoreOptions::default());
    db.run(|db, tid| {
        for id in 0..3 {
            db.insert(tid, table, &mut Tuple::new(vec![Field::Int(id), Field::Int(10)]))?;
        }
        Ok(())
    })?;

    let tid = db.begin();
    db.insert(tid, table, &mut Tuple::new(vec![Field::Int(9), Field::Int(1)]))?;
    let mut scan = db.scan(tid, table)?;
    scan.open()?;
    TupleCursor::next(&mut scan)?;
    db.abort(tid)?;

    assert!(db.pool().lock_manager().pages_locked_by(tid).is_empty());
    assert!(!db.pool().holds_lock(tid, PageId::new(table, 0)));
    assert_eq!(db.pool().active_transactions(), 0);
    assert_eq!(balances(&db, table).len(), 3);
    Ok(())
}

#[test]
fn writer_waits_for_reader_then_times_out() -> Result<()> {
    let dir = tempdir()?;
    let options = StoreOptions {
        lock_wait_ms: 2,
        lock_retries: 3,
        ..StoreOptions::default()
    };
    let (db, table) = accounts_db(dir.path(), options);
    db.run(|db, tid| db.insert(tid, table, &mut Tuple::new(vec![Field::Int(1), Field::Int(1)])))?;

    let reader = db.begin();
    let pid = PageId::new(table, 0);
    db.pool().get_page(reader, pid, Permission::ReadOnly)?;

    let writer = db.begin();
    let err = db
        .pool()
        .get_page(writer, pid, Permission::ReadWrite)
        .unwrap_err();
    assert!(matches!(err, TesseraError::Aborted(AbortCause::LockTimeout)));
    db.abort(writer)?;
    db.commit(reader)?;

    let writer = db.begin();
    db.pool().get_page(writer, pid, Permission::ReadWrite)?;
    db.commit(writer)?;
    Ok(())
}

#[test]
fn concurrent_transfers_conserve_the_total() {
    const ACCOUNTS: i32 = 6;
    const THREADS: usize = 4;
    const TRANSFERS: usize = 15;

    let dir = tempdir().unwrap();
    let options = StoreOptions {
        lock_wait_ms: 5,
        lock_retries: 400,
        txn_retries: 50,
        ..StoreOptions::default()
    };
    let (db, table) = accounts_db(dir.path(), options);
    db.run(|db, tid| {
        for id in 0..ACCOUNTS {
            db.insert(tid, table, &mut Tuple::new(vec![Field::Int(id), Field::Int(100)]))?;
        }
        Ok(())
    })
    .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..THREADS)
        .map(|seed| {
            let db = db.clone();
            let attempts = attempts.clone();
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
                for _ in 0..TRANSFERS {
                    let from = rng.gen_range(0..ACCOUNTS);
                    let to = rng.gen_range(0..ACCOUNTS);
                    let amount = rng.gen_range(1..=20);
                    db.run(|db, tid| {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        // take the page exclusively up front to avoid upgrade aborts
                        db.pool()
                            .get_page(tid, PageId::new(table, 0), Permission::ReadWrite)?;
                        let mut scan = db.scan(tid, table)?;
                        scan.open()?;
                        for row in scan.collect_remaining()? {
                            let id = row.field(0).and_then(Field::as_int).unwrap_or(-1);
                            let balance = row.field(1).and_then(Field::as_int).unwrap_or(0);
                            let delta = match id {
                                _ if from == to => 0,
                                id if id == from => -amount,
                                id if id == to => amount,
                                _ => 0,
                            };
                            if delta != 0 {
                                db.delete(tid, &row)?;
                                let mut updated =
                                    Tuple::new(vec![Field::Int(id), Field::Int(balance + delta)]);
                                db.insert(tid, table, &mut updated)?;
                            }
                        }
                        Ok(())
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = balances(&db, table);
    assert_eq!(rows.len(), ACCOUNTS as usize);
    assert_eq!(rows.iter().map(|(_, b)| b).sum::<i32>(), ACCOUNTS * 100);
    assert!(attempts.load(Ordering::Relaxed) >= THREADS * TRANSFERS);
    assert!(db.pool().lock_manager().locked_pages() == 0);
}

#[test]
fn readers_do_not_block_each_other() {
    let dir = tempdir().unwrap();
    let (db, table) = accounts_db(dir.path(), StoreOptions::default());
    db.run(|db, tid| db.insert(tid, table, &mut Tuple::new(vec![Field::Int(1), Field::Int(9)])))
        .unwrap();

    let first = db.begin();
    let second = db.begin();
    for tid in [first, second] {
        let mut scan = db.scan(tid, table).unwrap();
        scan.open().unwrap();
        assert_eq!(scan.collect_remaining().unwrap().len(), 1);
    }
    assert_eq!(db.pool().lock_manager().holders(PageId::new(table, 0)).len(), 2);
    db.commit(first).unwrap();
    db.commit(second).unwrap();
}
