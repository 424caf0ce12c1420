//! Sequential scan over one table.

use std::sync::Arc;

use crate::primitives::pager::BufferPool;
use crate::storage::{HeapFileIter, TupleCursor};
use crate::types::{Result, TableId, TransactionId, Tuple, TupleDesc};

/// Reads every tuple of a table in storage order under one transaction.
///
/// Field names in [`SeqScan::tuple_desc`] are qualified by the scan alias, so a
/// scan of `users` aliased `u` exposes `u.id`, `u.name`, and so on.
pub struct SeqScan {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    table: TableId,
    alias: String,
    desc: TupleDesc,
    inner: HeapFileIter,
}

impl SeqScan {
    /// Builds a scan of `table` visible as `alias`.
    pub fn new(
        pool: Arc<BufferPool>,
        tid: TransactionId,
        table: TableId,
        alias: &str,
    ) -> Result<Self> {
        let file = pool.catalog().file(table)?;
        let desc = file.tuple_desc().with_alias(alias);
        let inner = file.iter(pool.clone(), tid);
        Ok(Self {
            pool,
            tid,
            table,
            alias: alias.to_owned(),
            desc,
            inner,
        })
    }

    /// Builds a scan aliased by the table's registered name.
    pub fn with_table_alias(pool: Arc<BufferPool>, tid: TransactionId, table: TableId) -> Result<Self> {
        let name = pool.catalog().table_name(table)?;
        Self::new(pool, tid, table, &name)
    }

    /// Registered name of the scanned table.
    pub fn table_name(&self) -> Result<String> {
        self.pool.catalog().table_name(self.table)
    }

    /// Alias prefixed to every field name.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Alias-qualified schema of the produced tuples.
    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    /// Points the scan at another table and alias. The scan is left closed.
    pub fn reset(&mut self, table: TableId, alias: &str) -> Result<()> {
        let file = self.pool.catalog().file(table)?;
        self.desc = file.tuple_desc().with_alias(alias);
        self.inner = file.iter(self.pool.clone(), self.tid);
        self.table = table;
        self.alias = alias.to_owned();
        Ok(())
    }
}

impl TupleCursor for SeqScan {
    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<Tuple> {
        TupleCursor::next(&mut self.inner)
    }

    fn rewind(&mut self) -> Result<()> {
        self.inner.rewind()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}
