#![forbid(unsafe_code)]

//! Registry of open tables.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::heap::HeapFile;
use crate::types::{Result, TableId, TesseraError, TupleDesc};

#[derive(Debug)]
struct TableEntry {
    file: Arc<HeapFile>,
    name: String,
    primary_key: Option<String>,
}

/// Maps table ids and names to their heap files.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableId, TableEntry>>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under `name`. A table previously registered with the
    /// same name or the same id is replaced.
    pub fn add_table(&self, file: HeapFile, name: &str, primary_key: Option<&str>) -> TableId {
        let id = file.id();
        let mut tables = self.tables.write();
        tables.retain(|existing, entry| *existing == id || entry.name != name);
        tables.insert(
            id,
            TableEntry {
                file: Arc::new(file),
                name: name.to_owned(),
                primary_key: primary_key.map(str::to_owned),
            },
        );
        debug!(table = %id, name, "catalog.add_table");
        id
    }

    /// Heap file of `table`.
    pub fn file(&self, table: TableId) -> Result<Arc<HeapFile>> {
        self.tables
            .read()
            .get(&table)
            .map(|entry| entry.file.clone())
            .ok_or(TesseraError::UnknownTable(table))
    }

    /// Schema of `table`.
    pub fn tuple_desc(&self, table: TableId) -> Result<Arc<TupleDesc>> {
        Ok(self.file(table)?.tuple_desc().clone())
    }

    /// Looks a table up by name.
    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables
            .read()
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }

    /// Name `table` was registered under.
    pub fn table_name(&self, table: TableId) -> Result<String> {
        self.tables
            .read()
            .get(&table)
            .map(|entry| entry.name.clone())
            .ok_or(TesseraError::UnknownTable(table))
    }

    /// Primary key column of `table`, if one was declared.
    pub fn primary_key(&self, table: TableId) -> Result<Option<String>> {
        self.tables
            .read()
            .get(&table)
            .map(|entry| entry.primary_key.clone())
            .ok_or(TesseraError::UnknownTable(table))
    }

    /// Ids of all registered tables, ascending.
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Forgets every table.
    pub fn clear(&self) {
        self.tables.write().clear();
    }
}
