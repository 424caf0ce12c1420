//! Store options and their TOML loader.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::primitives::concurrency::LockManager;
use crate::storage::page::{slot_capacity, MAX_PAGE_SIZE};
use crate::types::{FieldType, Result, TesseraError, TupleDesc};

/// Tuning knobs for a [`Database`](super::Database).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Page size in bytes shared by every heap file.
    pub page_size: usize,
    /// Maximum number of pages the buffer pool caches.
    pub pool_pages: usize,
    /// Length of one lock wait slice in milliseconds.
    pub lock_wait_ms: u64,
    /// Wait slices a conflicting lock request sits through before aborting.
    pub lock_retries: u32,
    /// Attempts [`Database::run`](super::Database::run) makes before giving up.
    pub txn_retries: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            pool_pages: 50,
            lock_wait_ms: 10,
            lock_retries: 100,
            txn_retries: 8,
        }
    }
}

impl StoreOptions {
    /// Parses options from TOML; missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(contents).map_err(|err| TesseraError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            TesseraError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Renders the options as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| TesseraError::Config(err.to_string()))
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(TesseraError::Config("page_size must be positive".into()));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(TesseraError::Config(format!(
                "page_size {} exceeds the maximum of {MAX_PAGE_SIZE}",
                self.page_size
            )));
        }
        // the narrowest row is a single int column
        if slot_capacity(&TupleDesc::from_types(&[FieldType::Int])?, self.page_size) == 0 {
            return Err(TesseraError::Config(format!(
                "page_size {} cannot hold a single tuple",
                self.page_size
            )));
        }
        if self.pool_pages == 0 {
            return Err(TesseraError::Config("pool_pages must be positive".into()));
        }
        if self.txn_retries == 0 {
            return Err(TesseraError::Config("txn_retries must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn lock_manager(&self) -> LockManager {
        LockManager::new(Duration::from_millis(self.lock_wait_ms), self.lock_retries)
    }
}
