//! Log subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{Result, TesseraError};

/// Installs a global fmt subscriber filtered by `level` (any `EnvFilter` directive).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| TesseraError::Config(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| TesseraError::Config("logging already initialized".into()))
}
