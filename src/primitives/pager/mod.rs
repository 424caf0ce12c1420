#![forbid(unsafe_code)]

mod frame;
mod pool;

pub use frame::PageRef;
pub use pool::{BufferPool, PoolStats};
