#![forbid(unsafe_code)]

//! Table storage: the page codec, heap files, the catalog, and cursors.

mod catalog;
mod cursor;
mod heap;
pub mod page;

pub use catalog::Catalog;
pub use cursor::{HeapFileIter, TupleCursor};
pub use heap::HeapFile;
pub use page::HeapPage;
