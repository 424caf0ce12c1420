#![forbid(unsafe_code)]

//! Read operators layered on top of table storage.

pub mod scan;

pub use scan::SeqScan;
