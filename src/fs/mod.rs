//! Filesystem utilities for leasepool.
//!
//! Lock records and result files are always replaced atomically so a reader
//! in another process never observes a half-written JSON document.

pub mod atomic;

pub use atomic::atomic_write;
pub use atomic::atomic_write_file;
