//! oni: three systems cores under one roof
//!
//! - [`threads`] — a cooperative user-level thread runtime: FIFO scheduling,
//!   wait queues, locks, condition variables, deferred stack reclamation.
//! - [`server`] — a multi-threaded file server core: bounded request queue,
//!   worker pool, and a pinned LRU file cache.
//! - [`fs`] — sparse block-addressed inodes with direct, indirect, and
//!   double-indirect pointers and rollback-safe lazy allocation.
//!
//! The three are independent; this crate re-exports them and hosts the
//! cross-component scenario tests.

pub use oni_fs as fs;
pub use oni_server as server;
pub use oni_threads as threads;
