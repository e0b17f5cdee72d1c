//! Multi-threaded file server core
//!
//! The heart of a static file server, minus the protocol plumbing: a
//! bounded producer/consumer request queue drained by a pool of OS worker
//! threads, and a byte-bounded file cache with LRU eviction that never
//! evicts a file while a worker is still sending it.
//!
//! Connections arrive already parsed (the [`request::Connection`] trait)
//! and files come from a [`request::FileReader`]; [`request::DirReader`]
//! serves a directory on the host filesystem.

pub mod cache;
pub mod request;
pub mod server;

pub use cache::Cache;
pub use request::{Connection, DirReader, FileData, FileReader};
pub use server::Server;

#[cfg(test)]
mod cache_tests;
