//! Block-addressed inodes with sparse file support
//!
//! The interesting part of an on-disk filesystem: translating a file's
//! logical blocks to physical blocks through direct, indirect, and
//! double-indirect pointers, with lazy allocation of the indirection tree
//! and rollback when allocation fails partway.
//!
//! The backing store is abstracted as [`block::BlockStore`]; [`block::MemDisk`]
//! is the RAM-backed implementation used in tests and demos.

pub mod block;
pub mod inode;

pub use block::{BLOCK_SIZE, BlockNr, BlockStore, FsError, MemDisk};
pub use inode::{Inode, MAX_FILE_SIZE, MAX_LOGICAL, N_DIRECT, N_INDIRECT};

#[cfg(test)]
mod fs_tests;
