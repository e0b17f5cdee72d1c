//! Request and file-reader collaborators
//!
//! The server core does not parse protocols or walk directories itself; it
//! consumes a connection that already knows which file was requested and a
//! reader that fetches named files from the backing store.

use std::fs;
use std::io;
use std::path::PathBuf;

// ============================================================================
// File data
// ============================================================================

/// A named file held in memory: the unit the cache stores and connections
/// send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub name: String,
    pub body: Vec<u8>,
}

impl FileData {
    pub fn new(name: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// One accepted connection with its request already parsed. Dropping the
/// connection releases it.
pub trait Connection: Send + 'static {
    /// Name of the requested file.
    fn file_name(&self) -> &str;

    /// Transmit a file to the peer.
    fn send(&mut self, file: &FileData) -> io::Result<()>;
}

/// Fetches named files from the backing store into memory.
pub trait FileReader: Send + Sync + 'static {
    fn read_file(&self, name: &str) -> io::Result<FileData>;
}

// ============================================================================
// Directory-backed reader
// ============================================================================

/// Reads files from a root directory on the host filesystem.
#[derive(Debug, Clone)]
pub struct DirReader {
    root: PathBuf,
}

impl DirReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileReader for DirReader {
    fn read_file(&self, name: &str) -> io::Result<FileData> {
        // Keep requests inside the root.
        if name.split('/').any(|part| part == "..") {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "path escapes the served root",
            ));
        }
        let body = fs::read(self.root.join(name))?;
        Ok(FileData::new(name, body))
    }
}
