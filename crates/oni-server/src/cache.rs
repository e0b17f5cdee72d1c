//! Bounded file cache with LRU eviction and pinned entries
//!
//! A hash table keyed by file name plus an LRU order list, both under one
//! mutex together with the byte accounting. Lookups return a pinned handle
//! (a clone of the entry's `Arc`); an entry with outstanding pins is never
//! evicted. The mutex is only held for the bounded work of
//! lookup-and-pin or insert-and-maybe-evict, never across I/O.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use log::{debug, trace};

use crate::request::FileData;

struct CacheEntry {
    file: Arc<FileData>,
}

impl CacheEntry {
    /// An entry is in use while a request still holds a pin on it.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.file) > 1
    }
}

struct CacheInner {
    table: HashMap<String, CacheEntry>,
    /// File names from least- to most-recently used.
    lru: VecDeque<String>,
    bytes_used: usize,
}

/// Byte-bounded file cache. Shared by all worker threads.
pub struct Cache {
    inner: Mutex<CacheInner>,
    bytes_cap: usize,
}

impl core::fmt::Debug for Cache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Cache")
            .field("entries", &inner.table.len())
            .field("bytes_used", &inner.bytes_used)
            .field("bytes_cap", &self.bytes_cap)
            .finish()
    }
}

impl Cache {
    pub fn new(bytes_cap: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                table: HashMap::new(),
                lru: VecDeque::new(),
                bytes_used: 0,
            }),
            bytes_cap,
        }
    }

    /// Look up `name`; on a hit, pin the entry, promote it to
    /// most-recently-used, and return the pin.
    pub fn lookup(&self, name: &str) -> Option<Arc<FileData>> {
        let mut inner = self.inner.lock().unwrap();
        let pin = inner.table.get(name)?.file.clone();
        promote(&mut inner.lru, name);
        trace!("cache hit: {}", name);
        Some(pin)
    }

    /// Try to adopt `file` into the cache, evicting least-recently-used
    /// unpinned entries if the byte cap requires it. Returns whether the
    /// file was inserted; on refusal the caller simply keeps serving from
    /// its own handle.
    pub fn insert(&self, file: Arc<FileData>) -> bool {
        let size = file.size();
        let mut inner = self.inner.lock().unwrap();

        if inner.table.contains_key(&file.name) {
            // Another worker cached it while we were reading from disk.
            return false;
        }
        if size > self.bytes_cap {
            debug!("cache refuses {}: larger than the whole cache", file.name);
            return false;
        }
        if inner.bytes_used + size > self.bytes_cap {
            let needed = inner.bytes_used + size - self.bytes_cap;
            if evict(&mut inner, needed) < needed {
                debug!("cache refuses {}: every resident entry is pinned", file.name);
                return false;
            }
        }

        inner.bytes_used += size;
        inner.lru.push_back(file.name.clone());
        inner
            .table
            .insert(file.name.clone(), CacheEntry { file });
        true
    }

    /// Whether `name` is resident.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().unwrap().table.contains_key(name)
    }

    /// Bytes currently accounted to resident entries.
    pub fn bytes_used(&self) -> usize {
        self.inner.lock().unwrap().bytes_used
    }

    pub fn bytes_cap(&self) -> usize {
        self.bytes_cap
    }
}

/// Move `name` to the most-recently-used end.
fn promote(lru: &mut VecDeque<String>, name: &str) {
    if let Some(pos) = lru.iter().position(|n| n == name) {
        let name = lru.remove(pos).expect("position just found");
        lru.push_back(name);
    }
}

/// Walk from least- to most-recently used, dropping unpinned entries until
/// `needed` bytes are reclaimed or the list is exhausted. Pinned entries are
/// skipped. Returns the number of bytes reclaimed.
fn evict(inner: &mut CacheInner, needed: usize) -> usize {
    let mut freed = 0;
    let mut pos = 0;
    while freed < needed && pos < inner.lru.len() {
        let name = &inner.lru[pos];
        let in_use = inner
            .table
            .get(name)
            .map(CacheEntry::in_use)
            .unwrap_or(false);
        if in_use {
            pos += 1;
            continue;
        }
        let name = inner.lru.remove(pos).expect("position in bounds");
        if let Some(entry) = inner.table.remove(&name) {
            freed += entry.file.size();
            inner.bytes_used -= entry.file.size();
            debug!("evicted {} ({} bytes)", name, entry.file.size());
        }
    }
    freed
}
