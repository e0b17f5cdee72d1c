//! Cache eviction and pinning tests

use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::cache::Cache;
use crate::request::FileData;

fn file(name: &str, size: usize) -> Arc<FileData> {
    Arc::new(FileData::new(name, vec![0u8; size]))
}

#[test]
fn insert_then_lookup() {
    let cache = Cache::new(1000);
    assert!(cache.insert(file("a", 100)));
    assert_eq!(cache.bytes_used(), 100);

    let pinned = cache.lookup("a").expect("resident entry");
    assert_eq!(pinned.name, "a");
    assert_eq!(pinned.size(), 100);
    assert!(cache.lookup("missing").is_none());
}

#[test]
fn duplicate_insert_is_refused() {
    let cache = Cache::new(1000);
    assert!(cache.insert(file("a", 100)));
    assert!(!cache.insert(file("a", 100)));
    assert_eq!(cache.bytes_used(), 100);
}

#[test]
fn file_larger_than_cache_is_refused() {
    let cache = Cache::new(100);
    assert!(!cache.insert(file("big", 101)));
    assert_eq!(cache.bytes_used(), 0);
}

#[test]
fn eviction_follows_lru_order() {
    // Three files fit; the fourth forces out the least recently used.
    let cache = Cache::new(300);
    assert!(cache.insert(file("a", 100)));
    assert!(cache.insert(file("b", 100)));
    assert!(cache.insert(file("c", 100)));

    // Promote a and b; c becomes the eviction candidate.
    drop(cache.lookup("a"));
    drop(cache.lookup("b"));

    assert!(cache.insert(file("d", 100)));
    assert!(!cache.contains("c"));
    assert!(cache.contains("a"));
    assert!(cache.contains("b"));
    assert!(cache.contains("d"));
    assert_eq!(cache.bytes_used(), 300);
}

#[test]
fn eviction_takes_several_entries_when_needed() {
    let cache = Cache::new(300);
    assert!(cache.insert(file("a", 100)));
    assert!(cache.insert(file("b", 100)));
    assert!(cache.insert(file("c", 100)));

    // 150 bytes only fit if the two oldest both go.
    assert!(cache.insert(file("d", 150)));
    assert!(!cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
    assert_eq!(cache.bytes_used(), 250);
    assert!(cache.bytes_used() <= cache.bytes_cap());
}

#[test]
fn pinned_entry_survives_eviction_pressure() {
    let cache = Cache::new(100);
    assert!(cache.insert(file("x", 60)));

    // A request is mid-send: the pin blocks eviction, so y cannot fit.
    let pin = cache.lookup("x").expect("resident entry");
    assert!(!cache.insert(file("y", 60)));
    assert!(cache.contains("x"));
    assert_eq!(cache.bytes_used(), 60);

    // Send finished: retry evicts x and admits y.
    drop(pin);
    assert!(cache.insert(file("y", 60)));
    assert!(!cache.contains("x"));
    assert!(cache.contains("y"));
    assert_eq!(cache.bytes_used(), 60);
}

#[test]
fn eviction_skips_pinned_and_takes_the_next_oldest() {
    let cache = Cache::new(300);
    assert!(cache.insert(file("a", 100)));
    assert!(cache.insert(file("b", 100)));
    assert!(cache.insert(file("c", 100)));

    // a is oldest but pinned; b is the one to go.
    let pin = cache.lookup("a").expect("resident entry");
    assert!(cache.insert(file("d", 100)));
    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
    assert!(cache.contains("d"));
    drop(pin);
}

#[test]
fn bytes_used_never_exceeds_the_cap() {
    let cache = Cache::new(500);
    for i in 0..20 {
        cache.insert(file(&format!("f{}", i), 90));
        assert!(cache.bytes_used() <= cache.bytes_cap());
    }
}
