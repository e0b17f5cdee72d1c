//! Server core: bounded request queue and worker pool
//!
//! The accept loop hands connections to [`Server::request`]; worker threads
//! drain them. Producer and consumers meet at a fixed-capacity ring guarded
//! by one mutex and two condition variables. With no workers or no queue
//! capacity the server services requests synchronously in the caller's
//! thread.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::cache::Cache;
use crate::request::{Connection, FileData, FileReader};

// ============================================================================
// Request ring
// ============================================================================

/// Circular buffer of pending connections. One slot is kept empty so a full
/// ring and an empty ring are distinguishable from the indices alone.
struct Ring<C> {
    slots: Vec<Option<C>>,
    in_: usize,
    out: usize,
    exiting: bool,
}

impl<C> Ring<C> {
    fn with_requests(max_requests: usize) -> Self {
        let cap = max_requests + 1;
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || None);
        Self {
            slots,
            in_: 0,
            out: 0,
            exiting: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.in_ == self.out
    }

    fn is_full(&self) -> bool {
        (self.in_ + 1) % self.slots.len() == self.out
    }
}

// ============================================================================
// Shared server state
// ============================================================================

struct Shared<C, R> {
    ring: Mutex<Ring<C>>,
    not_full: Condvar,
    not_empty: Condvar,
    cache: Option<Cache>,
    reader: R,
}

impl<C: Connection, R: FileReader> Shared<C, R> {
    /// Block until a slot frees up, then queue the connection.
    fn add_request(&self, conn: C) {
        let mut ring = self.ring.lock().unwrap();
        while ring.is_full() {
            ring = self.not_full.wait(ring).unwrap();
        }
        let at = ring.in_;
        ring.slots[at] = Some(conn);
        if ring.is_empty() {
            // Empty until this insert lands; wake the sleeping workers.
            self.not_empty.notify_all();
        }
        ring.in_ = (ring.in_ + 1) % ring.slots.len();
    }

    /// Block until a request is available. Returns `None` once the server
    /// is exiting; pending requests are abandoned at that point.
    fn take_request(&self) -> Option<C> {
        let mut ring = self.ring.lock().unwrap();
        while !ring.exiting && ring.is_empty() {
            ring = self.not_empty.wait(ring).unwrap();
        }
        if ring.exiting {
            return None;
        }
        let at = ring.out;
        let conn = ring.slots[at].take();
        if ring.is_full() {
            // Full until this removal; wake the blocked producers.
            self.not_full.notify_all();
        }
        ring.out = (ring.out + 1) % ring.slots.len();
        conn
    }

    /// Service one connection: cache hit sends the pinned entry, cache miss
    /// reads from the store and offers the file to the cache either way.
    fn service(&self, mut conn: C) {
        let name = conn.file_name().to_string();

        let Some(cache) = &self.cache else {
            match self.reader.read_file(&name) {
                Ok(file) => send(&mut conn, &file),
                Err(e) => debug!("dropping request for {}: {}", name, e),
            }
            return;
        };

        if let Some(pinned) = cache.lookup(&name) {
            // The pin keeps the entry alive across the send; eviction skips
            // it until the handle drops.
            send(&mut conn, &pinned);
            return;
        }

        // Miss: read outside the cache lock, then offer the cache ownership.
        // Whether or not it accepts, the request still gets served.
        match self.reader.read_file(&name) {
            Ok(file) => {
                let file = Arc::new(file);
                cache.insert(file.clone());
                send(&mut conn, &file);
            }
            Err(e) => debug!("dropping request for {}: {}", name, e),
        }
    }
}

fn send<C: Connection>(conn: &mut C, file: &FileData) {
    if let Err(e) = conn.send(file) {
        warn!("send of {} failed: {}", file.name, e);
    }
}

// ============================================================================
// Server
// ============================================================================

/// Multi-threaded file server core.
pub struct Server<C: Connection, R: FileReader> {
    shared: Arc<Shared<C, R>>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: Connection, R: FileReader> core::fmt::Debug for Server<C, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Server")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl<C: Connection, R: FileReader> Server<C, R> {
    /// Start a server with `nr_threads` workers, a queue of `max_requests`
    /// pending connections, and a file cache capped at `max_cache_size`
    /// bytes. Zero workers or zero queue capacity makes [`Server::request`]
    /// synchronous; a zero cache size disables caching.
    pub fn new(
        nr_threads: usize,
        max_requests: usize,
        max_cache_size: usize,
        reader: R,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            ring: Mutex::new(Ring::with_requests(max_requests)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            cache: (max_cache_size > 0).then(|| Cache::new(max_cache_size)),
            reader,
        });

        let mut workers = Vec::new();
        if nr_threads > 0 && max_requests > 0 {
            for i in 0..nr_threads {
                let shared = Arc::clone(&shared);
                let handle = std::thread::Builder::new()
                    .name(format!("oni-worker-{}", i))
                    .spawn(move || worker_loop(shared))?;
                workers.push(handle);
            }
        }

        info!(
            "server up: {} workers, {} queue slots, {} cache bytes",
            workers.len(),
            max_requests,
            max_cache_size
        );
        Ok(Self { shared, workers })
    }

    /// Hand a connection to the server. Queued for the workers when a pool
    /// exists, serviced in the caller's thread otherwise. Blocks while the
    /// queue is full.
    pub fn request(&self, conn: C) {
        if self.workers.is_empty() {
            self.shared.service(conn);
        } else {
            self.shared.add_request(conn);
        }
    }

    /// Shut down: signal the workers, join them, and drop shared state.
    /// Requests still queued are abandoned.
    pub fn exit(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            // The flag must flip under the ring mutex so a worker between
            // its predicate check and its wait cannot miss the broadcast.
            let mut ring = self.shared.ring.lock().unwrap();
            if ring.exiting {
                return;
            }
            ring.exiting = true;
        }
        self.shared.not_empty.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("server down");
    }
}

impl<C: Connection, R: FileReader> Drop for Server<C, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<C: Connection, R: FileReader>(shared: Arc<Shared<C, R>>) {
    while let Some(conn) = shared.take_request() {
        shared.service(conn);
    }
    debug!("worker exiting");
}
