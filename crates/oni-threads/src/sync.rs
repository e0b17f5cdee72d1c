//! Locks and condition variables
//!
//! Built on the runtime's wait queues. On a cooperative uniprocessor the
//! check-then-sleep sequences below are atomic as long as the interrupt gate
//! is masked: no other thread can run until the caller explicitly switches.

use std::sync::Arc;

use log::trace;
use spinning_top::Spinlock;

use crate::interrupts;
use crate::threading::{self, Tid, WaitQueue};

// ============================================================================
// Lock
// ============================================================================

struct LockState {
    /// Holder id; meaningful only while the lock is held.
    holder: Option<Tid>,
    waiters: WaitQueue,
}

/// Mutual exclusion between threads of the runtime. Cloning yields another
/// handle to the same lock.
#[derive(Clone)]
pub struct Lock {
    inner: Arc<Spinlock<LockState>>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Spinlock::new(LockState {
                holder: None,
                waiters: WaitQueue::new(),
            })),
        }
    }

    /// Block until the lock is held by the caller. The lock is not
    /// reentrant: acquiring it twice from the same thread deadlocks.
    pub fn acquire(&self) {
        let prev = interrupts::disable();
        loop {
            let waiters = {
                let mut state = self.inner.lock();
                match state.holder {
                    None => {
                        state.holder = Some(threading::current());
                        None
                    }
                    Some(holder) => {
                        debug_assert_ne!(
                            holder,
                            threading::current(),
                            "lock acquired twice by the same thread"
                        );
                        Some(state.waiters.clone())
                    }
                }
            };
            match waiters {
                None => break,
                Some(wq) => {
                    trace!("lock contended, sleeping");
                    // Woken threads re-contend; the loop re-checks the
                    // holder before claiming.
                    let _ = threading::sleep(&wq);
                }
            }
        }
        interrupts::restore(prev);
    }

    /// Release the lock and wake every waiter; they re-contend for it.
    pub fn release(&self) {
        let prev = interrupts::disable();
        let waiters = {
            let mut state = self.inner.lock();
            debug_assert_eq!(
                state.holder,
                Some(threading::current()),
                "lock released by a thread that does not hold it"
            );
            state.holder = None;
            state.waiters.clone()
        };
        threading::wakeup(&waiters, true);
        interrupts::restore(prev);
    }

    /// Whether the calling thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        let prev = interrupts::disable();
        let held = self.inner.lock().holder == Some(threading::current());
        interrupts::restore(prev);
        held
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Lock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lock")
            .field("holder", &self.inner.lock().holder)
            .finish()
    }
}

// ============================================================================
// Condition variable
// ============================================================================

/// Condition variable tied to a [`Lock`] at each call site. Cloning yields
/// another handle to the same variable.
#[derive(Clone, Default)]
pub struct Cv {
    waiters: WaitQueue,
}

impl Cv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically release `lock` and block until signaled; reacquires the
    /// lock before returning. The caller must hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        let prev = interrupts::disable();
        debug_assert!(lock.held_by_current(), "cv wait without holding the lock");
        // No switch can occur between the release and the sleep, so a signal
        // sent after the release cannot be lost.
        lock.release();
        let _ = threading::sleep(&self.waiters);
        lock.acquire();
        interrupts::restore(prev);
    }

    /// Wake one waiter. The caller must hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        let prev = interrupts::disable();
        debug_assert!(lock.held_by_current(), "cv signal without holding the lock");
        threading::wakeup(&self.waiters, false);
        interrupts::restore(prev);
    }

    /// Wake every waiter. The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        let prev = interrupts::disable();
        debug_assert!(
            lock.held_by_current(),
            "cv broadcast without holding the lock"
        );
        threading::wakeup(&self.waiters, true);
        interrupts::restore(prev);
    }

    /// Number of threads currently blocked on this variable.
    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }
}

impl core::fmt::Debug for Cv {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cv").field("waiters", &self.waiters.len()).finish()
    }
}
