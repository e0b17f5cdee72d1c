//! Software interrupt gate
//!
//! The runtime is uniprocessor-cooperative: the only critical-section
//! primitive it needs is an enable/disable pair that returns the previous
//! state. Every public runtime operation saves the prior state on entry and
//! restores it on every exit path; the thread trampoline re-enables the gate
//! before user code runs.

use core::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Mask the gate. Returns the previous state.
pub fn disable() -> bool {
    ENABLED.swap(false, Ordering::Acquire)
}

/// Unmask the gate. Returns the previous state.
pub fn enable() -> bool {
    ENABLED.swap(true, Ordering::Release)
}

/// Restore a state previously returned by [`disable`] or [`enable`].
pub fn restore(prev: bool) {
    ENABLED.store(prev, Ordering::Release);
}

/// Current gate state.
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}
