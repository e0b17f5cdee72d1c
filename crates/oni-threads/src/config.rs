//! Runtime configuration constants
//!
//! This module contains tunable parameters for the thread runtime.
//! Modify these values to adjust runtime behavior.

/// Maximum number of live threads
///
/// Total number of thread id slots. Thread 0 is the initial thread that
/// called [`crate::threading::init`] and runs on the host stack.
pub const MAX_THREADS: usize = 1024;

/// Minimum per-thread stack size (32KB)
///
/// Every spawned thread gets a stack of at least this many bytes.
/// WARNING: May overflow with deep recursion or large stack frames;
/// formatting machinery alone can use several KB per frame.
pub const MIN_STACK: usize = 32 * 1024;

/// Stack alignment required by both supported architectures
///
/// The context bootstrap rounds the stack top down to this boundary.
pub const STACK_ALIGN: usize = 16;
