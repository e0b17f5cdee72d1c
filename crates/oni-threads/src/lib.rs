//! User-level cooperative thread library
//!
//! A cooperative scheduler over swappable execution contexts: a FIFO ready
//! queue whose head is the running thread, deferred reclamation of exited
//! stacks through an exit queue, wait queues with sleep/wakeup, join, locks,
//! and condition variables. Threads run until they yield, sleep, or exit;
//! there is no preemption.
//!
//! The runtime is a process-wide singleton. Call [`threading::init`] from
//! the thread that should become thread 0, then [`threading::spawn`] to add
//! more.
//!
//! ```no_run
//! use oni_threads::threading::{self, Target};
//!
//! threading::init();
//! let tid = threading::spawn(|| {
//!     println!("hello from thread {}", threading::current());
//! })
//! .unwrap();
//! threading::yield_to(Target::Id(tid)).unwrap();
//! ```

pub mod config;
pub mod context;
pub mod interrupts;
pub mod sync;
pub mod threading;

pub use sync::{Cv, Lock};
pub use threading::{Target, ThreadError, Tid, WaitQueue};
