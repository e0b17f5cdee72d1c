//! Cooperative thread runtime
//!
//! Single-threaded cooperative scheduling on one host thread. A thread runs
//! until it yields, sleeps, or exits. The ready queue is FIFO; its head is
//! the running thread. All scheduler state lives behind one spinlock and is
//! only mutated with the interrupt gate masked; the context switch itself
//! happens after the guard is dropped, through raw context pointers captured
//! under the lock.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace};
use spinning_top::Spinlock;

use crate::config::{MAX_THREADS, MIN_STACK};
use crate::context::{Context, oni_switch_context};
use crate::interrupts;

/// Thread identifier. Ids are small integers in `[0, MAX_THREADS)` and are
/// reused once their previous owner has been reaped.
pub type Tid = usize;

// ============================================================================
// Errors
// ============================================================================

/// Thread runtime error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// The id table is saturated
    NoMoreIds,
    /// A stack or descriptor allocation failed
    NoMemory,
    /// The named thread does not exist, is not eligible, or is the caller
    /// where the caller is disallowed
    Invalid,
    /// Nothing to switch to: the caller is the only ready thread
    NoneReady,
    /// The runtime has not been initialized
    Failed,
}

impl core::fmt::Display for ThreadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ThreadError::NoMoreIds => write!(f, "No thread ids left"),
            ThreadError::NoMemory => write!(f, "Out of memory"),
            ThreadError::Invalid => write!(f, "Invalid thread"),
            ThreadError::NoneReady => write!(f, "No other ready thread"),
            ThreadError::Failed => write!(f, "Thread runtime not initialized"),
        }
    }
}

impl std::error::Error for ThreadError {}

// ============================================================================
// Wait queues
// ============================================================================

/// FIFO queue of blocked threads, tied to a lock, condition variable, or
/// join target. Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct WaitQueue {
    inner: Arc<Spinlock<VecDeque<Tid>>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, tid: Tid) {
        self.inner.lock().push_back(tid);
    }

    /// Remove one (`all == false`) or every (`all == true`) waiter, FIFO.
    fn take(&self, all: bool) -> Vec<Tid> {
        let mut q = self.inner.lock();
        if all {
            q.drain(..).collect()
        } else {
            q.pop_front().into_iter().collect()
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl core::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitQueue").field("len", &self.len()).finish()
    }
}

// ============================================================================
// Thread descriptors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Blocked,
    Exited,
}

/// Per-thread descriptor. Owned by the id table while the id is live, then
/// by the exit queue until the next reaper pass.
struct Thread {
    id: Tid,
    state: ThreadState,
    ctx: Context,
    /// Owned stack region; `None` for thread 0, which runs on the host stack.
    _stack: Option<Box<[u8]>>,
    /// User entry, taken by the trampoline on first scheduling. A thread
    /// killed before it ever ran drops this without calling it.
    entry: Option<Box<dyn FnOnce() + Send>>,
    /// Threads waiting in `join` for this thread to exit.
    joiners: WaitQueue,
}

impl Thread {
    /// Transition to `state`, except that `Exited` is terminal and is never
    /// overwritten.
    fn set_state(&mut self, state: ThreadState) {
        if self.state != ThreadState::Exited {
            self.state = state;
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

struct Scheduler {
    /// Runnable threads, FIFO; the head is the running thread.
    ready: VecDeque<Tid>,
    /// Id table: a slot is `Some` iff a live descriptor holds that id.
    slots: Vec<Option<Box<Thread>>>,
    /// Exited descriptors awaiting reclamation. A thread never frees the
    /// stack it is executing on; the next thread to resume drains this.
    exit_queue: VecDeque<Box<Thread>>,
}

impl Scheduler {
    fn new() -> Self {
        let mut slots: Vec<Option<Box<Thread>>> = Vec::with_capacity(MAX_THREADS);
        slots.resize_with(MAX_THREADS, || None);
        slots[0] = Some(Box::new(Thread {
            id: 0,
            state: ThreadState::Running,
            ctx: Context::zero(),
            _stack: None,
            entry: None,
            joiners: WaitQueue::new(),
        }));

        let mut ready = VecDeque::new();
        ready.push_back(0);

        Scheduler {
            ready,
            slots,
            exit_queue: VecDeque::new(),
        }
    }

    fn running(&self) -> Tid {
        self.ready[0]
    }

    fn lowest_free_id(&self) -> Option<Tid> {
        self.slots.iter().position(|s| s.is_none())
    }

    fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.slots.get_mut(tid)?.as_deref_mut()
    }

    /// Free every descriptor parked on the exit queue. Runs on the resume
    /// path of every context switch, so the stacks being freed are never the
    /// one currently executing.
    fn reap(&mut self) {
        while let Some(th) = self.exit_queue.pop_front() {
            trace!("reaped thread {}", th.id);
            drop(th);
        }
    }

    /// Raw context pointers for a switch from the running thread to the new
    /// head of the ready queue. The pointers stay valid across the guard
    /// drop: descriptors are boxed and only the reaper frees them.
    fn switch_ptrs(&mut self, old: Tid) -> (*mut Context, *const Context) {
        let next = self.ready[0];
        trace!("switch: {} -> {}", old, next);
        let old_ptr: *mut Context = &mut self
            .thread_mut(old)
            .expect("switching thread has a descriptor")
            .ctx;
        let new_ptr: *const Context = &self
            .thread_mut(next)
            .expect("switch target has a descriptor")
            .ctx;
        (old_ptr, new_ptr)
    }
}

static SCHEDULER: Spinlock<Option<Scheduler>> = Spinlock::new(None);

// ============================================================================
// Resume path
// ============================================================================

/// Bookkeeping common to every return from a context switch: drain the exit
/// queue, then either die (the thread was killed while off-CPU) or mark the
/// thread running again.
fn resume_current() {
    let killed = {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().expect("scheduler initialized");
        sched.reap();
        let cur = sched.running();
        let th = sched.thread_mut(cur).expect("running thread has a descriptor");
        if th.state == ThreadState::Exited {
            true
        } else {
            th.state = ThreadState::Running;
            false
        }
    };
    if killed {
        exit();
    }
}

/// Rust-level entry for every spawned thread. The assembly stub forwards the
/// two parameter slots placed in the context at bootstrap; the first carries
/// the thread id, the second is reserved.
extern "C" fn thread_trampoline(tid: usize, _reserved: usize) -> ! {
    let entry = {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().expect("scheduler initialized");
        sched.reap();
        let th = sched.thread_mut(tid).expect("new thread has a descriptor");
        if th.state == ThreadState::Exited {
            // Killed before it ever ran; the entry is dropped unexecuted.
            None
        } else {
            th.state = ThreadState::Running;
            th.entry.take()
        }
    };

    // A new thread starts with the gate open; the switch that got us here
    // always completes inside a masked region.
    interrupts::enable();

    if let Some(f) = entry {
        f();
    }
    exit();
}

// ============================================================================
// Public operations
// ============================================================================

/// Targets accepted by [`yield_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The next thread in FIFO order.
    Any,
    /// The caller itself (no switch).
    Current,
    /// The named thread, moved to the head of the ready queue.
    Id(Tid),
}

/// Turn the calling host thread into thread 0 of a fresh runtime.
///
/// Any previous runtime instance is discarded, along with every descriptor
/// it still owned.
pub fn init() {
    let prev = interrupts::disable();
    {
        let mut guard = SCHEDULER.lock();
        *guard = Some(Scheduler::new());
    }
    debug!("thread runtime initialized");
    interrupts::restore(prev);
}

/// Id of the calling thread.
///
/// # Panics
///
/// Panics if the runtime has not been initialized.
pub fn current() -> Tid {
    let prev = interrupts::disable();
    let tid = SCHEDULER
        .lock()
        .as_ref()
        .expect("thread runtime not initialized")
        .running();
    interrupts::restore(prev);
    tid
}

/// Spawn a new thread running `f`, placed at the tail of the ready queue.
///
/// `Send` is required because any host thread driving the runtime may be
/// the one that first enters the new thread.
pub fn spawn<F>(f: F) -> Result<Tid, ThreadError>
where
    F: FnOnce() + Send + 'static,
{
    let prev = interrupts::disable();
    let result = spawn_inner(Box::new(f));
    interrupts::restore(prev);
    result
}

fn spawn_inner(entry: Box<dyn FnOnce() + Send>) -> Result<Tid, ThreadError> {
    let mut guard = SCHEDULER.lock();
    let sched = guard.as_mut().ok_or(ThreadError::Failed)?;
    let id = sched.lowest_free_id().ok_or(ThreadError::NoMoreIds)?;

    let mut stack: Vec<u8> = Vec::new();
    stack
        .try_reserve_exact(MIN_STACK)
        .map_err(|_| ThreadError::NoMemory)?;
    stack.resize(MIN_STACK, 0);
    let mut stack = stack.into_boxed_slice();

    let stack_top = stack.as_mut_ptr() as usize + stack.len();
    // SAFETY: stack_top bounds the freshly allocated stack above; the boxed
    // slice moves into the descriptor below without changing the heap
    // address the context points into.
    let ctx = unsafe { Context::bootstrap(stack_top, thread_trampoline, id, 0) };

    sched.slots[id] = Some(Box::new(Thread {
        id,
        state: ThreadState::Ready,
        ctx,
        _stack: Some(stack),
        entry: Some(entry),
        joiners: WaitQueue::new(),
    }));
    sched.ready.push_back(id);
    debug!("spawned thread {}", id);
    Ok(id)
}

/// Give up the CPU to `target`. On return the caller is running again.
///
/// Returns the id of the thread that was switched to (the caller's own id
/// for [`Target::Current`]).
pub fn yield_to(target: Target) -> Result<Tid, ThreadError> {
    let prev = interrupts::disable();
    let result = yield_inner(target);
    interrupts::restore(prev);
    result
}

fn yield_inner(target: Target) -> Result<Tid, ThreadError> {
    let (old_ptr, new_ptr, want) = {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().ok_or(ThreadError::Failed)?;
        let cur = sched.running();

        let want = match target {
            Target::Current => return Ok(cur),
            Target::Id(tid) if tid == cur => return Ok(cur),
            Target::Any => {
                if sched.ready.len() == 1 {
                    return Err(ThreadError::NoneReady);
                }
                sched.ready[1]
            }
            Target::Id(tid) => {
                let pos = sched
                    .ready
                    .iter()
                    .position(|&t| t == tid)
                    .ok_or(ThreadError::Invalid)?;
                let _ = sched.ready.remove(pos);
                sched.ready.push_front(tid);
                // cur sits at index 1 now; the rotation below moves it to
                // the tail, leaving every other thread in relative order.
                sched.ready.swap(0, 1);
                tid
            }
        };

        // Rotate: head to tail, next thread becomes the new head.
        let cur = sched.ready.pop_front().expect("ready queue nonempty");
        sched.ready.push_back(cur);
        debug_assert_eq!(sched.ready[0], want);

        sched
            .thread_mut(cur)
            .expect("running thread has a descriptor")
            .set_state(ThreadState::Ready);
        let ptrs = sched.switch_ptrs(cur);
        (ptrs.0, ptrs.1, want)
    };

    // SAFETY: both pointers were captured under the scheduler lock and point
    // into boxed descriptors that only the reaper frees; neither thread can
    // be reaped while one is running and the other is ready.
    unsafe { oni_switch_context(old_ptr, new_ptr) };
    resume_current();
    Ok(want)
}

/// Terminate the calling thread, releasing its id. The descriptor and stack
/// are parked on the exit queue and freed by the next thread to run. If the
/// caller was the last thread, the process exits.
pub fn exit() -> ! {
    let _ = interrupts::disable();
    let (old_ptr, new_ptr) = {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().expect("thread runtime not initialized");
        let cur = sched.ready.pop_front().expect("ready queue nonempty");
        let mut th = sched.slots[cur].take().expect("exiting thread has a descriptor");
        th.state = ThreadState::Exited;
        debug!("thread {} exiting", cur);

        // Unblock anyone joining on us before the id disappears.
        for tid in th.joiners.take(true) {
            if let Some(j) = sched.thread_mut(tid) {
                j.set_state(ThreadState::Ready);
                sched.ready.push_back(tid);
            }
        }

        sched.exit_queue.push_back(th);

        if sched.ready.is_empty() {
            sched.reap();
            drop(guard);
            debug!("last thread exited");
            std::process::exit(0);
        }

        let old_ptr: *mut Context = &mut sched
            .exit_queue
            .back_mut()
            .expect("descriptor just parked")
            .ctx;
        let next = sched.ready[0];
        let new_ptr: *const Context = &sched
            .thread_mut(next)
            .expect("switch target has a descriptor")
            .ctx;
        (old_ptr, new_ptr)
    };

    // SAFETY: the old context lives in the exit queue until another thread
    // runs; the switch never returns here.
    unsafe { oni_switch_context(old_ptr, new_ptr) };
    unreachable!("exited thread resumed");
}

/// Mark `tid` for termination. The victim dies at its next scheduling point;
/// this call itself never switches. Killing the caller is refused.
pub fn kill(tid: Tid) -> Result<Tid, ThreadError> {
    let prev = interrupts::disable();
    let result = {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().ok_or(ThreadError::Failed)?;
        if tid == sched.running() {
            Err(ThreadError::Invalid)
        } else {
            match sched.thread_mut(tid) {
                Some(th) => {
                    th.state = ThreadState::Exited;
                    debug!("thread {} marked for termination", tid);
                    Ok(tid)
                }
                None => Err(ThreadError::Invalid),
            }
        }
    };
    interrupts::restore(prev);
    result
}

/// Block the calling thread on `wq` and switch to the next ready thread.
///
/// Returns the id of the thread that was switched to.
pub fn sleep(wq: &WaitQueue) -> Result<Tid, ThreadError> {
    let prev = interrupts::disable();
    let result = sleep_inner(wq);
    interrupts::restore(prev);
    result
}

fn sleep_inner(wq: &WaitQueue) -> Result<Tid, ThreadError> {
    let (old_ptr, new_ptr, next) = {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().ok_or(ThreadError::Failed)?;
        if sched.ready.len() == 1 {
            return Err(ThreadError::NoneReady);
        }
        let cur = sched.ready.pop_front().expect("ready queue nonempty");
        sched
            .thread_mut(cur)
            .expect("running thread has a descriptor")
            .set_state(ThreadState::Blocked);
        wq.push(cur);
        let next = sched.ready[0];
        let ptrs = sched.switch_ptrs(cur);
        (ptrs.0, ptrs.1, next)
    };

    // SAFETY: see yield_inner; a blocked thread's descriptor stays in the id
    // table until it exits.
    unsafe { oni_switch_context(old_ptr, new_ptr) };
    resume_current();
    Ok(next)
}

/// Move one (`all == false`) or every (`all == true`) thread from `wq` back
/// to the tail of the ready queue. Returns the number of threads woken.
pub fn wakeup(wq: &WaitQueue, all: bool) -> usize {
    let prev = interrupts::disable();
    let woken = {
        let mut guard = SCHEDULER.lock();
        match guard.as_mut() {
            None => 0,
            Some(sched) => {
                let mut count = 0;
                for tid in wq.take(all) {
                    if let Some(th) = sched.thread_mut(tid) {
                        th.set_state(ThreadState::Ready);
                        sched.ready.push_back(tid);
                        count += 1;
                    }
                }
                count
            }
        }
    };
    interrupts::restore(prev);
    woken
}

/// Block until thread `tid` exits. Joining the caller itself or a dead id
/// is refused.
pub fn join(tid: Tid) -> Result<Tid, ThreadError> {
    let prev = interrupts::disable();
    let result = (|| {
        let wq = {
            let mut guard = SCHEDULER.lock();
            let sched = guard.as_mut().ok_or(ThreadError::Failed)?;
            if tid == sched.running() {
                return Err(ThreadError::Invalid);
            }
            sched
                .thread_mut(tid)
                .map(|th| th.joiners.clone())
                .ok_or(ThreadError::Invalid)?
        };
        // Nothing can run between registering and sleeping: the gate is
        // masked and this thread does not switch until sleep_inner.
        sleep_inner(&wq)?;
        Ok(tid)
    })();
    interrupts::restore(prev);
    result
}

// ============================================================================
// Introspection
// ============================================================================

/// Snapshot of runtime counters, mostly useful in tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Live descriptors (ids in use).
    pub live: usize,
    /// Threads in the ready queue, including the running one.
    pub ready: usize,
    /// Descriptors parked for deferred reclamation.
    pub exit_pending: usize,
}

/// Counters for the current runtime instance.
///
/// # Panics
///
/// Panics if the runtime has not been initialized.
pub fn stats() -> Stats {
    let prev = interrupts::disable();
    let stats = {
        let guard = SCHEDULER.lock();
        let sched = guard.as_ref().expect("thread runtime not initialized");
        Stats {
            live: sched.slots.iter().filter(|s| s.is_some()).count(),
            ready: sched.ready.len(),
            exit_pending: sched.exit_queue.len(),
        }
    };
    interrupts::restore(prev);
    stats
}
