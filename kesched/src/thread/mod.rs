//! Thread abstraction.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with its
//! own stack and local state. Exactly one thread is *running* at any time.
//! Every other thread is in exactly one place:
//!
//! | [`ThreadStatus`] | Where the thread is                                   |
//! |------------------|-------------------------------------------------------|
//! | `Ready`          | the ready queue                                       |
//! | `Blocked`        | the sleep queue, the wait list of one semaphore, lock |
//! |                  | or condition variable, or parked by [`Kernel::block`] |
//! | `Dying`          | nowhere; reclaimed after the switch away from it      |
//!
//! Threads are identified by a [`Tid`] that is never reused. The kernel keeps
//! the thread control blocks in a table keyed by [`Tid`]. Every cross
//! reference (lock holder, donor, waiter) is a [`Tid`] into that table, never
//! a pointer.
//!
//! ## Priorities
//!
//! A thread has a *base* priority, set at creation or through
//! [`Kernel::set_priority`], and an *effective* priority, which is the base
//! raised by donations (see [`sync`](crate::sync)). The scheduler only
//! looks at the effective priority. Larger numbers mean higher priority.
pub mod mlfqs;
pub mod scheduler;
pub mod sleep;

use crate::{
    KernelError,
    fixed_point::FixedPoint,
    kernel::{Kernel, KernelState, Then},
    sync::ObjectId,
};
use abyss::ThreadFn;
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::Ordering;

/// A thread identifier.
pub type Tid = u64;

/// A thread priority, between [`PRI_MIN`] and [`PRI_MAX`].
pub type Priority = u8;

/// Lowest priority.
pub const PRI_MIN: Priority = 0;
/// Default priority.
pub const PRI_DEFAULT: Priority = 31;
/// Highest priority.
pub const PRI_MAX: Priority = 63;

/// Lowest niceness.
pub const NICE_MIN: i32 = -20;
/// Default niceness.
pub const NICE_DEFAULT: i32 = 0;
/// Highest niceness.
pub const NICE_MAX: i32 = 20;

/// Thread magic to detect corruption of a thread control block.
pub const THREAD_MAGIC: usize = 0xdeadbeefcafebabe;

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadStatus {
    /// Thread is on the ready queue.
    Ready,
    /// Thread is running.
    Running,
    /// Thread waits for an event.
    Blocked,
    /// Thread has exited and waits to be reclaimed.
    Dying,
}

/// The one list that owns a thread that is not running.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub(crate) enum Residence {
    Running,
    ReadyQueue,
    SleepQueue,
    Semaphore(ObjectId),
    Lock(ObjectId),
    CondVar(ObjectId),
    /// Blocked through [`Kernel::block`]; only [`Kernel::unblock`] gets it
    /// out.
    Parked,
    /// The idle thread while it does not run, and dying threads.
    Nowhere,
}

/// A priority lent by `donor`, which waits on `lock`.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub(crate) struct Donation {
    pub donor: Tid,
    pub lock: ObjectId,
}

/// A thread control block.
pub(crate) struct Thread {
    pub tid: Tid,
    pub name: String,
    pub status: ThreadStatus,
    pub residence: Residence,
    pub base_priority: Priority,
    pub effective_priority: Priority,
    /// The lock this thread is blocked on.
    pub wait_on_lock: Option<ObjectId>,
    /// Priorities lent to this thread, one entry per waiting donor.
    pub donations: Vec<Donation>,
    pub wakeup_tick: u64,
    /// Arrival order in the ready queue.
    pub ready_seq: u64,
    pub nice: i32,
    pub recent_cpu: FixedPoint,
    magic: usize,
}

impl Thread {
    pub fn new(tid: Tid, name: &str, priority: Priority) -> Self {
        Self {
            tid,
            name: String::from(name),
            status: ThreadStatus::Blocked,
            residence: Residence::Nowhere,
            base_priority: priority,
            effective_priority: priority,
            wait_on_lock: None,
            donations: Vec::new(),
            wakeup_tick: 0,
            ready_seq: 0,
            nice: NICE_DEFAULT,
            recent_cpu: FixedPoint::ZERO,
            magic: THREAD_MAGIC,
        }
    }

    pub fn check_magic(&self) {
        if self.magic != THREAD_MAGIC {
            panic!(
                "Stack overflow detected! Thread {} ({}) has a corrupted control block.",
                self.tid, self.name
            );
        }
    }

    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            tid: self.tid,
            name: self.name.clone(),
            status: self.status,
            base_priority: self.base_priority,
            effective_priority: self.effective_priority,
            wait_on_lock: self.wait_on_lock,
            nice: self.nice,
            recent_cpu: (self.recent_cpu * 100).round(),
        }
    }
}

/// A snapshot of a thread, for debugging and for higher layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Thread id.
    pub tid: Tid,
    /// Thread name.
    pub name: String,
    /// State of the thread.
    pub status: ThreadStatus,
    /// Priority set by the thread itself.
    pub base_priority: Priority,
    /// Priority the scheduler uses.
    pub effective_priority: Priority,
    /// Id of the lock the thread is blocked on.
    pub wait_on_lock: Option<u64>,
    /// Niceness.
    pub nice: i32,
    /// 100 times the recent CPU usage, rounded to nearest.
    pub recent_cpu: i32,
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    kernel: Arc<Kernel>,
    name: String,
    priority: Priority,
}

impl ThreadBuilder {
    /// Sets the priority of the new thread. Defaults to [`PRI_DEFAULT`].
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Spawns the thread. The thread exits when `thread_fn` returns.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> Result<Tid, KernelError> {
        self.kernel.create(&self.name, self.priority, thread_fn)
    }
}

impl Kernel {
    /// Creates a thread builder for thread `name`.
    pub fn thread<I>(self: &Arc<Self>, name: I) -> ThreadBuilder
    where
        String: From<I>,
    {
        ThreadBuilder {
            kernel: self.clone(),
            name: String::from(name),
            priority: PRI_DEFAULT,
        }
    }

    /// Creates a ready thread named `name` that runs `entry`.
    ///
    /// The new thread preempts the caller right away if its priority is
    /// higher. Under MLFQS, `priority` is ignored: the thread inherits the
    /// niceness and recent CPU usage of its creator and gets the priority
    /// they yield.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `priority` exceeds [`PRI_MAX`].
    /// - [`KernelError::NoMemory`] if the thread context cannot be allocated.
    pub fn create<F>(self: &Arc<Self>, name: &str, priority: Priority, entry: F) -> Result<Tid, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        if priority > PRI_MAX {
            return Err(KernelError::InvalidArgument);
        }
        let tid = self.next_tid.fetch_add(1, Ordering::SeqCst);
        let kernel = Arc::downgrade(self);
        let body: ThreadFn = Box::new(move || {
            entry();
            if let Some(kernel) = kernel.upgrade() {
                kernel.exit();
            }
        });
        self.cpu.prepare(tid, name, body).map_err(|e| {
            log::warn!("Thread: cannot create `{name}`: {e}.");
            KernelError::NoMemory
        })?;

        self.atomically(|state| {
            let mut th = Thread::new(tid, name, priority);
            if state.mlfqs.is_some() {
                let parent = state.running();
                th.nice = parent.nice;
                th.recent_cpu = parent.recent_cpu;
                let priority = mlfqs::priority_of(th.recent_cpu, th.nice);
                th.base_priority = priority;
                th.effective_priority = priority;
            }
            log::debug!(
                "Thread: create {tid} (`{name}`) with priority {}.",
                th.effective_priority
            );
            state.threads.insert(tid, th);
            state.make_ready(tid);
            (Ok(tid), Then::Preempt)
        })
    }

    /// Returns the id of the running thread.
    pub fn current(&self) -> Tid {
        self.inspect(|state| state.running().tid)
    }

    /// Blocks the running thread until [`Kernel::unblock`] is called on it.
    ///
    /// Fatal inside an interrupt handler.
    pub fn block(&self) {
        self.atomically(|state| {
            let residence = if Some(state.current) == state.idle {
                Residence::Nowhere
            } else {
                Residence::Parked
            };
            state.block_current(residence);
            ((), Then::Reschedule)
        })
    }

    /// Makes a thread blocked by [`Kernel::block`] ready again.
    ///
    /// Preempts the caller if the unblocked thread has a higher priority.
    ///
    /// # Errors
    /// - [`KernelError::NoSuchThread`] if `tid` names no live thread.
    /// - [`KernelError::OperationNotPermitted`] if the thread was not blocked
    ///   through [`Kernel::block`].
    pub fn unblock(&self, tid: Tid) -> Result<(), KernelError> {
        self.atomically(|state| match state.threads.get(&tid) {
            None => (Err(KernelError::NoSuchThread), Then::Continue),
            Some(th) if th.residence != Residence::Parked => {
                (Err(KernelError::OperationNotPermitted), Then::Continue)
            }
            Some(_) => {
                state.make_ready(tid);
                (Ok(()), Then::Preempt)
            }
        })
    }

    /// Gives up the CPU. The running thread goes to the back of its priority
    /// level and runs again when it is the best choice.
    pub fn yield_now(&self) {
        self.atomically(|_| ((), Then::Yield))
    }

    /// Terminates the running thread.
    ///
    /// Locks still held by the thread are released on its behalf. The
    /// thread's context is reclaimed once another thread runs.
    pub fn exit(&self) {
        self.atomically(|state| {
            let tid = state.current;
            assert!(Some(tid) != state.idle, "The idle thread cannot exit.");
            let held: Vec<ObjectId> = state
                .locks
                .iter()
                .filter(|(_, lock)| lock.holder == Some(tid))
                .map(|(id, _)| *id)
                .collect();
            for lock in held {
                log::warn!("Thread: {tid} exits while holding lock {lock}.");
                state.release_lock(tid, lock);
            }
            let th = state.running_mut();
            th.status = ThreadStatus::Dying;
            th.residence = Residence::Nowhere;
            log::debug!("Thread: {tid} (`{}`) exits.", th.name);
            ((), Then::Reschedule)
        })
    }

    /// Returns the effective priority of the running thread.
    pub fn get_priority(&self) -> Priority {
        self.inspect(|state| state.running().effective_priority)
    }

    /// Sets the base priority of the running thread.
    ///
    /// The effective priority stays raised while donations exceed the new
    /// base. Yields if another ready thread now has a higher priority.
    /// Ignored under MLFQS.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] if `priority` exceeds [`PRI_MAX`].
    pub fn set_priority(&self, priority: Priority) -> Result<(), KernelError> {
        if priority > PRI_MAX {
            return Err(KernelError::InvalidArgument);
        }
        self.atomically(|state| {
            if state.mlfqs.is_some() {
                return (Ok(()), Then::Continue);
            }
            let tid = state.current;
            state.thread_mut(tid).base_priority = priority;
            crate::sync::donation::propagate(state, tid);
            (Ok(()), Then::Preempt)
        })
    }

    /// Returns a snapshot of thread `tid`, or `None` once it has been
    /// reclaimed.
    pub fn thread_info(&self, tid: Tid) -> Option<ThreadInfo> {
        self.inspect(|state| state.threads.get(&tid).map(Thread::info))
    }

    /// Returns the status of thread `tid`, or `None` once it has been
    /// reclaimed.
    pub fn status(&self, tid: Tid) -> Option<ThreadStatus> {
        self.inspect(|state| state.threads.get(&tid).map(|th| th.status))
    }
}

impl KernelState {
    pub(crate) fn thread(&self, tid: Tid) -> &Thread {
        self.threads
            .get(&tid)
            .unwrap_or_else(|| panic!("Thread: {tid} does not exist."))
    }

    pub(crate) fn thread_mut(&mut self, tid: Tid) -> &mut Thread {
        self.threads
            .get_mut(&tid)
            .unwrap_or_else(|| panic!("Thread: {tid} does not exist."))
    }

    /// The running thread, checked for corruption.
    pub(crate) fn running(&self) -> &Thread {
        let th = self.thread(self.current);
        th.check_magic();
        th
    }

    pub(crate) fn running_mut(&mut self) -> &mut Thread {
        let th = self.thread_mut(self.current);
        th.check_magic();
        th
    }

    /// Moves the running thread off the CPU into `residence`. The caller
    /// must reschedule.
    pub(crate) fn block_current(&mut self, residence: Residence) {
        let th = self.running_mut();
        th.status = ThreadStatus::Blocked;
        th.residence = residence;
    }

    /// Index of the first thread of highest effective priority in `tids`.
    pub(crate) fn highest_priority(&self, tids: impl Iterator<Item = Tid>) -> Option<usize> {
        let mut best: Option<(usize, Priority)> = None;
        for (idx, tid) in tids.enumerate() {
            let priority = self.thread(tid).effective_priority;
            if best.is_none_or(|(_, p)| priority > p) {
                best = Some((idx, priority));
            }
        }
        best.map(|(idx, _)| idx)
    }
}
