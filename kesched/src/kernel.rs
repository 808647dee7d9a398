//! The kernel object.
//!
//! A [`Kernel`] owns every piece of scheduler state: the thread table, the
//! ready and sleep queues, the synchronization objects, and the MLFQS
//! counters. All of it sits behind one spinlock that is only taken with
//! interrupts disabled. On a single CPU that makes every operation atomic
//! with respect to the timer interrupt.
//!
//! Every operation is one *critical section*:
//!
//! 1. disable interrupts and lock the state,
//! 2. mutate the state, and decide whether the running thread keeps the CPU
//!    (see [`Then`]),
//! 3. unlock the state and, if needed, switch threads with interrupts still
//!    disabled,
//! 4. once this thread runs again, restore the interrupt state it had.
//!
//! Critical sections do not nest. Re-entering one, e.g. from a [`Cpu`]
//! callback, is a fatal error.
use crate::{
    KernelError,
    config::{SchedulingPolicy, SystemConfiguration},
    sync::{CondvarState, LockState, ObjectId, SemaphoreState},
    thread::{
        PRI_DEFAULT, PRI_MIN, Residence, Thread, ThreadStatus, Tid, mlfqs::Mlfqs,
        scheduler::ReadyQueue, sleep::SleepQueue,
    },
};
use abyss::{Cpu, InterruptController, SpinLock, SpinLockGuard, TickCounter};
use alloc::{
    boxed::Box,
    collections::BTreeMap,
    sync::{Arc, Weak},
};
use core::sync::atomic::{AtomicU64, Ordering};
use crossbeam_queue::SegQueue;

/// Tick statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Ticks spent in the idle thread.
    pub idle_ticks: u64,
    /// Ticks spent in other threads.
    pub kernel_ticks: u64,
    /// Number of context switches.
    pub context_switches: u64,
}

/// What the running thread does once a critical section's mutation is done.
pub(crate) enum Then {
    /// Keep running.
    Continue,
    /// The running thread left the CPU; pick another one.
    Reschedule,
    /// Hand the CPU to a ready thread of strictly higher priority, if any.
    Preempt,
    /// Hand the CPU to any ready thread of at least the same priority.
    Yield,
}

/// A context switch decided inside a critical section.
pub(crate) struct Switch {
    pub prev: Tid,
    pub next: Tid,
    /// The control block of `prev` if it has exited.
    pub dead: Option<Thread>,
}

/// Scheduler state protected by the kernel's spinlock.
pub(crate) struct KernelState {
    pub threads: BTreeMap<Tid, Thread>,
    pub current: Tid,
    pub idle: Option<Tid>,
    pub ready: ReadyQueue,
    pub sleepers: SleepQueue,
    pub semaphores: BTreeMap<ObjectId, SemaphoreState>,
    pub locks: BTreeMap<ObjectId, LockState>,
    pub condvars: BTreeMap<ObjectId, CondvarState>,
    /// `Some` under MLFQS.
    pub mlfqs: Option<Mlfqs>,
    pub donation: bool,
    /// Ticks the running thread has spent of its time slice.
    pub slice: u64,
    pub stats: KernelStats,
}

/// A single-CPU kernel: its threads, its scheduler and its synchronization
/// objects.
pub struct Kernel {
    pub(crate) config: SystemConfiguration,
    pub(crate) interrupts: InterruptController,
    pub(crate) ticks: TickCounter,
    pub(crate) cpu: Box<dyn Cpu>,
    pub(crate) next_tid: AtomicU64,
    pub(crate) next_object: AtomicU64,
    state: SpinLock<KernelState>,
    graveyard: SegQueue<Thread>,
}

impl Kernel {
    /// Boots a kernel on `cpu`.
    ///
    /// The calling context becomes thread `main`, running at
    /// [`PRI_DEFAULT`]. Interrupts stay disabled until [`Kernel::start`].
    pub fn boot(config: SystemConfiguration, cpu: impl Cpu + 'static) -> Arc<Kernel> {
        log::info!(
            "Scheduler: boot with {:?} policy (donation {}, time slice {}, {} Hz).",
            config.policy(),
            if config.priority_donation() { "on" } else { "off" },
            config.time_slice(),
            config.timer_freq()
        );
        let main_tid = 1;
        let mlfqs = (config.policy() == SchedulingPolicy::Mlfqs).then(Mlfqs::default);
        let mut main = Thread::new(main_tid, "main", PRI_DEFAULT);
        if mlfqs.is_some() {
            let priority = crate::thread::mlfqs::priority_of(main.recent_cpu, main.nice);
            main.base_priority = priority;
            main.effective_priority = priority;
        }
        main.status = ThreadStatus::Running;
        main.residence = Residence::Running;

        let mut threads = BTreeMap::new();
        threads.insert(main_tid, main);
        let state = KernelState {
            threads,
            current: main_tid,
            idle: None,
            ready: ReadyQueue::default(),
            sleepers: SleepQueue::default(),
            semaphores: BTreeMap::new(),
            locks: BTreeMap::new(),
            condvars: BTreeMap::new(),
            mlfqs,
            donation: config.priority_donation(),
            slice: 0,
            stats: KernelStats::default(),
        };
        Arc::new(Kernel {
            config,
            interrupts: InterruptController::new(),
            ticks: TickCounter::new(),
            cpu: Box::new(cpu),
            next_tid: AtomicU64::new(main_tid + 1),
            next_object: AtomicU64::new(1),
            state: SpinLock::new(state),
            graveyard: SegQueue::new(),
        })
    }

    /// Creates the idle thread and enables interrupts.
    ///
    /// # Errors
    /// [`KernelError::NoMemory`] if the idle thread's context cannot be
    /// allocated.
    pub fn start(self: &Arc<Self>) -> Result<(), KernelError> {
        assert!(
            self.inspect(|state| state.idle.is_none()),
            "Scheduler: already started."
        );
        let tid = self.next_tid.fetch_add(1, Ordering::SeqCst);
        let kernel = Arc::downgrade(self);
        self.cpu
            .prepare(tid, "idle", Box::new(move || idle(kernel)))
            .map_err(|_| KernelError::NoMemory)?;
        self.atomically(|state| {
            state.threads.insert(tid, Thread::new(tid, "idle", PRI_MIN));
            state.idle = Some(tid);
            ((), Then::Continue)
        });
        self.interrupts.enable();
        log::info!("Scheduler: started, idle thread is {tid}.");
        Ok(())
    }

    /// The configuration this kernel booted with.
    pub fn config(&self) -> &SystemConfiguration {
        &self.config
    }

    /// Returns the number of timer ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.ticks.now()
    }

    /// Returns the tick statistics.
    pub fn stats(&self) -> KernelStats {
        self.inspect(|state| state.stats)
    }

    /// Logs the tick statistics.
    pub fn print_stats(&self) {
        let stats = self.stats();
        log::info!(
            "Thread: {} idle ticks, {} kernel ticks, {} context switches.",
            stats.idle_ticks,
            stats.kernel_ticks,
            stats.context_switches
        );
    }

    /// Returns the number of threads on the ready queue.
    pub fn ready_count(&self) -> usize {
        self.inspect(|state| state.ready.len())
    }

    pub(crate) fn next_object_id(&self) -> ObjectId {
        self.next_object.fetch_add(1, Ordering::SeqCst)
    }

    fn lock_state(&self) -> SpinLockGuard<'_, KernelState> {
        self.state
            .try_lock()
            .unwrap_or_else(|_| panic!("Scheduler: state re-entered from a critical section."))
    }

    /// Reads the scheduler state with interrupts disabled.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&KernelState) -> R) -> R {
        let _intr = self.interrupts.disable();
        let state = self.lock_state();
        f(&state)
    }

    /// Runs `f` as a critical section, then lets the running thread continue,
    /// yield or block as `f` decided.
    pub(crate) fn atomically<R>(&self, f: impl FnOnce(&mut KernelState) -> (R, Then)) -> R {
        let _intr = self.interrupts.disable();
        let (result, switch) = {
            let mut state = self.lock_state();
            let (result, then) = f(&mut state);
            let switch = match then {
                Then::Continue => None,
                Then::Reschedule => {
                    assert!(
                        !self.interrupts.in_handler(),
                        "Scheduler: cannot block inside an interrupt handler."
                    );
                    state.schedule()
                }
                Then::Preempt if state.should_preempt() => self.preempt(&mut state),
                Then::Preempt => None,
                Then::Yield => self.preempt(&mut state),
            };
            #[cfg(debug_assertions)]
            state.check_invariants();
            (result, switch)
        };
        if let Some(switch) = switch {
            self.switch_to(switch);
        }
        result
    }

    /// Takes the CPU from the running thread, or asks the running handler to
    /// do so once it returns.
    fn preempt(&self, state: &mut KernelState) -> Option<Switch> {
        if self.interrupts.in_handler() {
            self.interrupts.yield_on_return();
            None
        } else {
            state.requeue_current();
            state.schedule()
        }
    }

    fn switch_to(&self, switch: Switch) {
        let Switch { prev, next, dead } = switch;
        if let Some(dead) = dead {
            self.graveyard.push(dead);
        }
        log::trace!("Scheduler: switch from {prev} to {next}.");
        self.cpu.switch(prev, next);
        self.reap();
    }

    /// Releases the contexts of the threads that exited.
    fn reap(&self) {
        while let Some(th) = self.graveyard.pop() {
            log::debug!("Thread: reclaim {} (`{}`).", th.tid, th.name);
            self.cpu.reclaim(th.tid);
        }
    }
}

/// The idle thread. Runs only when no other thread is ready.
fn idle(weak: Weak<Kernel>) {
    while let Some(kernel) = weak.upgrade() {
        kernel.block();
        drop(kernel);
        core::hint::spin_loop();
    }
}

impl KernelState {
    /// Checks that every thread sits in exactly the list its residence names
    /// and that effective priorities account for every donation.
    #[cfg(debug_assertions)]
    pub(crate) fn check_invariants(&self) {
        let mut listed = 0;
        for (tid, th) in self.threads.iter() {
            let tid = *tid;
            let found = match th.residence {
                Residence::Running => tid == self.current && th.status == ThreadStatus::Running,
                Residence::ReadyQueue => {
                    self.ready.contains(tid, th.ready_seq, th.effective_priority)
                }
                Residence::SleepQueue => self.sleepers.contains(tid),
                Residence::Semaphore(id) => self
                    .semaphores
                    .get(&id)
                    .is_some_and(|sema| sema.waiters.contains(&tid)),
                Residence::Lock(id) => {
                    th.wait_on_lock == Some(id)
                        && self
                            .locks
                            .get(&id)
                            .is_some_and(|lock| lock.waiters.contains(&tid))
                }
                Residence::CondVar(id) => self
                    .condvars
                    .get(&id)
                    .is_some_and(|cv| cv.waiters.iter().any(|(t, _)| *t == tid)),
                Residence::Parked | Residence::Nowhere => true,
            };
            assert!(found, "Scheduler: thread {tid} is not in {:?}.", th.residence);
            if !matches!(th.residence, Residence::Parked | Residence::Nowhere | Residence::Running) {
                listed += 1;
            }
            if self.donation {
                let expected = th
                    .donations
                    .iter()
                    .map(|d| self.thread(d.donor).effective_priority)
                    .fold(th.base_priority, core::cmp::max);
                assert_eq!(
                    th.effective_priority, expected,
                    "Scheduler: stale effective priority of thread {tid}."
                );
            }
        }
        let queued = self.ready.len()
            + self.sleepers.len()
            + self.semaphores.values().map(|s| s.waiters.len()).sum::<usize>()
            + self.locks.values().map(|l| l.waiters.len()).sum::<usize>()
            + self.condvars.values().map(|c| c.waiters.len()).sum::<usize>();
        assert_eq!(listed, queued, "Scheduler: a thread is queued twice.");
    }
}
