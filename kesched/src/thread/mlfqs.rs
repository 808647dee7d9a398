//! Multi-level feedback queue scheduler (MLFQS).
//!
//! Under MLFQS the kernel, not the threads, sets priorities. A thread that
//! used a lot of CPU recently, or that is *nice* to others, gets a lower
//! priority:
//!
//! ```text
//! priority   = PRI_MAX - recent_cpu / 4 - 2 * nice          (every 4th tick)
//! recent_cpu = (2 * load_avg) / (2 * load_avg + 1) * recent_cpu + nice
//!                                                          (once a second)
//! load_avg   = 59/60 * load_avg + 1/60 * ready_threads      (once a second)
//! ```
//!
//! Besides, the running thread's `recent_cpu` grows by one on every tick.
//! `ready_threads` counts the ready threads plus the running one, the idle
//! thread excluded. `recent_cpu` and `load_avg` are [`FixedPoint`] numbers.
//!
//! Priority donation is not used under MLFQS.
use super::{NICE_MAX, NICE_MIN, PRI_MAX, PRI_MIN, Priority, Tid};
use crate::{
    KernelError,
    fixed_point::FixedPoint,
    kernel::{Kernel, KernelState, Then},
};
use alloc::vec::Vec;

/// Priorities are recomputed every this many ticks.
pub const PRIORITY_INTERVAL: u64 = 4;

/// System-wide MLFQS state.
#[derive(Default)]
pub(crate) struct Mlfqs {
    pub load_avg: FixedPoint,
}

/// The priority a thread with `recent_cpu` and `nice` deserves.
pub(crate) fn priority_of(recent_cpu: FixedPoint, nice: i32) -> Priority {
    let priority = (FixedPoint::from_int(PRI_MAX as i32) - recent_cpu / 4 - nice * 2).trunc();
    priority.clamp(PRI_MIN as i32, PRI_MAX as i32) as Priority
}

impl KernelState {
    /// MLFQS bookkeeping of timer tick `now`.
    pub(crate) fn mlfqs_tick(&mut self, now: u64, timer_freq: u64) {
        let current = self.current;
        if Some(current) != self.idle {
            let th = self.thread_mut(current);
            th.recent_cpu = th.recent_cpu + 1;
        }
        if now % timer_freq == 0 {
            self.update_load_avg();
            self.decay_recent_cpu();
        }
        if now % PRIORITY_INTERVAL == 0 {
            self.update_priorities();
        }
    }

    fn live_threads(&self) -> Vec<Tid> {
        self.threads
            .keys()
            .copied()
            .filter(|tid| Some(*tid) != self.idle)
            .collect()
    }

    fn update_load_avg(&mut self) {
        let running = usize::from(Some(self.current) != self.idle);
        let ready_threads = (self.ready.len() + running) as i32;
        let Some(mlfqs) = self.mlfqs.as_mut() else {
            return;
        };
        mlfqs.load_avg = FixedPoint::ratio(59, 60) * mlfqs.load_avg
            + FixedPoint::ratio(1, 60) * ready_threads;
        log::trace!(
            "Mlfqs: load_avg is {} / 100.",
            (mlfqs.load_avg * 100).round()
        );
    }

    fn decay_recent_cpu(&mut self) {
        let load_avg = self.load_avg();
        let coefficient = (load_avg * 2) / (load_avg * 2 + 1);
        for tid in self.live_threads() {
            let th = self.thread_mut(tid);
            th.recent_cpu = coefficient * th.recent_cpu + th.nice;
        }
    }

    fn update_priorities(&mut self) {
        for tid in self.live_threads() {
            self.refresh_mlfqs_priority(tid);
        }
    }

    /// Recomputes the priority of `tid` from its `recent_cpu` and `nice`.
    pub(crate) fn refresh_mlfqs_priority(&mut self, tid: Tid) {
        let th = self.thread_mut(tid);
        let priority = priority_of(th.recent_cpu, th.nice);
        th.base_priority = priority;
        self.set_effective(tid, priority);
    }

    pub(crate) fn load_avg(&self) -> FixedPoint {
        self.mlfqs
            .as_ref()
            .map(|mlfqs| mlfqs.load_avg)
            .unwrap_or_default()
    }
}

impl Kernel {
    /// Returns the niceness of the running thread.
    pub fn get_nice(&self) -> i32 {
        self.inspect(|state| state.running().nice)
    }

    /// Sets the niceness of the running thread.
    ///
    /// Under MLFQS the thread's priority is recomputed at once, and the
    /// thread yields if it no longer has the highest priority.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] if `nice` is outside
    /// [`NICE_MIN`]..=[`NICE_MAX`].
    pub fn set_nice(&self, nice: i32) -> Result<(), KernelError> {
        if !(NICE_MIN..=NICE_MAX).contains(&nice) {
            return Err(KernelError::InvalidArgument);
        }
        self.atomically(|state| {
            let tid = state.current;
            state.running_mut().nice = nice;
            if state.mlfqs.is_none() {
                return (Ok(()), Then::Continue);
            }
            state.refresh_mlfqs_priority(tid);
            (Ok(()), Then::Preempt)
        })
    }

    /// Returns 100 times the running thread's `recent_cpu`, rounded to
    /// nearest.
    pub fn get_recent_cpu(&self) -> i32 {
        self.inspect(|state| (state.running().recent_cpu * 100).round())
    }

    /// Returns 100 times the system load average, rounded to nearest.
    pub fn get_load_avg(&self) -> i32 {
        self.inspect(|state| (state.load_avg() * 100).round())
    }
}
