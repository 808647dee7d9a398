//! Timed sleep.
//!
//! A sleeping thread is blocked on the sleep queue, not spinning. The queue
//! is sorted by wake-up tick. Threads sharing a wake-up tick stay in the
//! order they went to sleep, so the timer handler only looks at the front of
//! the queue.
use super::{Residence, Tid};
use crate::kernel::{Kernel, KernelState, Then};
use alloc::{collections::VecDeque, vec::Vec};

/// Sleeping threads ordered by wake-up tick.
#[derive(Default)]
pub(crate) struct SleepQueue {
    sleepers: VecDeque<(u64, Tid)>,
}

impl SleepQueue {
    /// Inserts `tid` behind every sleeper due at or before `wakeup`.
    pub fn insert(&mut self, tid: Tid, wakeup: u64) {
        let idx = self.sleepers.partition_point(|(tick, _)| *tick <= wakeup);
        self.sleepers.insert(idx, (wakeup, tid));
    }

    /// Removes the sleepers due at `now`, in wake-up order.
    pub fn drain_due(&mut self, now: u64) -> Vec<Tid> {
        let due = self.sleepers.partition_point(|(tick, _)| *tick <= now);
        self.sleepers.drain(..due).map(|(_, tid)| tid).collect()
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.sleepers.iter().any(|(_, t)| *t == tid)
    }

    pub fn len(&self) -> usize {
        self.sleepers.len()
    }
}

impl Kernel {
    /// Blocks the running thread for at least `ticks` timer ticks.
    ///
    /// The thread becomes ready on the first tick at which `ticks` ticks have
    /// elapsed since the call. It then competes for the CPU by priority like
    /// any other ready thread. `sleep(0)` returns immediately, and
    /// `sleep(u64::MAX)` never wakes up.
    pub fn sleep(&self, ticks: u64) {
        if ticks == 0 {
            return;
        }
        self.atomically(|state| {
            let tid = state.current;
            assert!(Some(tid) != state.idle, "The idle thread cannot sleep.");
            let wakeup = self.ticks.now().saturating_add(ticks);
            state.running_mut().wakeup_tick = wakeup;
            state.block_current(Residence::SleepQueue);
            state.sleepers.insert(tid, wakeup);
            log::trace!("Sleep: {tid} sleeps until tick {wakeup}.");
            ((), Then::Reschedule)
        })
    }
}

impl KernelState {
    /// Readies every sleeper due at `now`. Returns how many woke up.
    pub(crate) fn wake_sleepers(&mut self, now: u64) -> usize {
        let due = self.sleepers.drain_due(now);
        for &tid in due.iter() {
            log::trace!("Sleep: {tid} wakes up at tick {now}.");
            self.make_ready(tid);
        }
        due.len()
    }
}
