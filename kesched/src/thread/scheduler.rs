//! Thread scheduler.
//!
//! The scheduler always runs the ready thread of highest effective priority.
//! Threads of equal priority run in the order they became ready, so that a
//! thread that yields goes behind its peers (round robin within a level).
//!
//! The ready queue is keyed by `(priority, arrival)`. A thread keeps its
//! arrival number while its priority changes in the queue, e.g. through a
//! donation, so a re-keyed thread does not jump ahead of threads that became
//! ready before it at its new level.
//!
//! When nothing is ready, the idle thread runs. The idle thread is never on
//! the ready queue, and any ready thread preempts it.
use super::{Priority, Residence, ThreadStatus, Tid};
use crate::kernel::{KernelState, Switch};
use alloc::collections::BTreeMap;
use core::cmp::Reverse;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
struct ReadyKey {
    priority: Reverse<Priority>,
    seq: u64,
}

/// Ready threads in dispatch order.
#[derive(Default)]
pub(crate) struct ReadyQueue {
    queue: BTreeMap<ReadyKey, Tid>,
    next_seq: u64,
}

impl ReadyQueue {
    /// Enqueues `tid` behind every ready thread of the same priority and
    /// returns its arrival number.
    pub fn push(&mut self, tid: Tid, priority: Priority) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert(
            ReadyKey {
                priority: Reverse(priority),
                seq,
            },
            tid,
        );
        seq
    }

    /// Dequeues the thread to run next.
    pub fn pop(&mut self) -> Option<Tid> {
        self.queue.pop_first().map(|(_, tid)| tid)
    }

    /// Priority of the thread to run next.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.queue.first_key_value().map(|(key, _)| key.priority.0)
    }

    /// Moves the thread that arrived as `seq` from `old` to `new`.
    pub fn reprioritize(&mut self, seq: u64, old: Priority, new: Priority) {
        let removed = self.queue.remove(&ReadyKey {
            priority: Reverse(old),
            seq,
        });
        if let Some(tid) = removed {
            self.queue.insert(
                ReadyKey {
                    priority: Reverse(new),
                    seq,
                },
                tid,
            );
        }
    }

    pub fn contains(&self, tid: Tid, seq: u64, priority: Priority) -> bool {
        self.queue.get(&ReadyKey {
            priority: Reverse(priority),
            seq,
        }) == Some(&tid)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl KernelState {
    /// Puts `tid` on the ready queue.
    pub(crate) fn make_ready(&mut self, tid: Tid) {
        let priority = self.thread(tid).effective_priority;
        let seq = self.ready.push(tid, priority);
        let th = self.thread_mut(tid);
        th.status = ThreadStatus::Ready;
        th.residence = Residence::ReadyQueue;
        th.ready_seq = seq;
        log::trace!("Scheduler: {tid} is ready at priority {priority}.");
    }

    /// Takes the running thread off the CPU while keeping it runnable. The
    /// idle thread is set aside instead of queued.
    pub(crate) fn requeue_current(&mut self) {
        let tid = self.current;
        if Some(tid) == self.idle {
            self.block_current(Residence::Nowhere);
        } else {
            self.make_ready(tid);
        }
    }

    /// Returns true if a ready thread must take the CPU from the running one.
    pub(crate) fn should_preempt(&self) -> bool {
        match self.ready.peek_priority() {
            None => false,
            Some(_) if Some(self.current) == self.idle => true,
            Some(priority) => priority > self.running().effective_priority,
        }
    }

    /// Changes the effective priority of `tid`, keeping its place in the
    /// ready queue consistent.
    pub(crate) fn set_effective(&mut self, tid: Tid, priority: Priority) {
        let th = self.thread_mut(tid);
        let old = th.effective_priority;
        th.effective_priority = priority;
        if th.residence == Residence::ReadyQueue {
            let seq = th.ready_seq;
            self.ready.reprioritize(seq, old, priority);
        }
    }

    /// Picks the next thread to run after the running thread left the CPU.
    ///
    /// Returns the switch to perform, or `None` when the same thread keeps
    /// running.
    pub(crate) fn schedule(&mut self) -> Option<Switch> {
        let prev = self.current;
        assert!(
            self.thread(prev).status != ThreadStatus::Running,
            "Scheduler: thread {prev} is rescheduled while still running."
        );
        let next = self
            .ready
            .pop()
            .or(self.idle)
            .unwrap_or_else(|| panic!("Scheduler: no runnable thread and no idle thread."));
        let th = self.thread_mut(next);
        th.check_magic();
        th.status = ThreadStatus::Running;
        th.residence = Residence::Running;
        self.current = next;
        self.slice = 0;
        if next == prev {
            return None;
        }
        self.stats.context_switches += 1;
        let dead = if self.thread(prev).status == ThreadStatus::Dying {
            self.threads.remove(&prev)
        } else {
            None
        };
        Some(Switch { prev, next, dead })
    }
}
