//! # Condition Variable.
//!
//! A **condition variable** lets a thread holding a [`Lock`] wait until some
//! condition on the data protected by that lock may have become true:
//!
//! ```rust,ignore
//! let _guard = lock.guard();
//! while !condition() {
//!     cv.wait(&lock);
//! }
//! ```
//!
//! [`ConditionVariable::wait`] releases the lock and blocks the caller. Both
//! happen in one step, so a signal cannot slip in between. The caller holds
//! the lock again when `wait` returns.
//!
//! Signals follow **Mesa semantics**. A signal is only a hint: the woken
//! thread runs some time after the signaller, once the lock is free, so it
//! must re-check its condition. A signal with no waiter is lost.
//!
//! A signalled waiter moves from the condition variable straight onto the
//! wait list of its lock, and donates its priority to the lock's holder,
//! i.e. to the signaller.
use super::{Lock, ObjectId, donation};
use crate::{
    kernel::{Kernel, KernelState, Then},
    thread::{Residence, Tid},
};
use alloc::{sync::Arc, vec::Vec};

pub(crate) struct CondvarState {
    /// Waiters in arrival order, with the lock each waits to get back.
    pub waiters: Vec<(Tid, ObjectId)>,
}

impl KernelState {
    fn condvar_ref(&self, id: ObjectId) -> &CondvarState {
        self.condvars
            .get(&id)
            .unwrap_or_else(|| panic!("Condition variable {id}: does not exist."))
    }

    fn condvar_mut(&mut self, id: ObjectId) -> &mut CondvarState {
        self.condvars
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Condition variable {id}: does not exist."))
    }

    fn assert_holds(&self, cv: ObjectId, lock: ObjectId) {
        let tid = self.current;
        if self.lock_ref(lock).holder != Some(tid) {
            panic!("Condition variable {cv}: used by {tid} without holding lock {lock}.");
        }
    }

    /// Moves the waiter of highest priority on `id` to the lock it waits
    /// for. Returns false if nobody waits.
    fn signal_condvar(&mut self, id: ObjectId) -> bool {
        let chosen = self.highest_priority(self.condvar_ref(id).waiters.iter().map(|(tid, _)| *tid));
        let Some(idx) = chosen else {
            return false;
        };
        let (tid, lock) = self.condvar_mut(id).waiters.remove(idx);
        match self.lock_ref(lock).holder {
            None => {
                self.lock_mut(lock).holder = Some(tid);
                self.make_ready(tid);
            }
            Some(_) => {
                self.lock_mut(lock).waiters.push(tid);
                let th = self.thread_mut(tid);
                th.wait_on_lock = Some(lock);
                th.residence = Residence::Lock(lock);
                if self.donation {
                    donation::donate(self, tid, lock);
                }
            }
        }
        log::trace!("Condition variable {id}: {tid} signalled.");
        true
    }
}

/// A Mesa-style condition variable.
pub struct ConditionVariable {
    kernel: Arc<Kernel>,
    id: ObjectId,
}

impl ConditionVariable {
    /// Creates a condition variable with no waiters.
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        let id = kernel.next_object_id();
        kernel.atomically(|state| {
            state.condvars.insert(
                id,
                CondvarState {
                    waiters: Vec::new(),
                },
            );
            ((), Then::Continue)
        });
        Self {
            kernel: kernel.clone(),
            id,
        }
    }

    /// Releases `lock`, waits for a signal, and reacquires `lock`.
    ///
    /// The caller must hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        self.check_kernel(lock);
        let (id, lock) = (self.id, lock.id());
        self.kernel.atomically(|state| {
            state.assert_holds(id, lock);
            let tid = state.current;
            assert!(
                Some(tid) != state.idle,
                "The idle thread cannot wait on a condition variable."
            );
            state.condvar_mut(id).waiters.push((tid, lock));
            state.release_lock(tid, lock);
            state.block_current(Residence::CondVar(id));
            ((), Then::Reschedule)
        })
    }

    /// Wakes the waiter of highest priority, if any.
    ///
    /// The caller must hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        self.check_kernel(lock);
        let (id, lock) = (self.id, lock.id());
        self.kernel.atomically(|state| {
            state.assert_holds(id, lock);
            if state.signal_condvar(id) {
                ((), Then::Preempt)
            } else {
                ((), Then::Continue)
            }
        })
    }

    /// Wakes every waiter.
    ///
    /// The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        self.check_kernel(lock);
        let (id, lock) = (self.id, lock.id());
        self.kernel.atomically(|state| {
            state.assert_holds(id, lock);
            let mut woken = false;
            while state.signal_condvar(id) {
                woken = true;
            }
            if woken {
                ((), Then::Preempt)
            } else {
                ((), Then::Continue)
            }
        })
    }

    /// The number of threads waiting for a signal.
    pub fn waiters(&self) -> usize {
        let id = self.id;
        self.kernel
            .inspect(|state| state.condvars.get(&id).map_or(0, |cv| cv.waiters.len()))
    }

    fn check_kernel(&self, lock: &Lock) {
        assert!(
            Arc::ptr_eq(&self.kernel, lock.kernel()),
            "Condition variable {}: lock {} belongs to another kernel.",
            self.id,
            lock.id()
        );
    }
}

impl Drop for ConditionVariable {
    fn drop(&mut self) {
        let id = self.id;
        self.kernel.atomically(|state| {
            if state.condvar_ref(id).waiters.is_empty() {
                state.condvars.remove(&id);
            } else {
                log::warn!("Condition variable {id}: dropped while threads wait on it.");
            }
            ((), Then::Continue)
        })
    }
}
