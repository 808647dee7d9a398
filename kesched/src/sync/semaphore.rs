//! # Semaphore.
//!
//! A **semaphore** is a nonnegative counter of permits with two atomic
//! operations:
//!
//! - [`Semaphore::down`] ("P"): waits until the counter is positive, then
//!   decrements it.
//! - [`Semaphore::up`] ("V"): increments the counter and wakes one waiter.
//!
//! A semaphore initialized to zero signals events: one thread `down`s to
//! wait for the event, another `up`s when it happens. `up` never blocks, so
//! an interrupt handler may signal a semaphore.
//!
//! When `up` finds waiters, the permit goes straight to the waiter of highest
//! priority and the counter stays as it was. If that waiter outranks the
//! caller, the caller yields at once, or at the end of the interrupt handler.
use super::ObjectId;
use crate::{
    kernel::{Kernel, KernelState, Then},
    thread::{Residence, Tid},
};
use abyss::WouldBlock;
use alloc::{sync::Arc, vec::Vec};

pub(crate) struct SemaphoreState {
    pub value: usize,
    /// Waiters in arrival order.
    pub waiters: Vec<Tid>,
}

impl KernelState {
    fn semaphore_ref(&self, id: ObjectId) -> &SemaphoreState {
        self.semaphores
            .get(&id)
            .unwrap_or_else(|| panic!("Semaphore {id}: does not exist."))
    }

    fn semaphore_mut(&mut self, id: ObjectId) -> &mut SemaphoreState {
        self.semaphores
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Semaphore {id}: does not exist."))
    }
}

/// A counting semaphore.
pub struct Semaphore {
    kernel: Arc<Kernel>,
    id: ObjectId,
}

impl Semaphore {
    /// Creates a semaphore holding `value` permits.
    pub fn new(kernel: &Arc<Kernel>, value: usize) -> Self {
        let id = kernel.next_object_id();
        kernel.atomically(|state| {
            state.semaphores.insert(
                id,
                SemaphoreState {
                    value,
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

    /// Takes a permit, blocking until one is available.
    ///
    /// Fatal inside an interrupt handler or in the idle thread if no permit
    /// is available.
    pub fn down(&self) {
        let id = self.id;
        self.kernel.atomically(|state| {
            let tid = state.current;
            let idle = state.idle;
            let sema = state.semaphore_mut(id);
            if sema.value > 0 {
                sema.value -= 1;
                return ((), Then::Continue);
            }
            assert!(Some(tid) != idle, "The idle thread cannot wait on a semaphore.");
            sema.waiters.push(tid);
            state.block_current(Residence::Semaphore(id));
            log::trace!("Semaphore {id}: {tid} waits.");
            ((), Then::Reschedule)
        })
    }

    /// Takes a permit if one is available.
    ///
    /// # Errors
    /// [`WouldBlock`] if the counter is zero.
    pub fn try_down(&self) -> Result<(), WouldBlock> {
        let id = self.id;
        self.kernel.atomically(|state| {
            let sema = state.semaphore_mut(id);
            if sema.value > 0 {
                sema.value -= 1;
                (Ok(()), Then::Continue)
            } else {
                (Err(WouldBlock), Then::Continue)
            }
        })
    }

    /// Returns a permit, handing it to the highest-priority waiter if any.
    pub fn up(&self) {
        let id = self.id;
        self.kernel.atomically(|state| {
            let chosen = state.highest_priority(state.semaphore_ref(id).waiters.iter().copied());
            let sema = state.semaphore_mut(id);
            match chosen {
                Some(idx) => {
                    let tid = sema.waiters.remove(idx);
                    log::trace!("Semaphore {id}: permit handed to {tid}.");
                    state.make_ready(tid);
                    ((), Then::Preempt)
                }
                None => {
                    sema.value += 1;
                    ((), Then::Continue)
                }
            }
        })
    }

    /// Takes a permit that is returned when the [`SemaphorePermit`] is
    /// dropped.
    pub fn permit(&self) -> SemaphorePermit<'_> {
        self.down();
        SemaphorePermit { sema: self }
    }

    /// The number of available permits.
    pub fn value(&self) -> usize {
        let id = self.id;
        self.kernel.inspect(|state| state.semaphore_ref(id).value)
    }

    /// The number of threads waiting for a permit.
    pub fn waiters(&self) -> usize {
        let id = self.id;
        self.kernel.inspect(|state| state.semaphore_ref(id).waiters.len())
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let id = self.id;
        self.kernel.atomically(|state| {
            if state.semaphore_ref(id).waiters.is_empty() {
                state.semaphores.remove(&id);
            } else {
                log::warn!("Semaphore {id}: dropped while threads wait on it.");
            }
            ((), Then::Continue)
        })
    }
}

/// An RAII implementation of a semaphore permit. The permit is returned
/// when this structure is dropped (falls out of scope).
///
/// This structure is created by [`Semaphore::permit`].
pub struct SemaphorePermit<'a> {
    sema: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sema.up();
    }
}
