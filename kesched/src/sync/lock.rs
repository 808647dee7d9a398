//! # Lock.
//!
//! A **lock** is a semaphore with an initial value of one and an owner. At
//! most one thread holds a lock, and only the holder releases it. Locks are
//! not recursive: acquiring a lock one already holds is a fatal error, as is
//! releasing a lock one does not hold.
//!
//! ## Priority donation
//!
//! A high-priority thread waiting on a lock held by a low-priority thread
//! could wait forever if medium-priority threads keep the holder off the CPU
//! (*priority inversion*). To prevent it, a waiter **donates** its effective
//! priority to the holder. If the holder itself waits on another lock, the
//! donation flows on to that lock's holder, and so on down the chain.
//!
//! The holder gives the donation back when it releases the lock: it drops
//! exactly the donations made through that lock and keeps the ones made
//! through the other locks it still holds. The waiters left behind then
//! donate to the new holder.
//!
//! Donation is enabled by [`SystemConfiguration::priority_donation`] and is
//! never active under MLFQS.
//!
//! [`SystemConfiguration::priority_donation`]: crate::SystemConfiguration::priority_donation
use super::{ObjectId, donation};
use crate::{
    kernel::{Kernel, KernelState, Then},
    thread::{Residence, Tid},
};
use abyss::WouldBlock;
use alloc::{sync::Arc, vec::Vec};

pub(crate) struct LockState {
    pub holder: Option<Tid>,
    /// Waiters in arrival order.
    pub waiters: Vec<Tid>,
}

impl KernelState {
    pub(crate) fn lock_ref(&self, id: ObjectId) -> &LockState {
        self.locks
            .get(&id)
            .unwrap_or_else(|| panic!("Lock {id}: does not exist."))
    }

    pub(crate) fn lock_mut(&mut self, id: ObjectId) -> &mut LockState {
        self.locks
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Lock {id}: does not exist."))
    }

    /// Releases lock `id` held by `releaser`, handing it to the waiter of
    /// highest priority. Returns the new holder.
    pub(crate) fn release_lock(&mut self, releaser: Tid, id: ObjectId) -> Option<Tid> {
        let holder = self.lock_ref(id).holder;
        if holder != Some(releaser) {
            panic!("Lock {id}: released by thread {releaser}, which is not its holder.");
        }
        if self.donation {
            donation::revoke(self, releaser, id);
        }
        let chosen = self.highest_priority(self.lock_ref(id).waiters.iter().copied());
        let lock = self.lock_mut(id);
        let next = chosen.map(|idx| lock.waiters.remove(idx));
        lock.holder = next;
        if let Some(next) = next {
            self.thread_mut(next).wait_on_lock = None;
            if self.donation {
                donation::inherit(self, next, id);
            }
            log::trace!("Lock {id}: handed from {releaser} to {next}.");
            self.make_ready(next);
        }
        next
    }
}

/// A lock with priority donation.
pub struct Lock {
    kernel: Arc<Kernel>,
    id: ObjectId,
}

impl Lock {
    /// Creates an unheld lock.
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        let id = kernel.next_object_id();
        kernel.atomically(|state| {
            state.locks.insert(
                id,
                LockState {
                    holder: None,
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

    /// The identifier of this lock, as reported by
    /// [`ThreadInfo::wait_on_lock`].
    ///
    /// [`ThreadInfo::wait_on_lock`]: crate::ThreadInfo::wait_on_lock
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Acquires the lock, blocking until it is available.
    ///
    /// While blocked, the caller donates its priority to the holder. The idle
    /// thread may only take a free lock.
    pub fn acquire(&self) {
        let id = self.id;
        self.kernel.atomically(|state| {
            let tid = state.current;
            let idle = state.idle;
            let lock = state.lock_mut(id);
            match lock.holder {
                None => {
                    lock.holder = Some(tid);
                    ((), Then::Continue)
                }
                Some(holder) if holder == tid => {
                    panic!("Lock {id}: acquired again by its holder {tid}.")
                }
                Some(holder) => {
                    assert!(Some(tid) != idle, "The idle thread cannot wait on a lock.");
                    lock.waiters.push(tid);
                    state.running_mut().wait_on_lock = Some(id);
                    state.block_current(Residence::Lock(id));
                    log::trace!("Lock {id}: {tid} waits for {holder}.");
                    if state.donation {
                        donation::donate(state, tid, id);
                    }
                    ((), Then::Reschedule)
                }
            }
        })
    }

    /// Acquires the lock if it is free.
    ///
    /// # Errors
    /// [`WouldBlock`] if the lock is held.
    pub fn try_acquire(&self) -> Result<(), WouldBlock> {
        let id = self.id;
        self.kernel.atomically(|state| {
            let tid = state.current;
            let lock = state.lock_mut(id);
            match lock.holder {
                None => {
                    lock.holder = Some(tid);
                    (Ok(()), Then::Continue)
                }
                Some(_) => (Err(WouldBlock), Then::Continue),
            }
        })
    }

    /// Releases the lock.
    ///
    /// The waiter of highest priority becomes the holder. The caller's
    /// priority drops back to what its other locks and its base allow, and
    /// it yields if that is no longer the highest.
    pub fn release(&self) {
        let id = self.id;
        self.kernel.atomically(|state| {
            let tid = state.current;
            state.release_lock(tid, id);
            ((), Then::Preempt)
        })
    }

    /// Acquires the lock and returns a guard that releases it when dropped.
    pub fn guard(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard { lock: self }
    }

    /// Returns the holder of the lock.
    pub fn holder(&self) -> Option<Tid> {
        let id = self.id;
        self.kernel.inspect(|state| state.lock_ref(id).holder)
    }

    /// Returns true if the running thread holds the lock.
    pub fn held_by_current(&self) -> bool {
        let id = self.id;
        self.kernel
            .inspect(|state| state.lock_ref(id).holder == Some(state.current))
    }

    pub(crate) fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let id = self.id;
        self.kernel.atomically(|state| {
            let lock = state.lock_ref(id);
            if !lock.waiters.is_empty() {
                log::warn!("Lock {id}: dropped while threads wait on it.");
            } else {
                if let Some(holder) = lock.holder {
                    log::warn!("Lock {id}: dropped while held by {holder}.");
                }
                state.locks.remove(&id);
            }
            ((), Then::Continue)
        })
    }
}

/// An RAII implementation of a "scoped lock". When this structure is
/// dropped (falls out of scope), the lock is released.
///
/// This structure is created by [`Lock::guard`].
pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl LockGuard<'_> {
    /// Releases the underlying [`Lock`].
    pub fn unlock(self) {
        drop(self)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
