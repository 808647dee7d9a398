//! Priority donation.
//!
//! A thread's effective priority is the maximum of its base priority and the
//! effective priorities of the threads that donate to it. Each donation is
//! recorded on the holder as `(donor, lock)`, so that releasing one lock
//! revokes exactly the donations made through it.
//!
//! A change of effective priority travels along `wait_on_lock -> holder`
//! edges until a thread's priority no longer changes. A thread waits on at
//! most one lock and a lock has at most one holder, so the chain is a path.
//! A deadlock would close it into a cycle; the walk is bounded by the number
//! of locks so that it still terminates then.
use super::ObjectId;
use crate::{
    kernel::KernelState,
    thread::{Donation, Priority, Tid},
};
use alloc::vec::Vec;

/// Records that `donor` waits on `lock` and raises the holder chain.
pub(crate) fn donate(state: &mut KernelState, donor: Tid, lock: ObjectId) {
    let Some(holder) = state.lock_ref(lock).holder else {
        panic!("Donation: lock {lock} has waiters but no holder.");
    };
    state
        .thread_mut(holder)
        .donations
        .push(Donation { donor, lock });
    propagate(state, holder);
}

/// Drops the donations `holder` received through `lock`.
pub(crate) fn revoke(state: &mut KernelState, holder: Tid, lock: ObjectId) {
    state
        .thread_mut(holder)
        .donations
        .retain(|donation| donation.lock != lock);
    propagate(state, holder);
}

/// Makes the threads still waiting on `lock` donate to its new holder.
pub(crate) fn inherit(state: &mut KernelState, new_holder: Tid, lock: ObjectId) {
    let waiters: Vec<Tid> = state.lock_ref(lock).waiters.clone();
    state
        .thread_mut(new_holder)
        .donations
        .extend(waiters.into_iter().map(|donor| Donation { donor, lock }));
    propagate(state, new_holder);
}

/// Recomputes the effective priority of `tid` and carries the change down
/// the chain of lock holders.
pub(crate) fn propagate(state: &mut KernelState, tid: Tid) {
    let mut tid = tid;
    let mut hops = state.locks.len();
    loop {
        let priority = effective_priority(state, tid);
        if priority == state.thread(tid).effective_priority {
            return;
        }
        state.set_effective(tid, priority);
        log::trace!("Donation: {tid} now runs at priority {priority}.");

        let Some(lock) = state.thread(tid).wait_on_lock else {
            return;
        };
        if hops == 0 {
            log::warn!("Donation: lock chain through {lock} does not end.");
            return;
        }
        hops -= 1;
        match state.lock_ref(lock).holder {
            Some(holder) => tid = holder,
            None => return,
        }
    }
}

fn effective_priority(state: &KernelState, tid: Tid) -> Priority {
    let th = state.thread(tid);
    th.donations
        .iter()
        .map(|donation| state.thread(donation.donor).effective_priority)
        .fold(th.base_priority, Priority::max)
}
