//! # Synchronization Primitives.
//!
//! Threads that share data must coordinate. The kernel provides three
//! blocking primitives. A thread that cannot proceed is taken off the CPU and
//! put on the primitive's wait list. It does not spin.
//!
//! - [`Semaphore`]: a counter of permits. `down` takes a permit or waits for
//!   one; `up` returns one.
//! - [`Lock`]: a binary semaphore with an owner. Only the holder releases it,
//!   and waiters lend their priority to the holder (*priority donation*).
//! - [`ConditionVariable`]: lets a lock holder wait until another holder
//!   signals that a condition may have changed (Mesa semantics).
//!
//! | Primitive             | Owner?  | Donation? | Typical use case                     |
//! |-----------------------|---------|-----------|--------------------------------------|
//! | [`Semaphore`]         | No      | No        | Signalling events, bounded resources |
//! | [`Lock`]              | Yes     | Yes       | Exclusive access to shared data      |
//! | [`ConditionVariable`] | No      | Via lock  | Waiting for a predicate              |
//!
//! ## Waking order
//!
//! Every primitive wakes the waiter of **highest effective priority**. Among
//! equal priorities, the one that waited longest goes first. The priority is
//! read when the waiter is chosen, so a donation received while waiting
//! counts.
//!
//! ## Hand-off
//!
//! A woken thread does not race for what it waited for. [`Semaphore::up`]
//! gives its permit directly to the woken waiter. [`Lock::release`] makes the
//! woken waiter the holder. When a blocking call returns, the caller owns the
//! permit or the lock.
//!
//! The primitives are handles to state kept inside the [`Kernel`]. A handle
//! can be shared between threads behind an [`Arc`].
//!
//! [`Kernel`]: crate::Kernel
//! [`Arc`]: alloc::sync::Arc
pub mod condition_variable;
pub(crate) mod donation;
pub mod lock;
pub mod semaphore;

pub use condition_variable::ConditionVariable;
pub(crate) use condition_variable::CondvarState;
pub use lock::{Lock, LockGuard};
pub(crate) use lock::LockState;
pub use semaphore::{Semaphore, SemaphorePermit};
pub(crate) use semaphore::SemaphoreState;

/// Identifier of a synchronization object.
pub type ObjectId = u64;

use crate::Kernel;
use alloc::sync::Arc;

impl Kernel {
    /// Creates a semaphore holding `value` permits.
    pub fn semaphore(self: &Arc<Self>, value: usize) -> Semaphore {
        Semaphore::new(self, value)
    }

    /// Creates an unheld lock.
    pub fn lock(self: &Arc<Self>) -> Lock {
        Lock::new(self)
    }

    /// Creates a condition variable.
    pub fn condvar(self: &Arc<Self>) -> ConditionVariable {
        ConditionVariable::new(self)
    }
}
