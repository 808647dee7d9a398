//! # kesched: the thread core of a single-CPU teaching kernel
//!
//! This crate is the part of the kernel that decides **which thread runs**.
//! It owns every thread control block and runs every scheduling decision. It
//! also provides the blocking primitives that threads use to wait for each
//! other or for time to pass.
//!
//! The crate is organized as follows:
//!
//! - [`thread`]: thread creation, the thread lifecycle, and the ready queue,
//!   which is ordered by priority. It also holds the timed sleep queue and the
//!   multi-level feedback queue scheduler (MLFQS).
//! - [`sync`]: counting semaphores, locks with priority donation, and
//!   Mesa-style condition variables.
//! - [`interrupt`]: the timer tick and the external-interrupt discipline
//!   (preemption is deferred to the end of a handler).
//! - [`config`]: the boot-time configuration, e.g. the scheduling policy.
//!
//! ## Execution model
//!
//! The machine is abstracted behind [`abyss::Cpu`]. The scheduler never
//! touches registers or stacks. It asks the [`Cpu`] to *prepare* a context for
//! a new thread and to *switch* between two contexts. Once a dead thread has
//! been switched away from for the last time, it asks the [`Cpu`] to
//! *reclaim* that thread's context.
//!
//! All scheduler state lives in one [`Kernel`] object. Every mutation happens
//! inside a critical section that disables interrupts. The context switch is
//! issued at the end of that section, while interrupts are still off.
//!
//! Ownership moves directly to the woken thread: [`Semaphore::up`] hands its
//! permit to the waiter, and [`Lock::release`] makes the waiter the holder. A
//! thread that returns from a blocking call therefore never needs to re-check
//! anything.
//!
//! ## Getting started
//!
//! ```rust,ignore
//! let config = SystemConfiguration::builder().build()?;
//! let kernel = Kernel::boot(config, cpu);
//! kernel.start()?;
//!
//! let lock = Lock::new(&kernel);
//! kernel.thread("worker").priority(40).spawn({
//!     let kernel = kernel.clone();
//!     move || kernel.sleep(10)
//! })?;
//! ```
//!
//! [`Cpu`]: abyss::Cpu
//! [`Semaphore::up`]: sync::Semaphore::up
//! [`Lock::release`]: sync::Lock::release
//! [`Lock`]: sync::Lock
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod fixed_point;
pub mod interrupt;
pub mod kernel;
pub mod sync;
pub mod thread;

pub use config::{ConfigError, SchedulingPolicy, SystemConfiguration, SystemConfigurationBuilder};
pub use kernel::{Kernel, KernelStats};
pub use sync::{ConditionVariable, Lock, LockGuard, Semaphore, SemaphorePermit};
pub use thread::{
    NICE_DEFAULT, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX, PRI_MIN, Priority, ThreadBuilder,
    ThreadInfo, ThreadStatus, Tid,
};

/// Enum representing errors that can occur during a kernel operation.
///
/// Contract violations, such as releasing a lock one does not hold, are not
/// errors: they panic. A [`KernelError`] is returned only for conditions a
/// well-behaved caller can run into.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such thread. (ESRCH)
    NoSuchThread,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchThread => -3,
            KernelError::NoMemory => -12,
            KernelError::InvalidArgument => -22,
        }) as usize
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::OperationNotPermitted => f.write_str("operation not permitted"),
            KernelError::NoSuchThread => f.write_str("no such thread"),
            KernelError::NoMemory => f.write_str("out of memory"),
            KernelError::InvalidArgument => f.write_str("invalid argument"),
        }
    }
}

impl core::error::Error for KernelError {}

#[cfg(test)]
mod tests {
    use super::KernelError;

    #[test]
    fn errno_mapping() {
        assert_eq!(KernelError::OperationNotPermitted.into_usize() as isize, -1);
        assert_eq!(KernelError::NoSuchThread.into_usize() as isize, -3);
        assert_eq!(KernelError::NoMemory.into_usize() as isize, -12);
        assert_eq!(KernelError::InvalidArgument.into_usize() as isize, -22);
    }
}
