//! The abyss of the kernel that talks to the machine.
//!
//! This crate contains the few platform facilities the scheduler core
//! consumes:
//!
//! - [`interrupt`]: the interrupt flag of the (single) CPU, an RAII
//!   [`InterruptGuard`] that disables interrupts and restores the prior state,
//!   and the bookkeeping for "am I inside an external interrupt handler".
//! - [`spinlock`]: a spinlock protecting data shared with interrupt handlers.
//! - [`timer`]: the monotonic tick counter advanced by the periodic timer.
//! - [`context`]: the context-switch seam, the [`Cpu`] trait, through which
//!   the scheduler allocates, switches and releases thread contexts.
//!
//! You are **not** supposed to use the modules of this crate directly to build
//! kernel services. Use the [`kesched`] crate, which wraps these facilities
//! into threads and synchronization primitives.
//!
//! [`InterruptGuard`]: interrupt::InterruptGuard
//! [`Cpu`]: context::Cpu
//! [`kesched`]: ../kesched/index.html
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod context;
pub mod interrupt;
pub mod spinlock;
pub mod timer;

pub use context::{Cpu, OutOfMemory, ThreadFn};
pub use interrupt::{HandlerGuard, InterruptController, InterruptGuard, InterruptState};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
pub use timer::TickCounter;
