//! Thread contexts and the context switch.
//!
//! The register save/restore and the stack layout of a thread belong to the
//! machine. The scheduler only decides *which* thread runs; it asks a [`Cpu`]
//! to prepare a context for a new thread, to switch between two contexts, and
//! to release the context of a thread that will never run again.

use alloc::{boxed::Box, sync::Arc};

/// The function a new thread starts executing.
pub type ThreadFn = Box<dyn FnOnce() + Send + 'static>;

/// The backing memory of a new thread could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl core::fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("out of memory for a thread context")
    }
}

impl core::error::Error for OutOfMemory {}

/// A processor able to run threads.
///
/// Thread ids are the scheduler's identifiers; a [`Cpu`] uses them only as
/// keys for its own per-thread contexts.
pub trait Cpu: Send + Sync {
    /// Allocates the stack and the initial register frame of thread `tid`, so
    /// that the first switch into it starts executing `entry`.
    fn prepare(&self, tid: u64, name: &str, entry: ThreadFn) -> Result<(), OutOfMemory>;

    /// Saves the full register state of `prev` and restores the one of `next`.
    ///
    /// Returns when `prev` is switched back in. A thread that has exited is
    /// never switched back in.
    fn switch(&self, prev: u64, next: u64);

    /// Releases the context of `tid`. Called only after the final switch away
    /// from it.
    fn reclaim(&self, tid: u64);
}

impl<C: Cpu + ?Sized> Cpu for Arc<C> {
    fn prepare(&self, tid: u64, name: &str, entry: ThreadFn) -> Result<(), OutOfMemory> {
        (**self).prepare(tid, name, entry)
    }

    fn switch(&self, prev: u64, next: u64) {
        (**self).switch(prev, next)
    }

    fn reclaim(&self, tid: u64) {
        (**self).reclaim(tid)
    }
}
