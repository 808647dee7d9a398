//! The periodic timer.

use core::sync::atomic::{AtomicU64, Ordering};

/// Default frequency of the timer interrupt, in ticks per second.
pub const TIMER_FREQ: u64 = 100;

/// Number of timer ticks since boot.
///
/// The counter only moves forward; the timer interrupt handler is the only
/// writer.
#[derive(Debug, Default)]
pub struct TickCounter {
    ticks: AtomicU64,
}

impl TickCounter {
    /// Creates a counter starting at tick 0.
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Returns the number of ticks since boot.
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Advances the counter by one tick and returns the new value.
    pub fn advance(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }
}
