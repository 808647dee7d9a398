//! Interrupt management.
//!
//! External interrupts run on the stack of whatever thread they interrupted,
//! with interrupts disabled. A handler may wake threads, e.g. by
//! [`Semaphore::up`], but it must never block, and it cannot switch threads
//! by itself. When a handler makes a thread ready that should preempt the
//! interrupted one, the switch is deferred: the interrupted thread yields as
//! soon as the handler returns.
//!
//! The timer interrupt drives everything that depends on time:
//!
//! 1. the tick counter and the tick statistics,
//! 2. the MLFQS bookkeeping, when MLFQS is on,
//! 3. the wake-up of sleeping threads,
//! 4. time-slice preemption: a thread that ran for a whole time slice yields
//!    to the other threads of its priority.
//!
//! [`Semaphore::up`]: crate::Semaphore::up
use crate::kernel::{Kernel, Then};

impl Kernel {
    /// Runs `handler` as an external interrupt handler.
    ///
    /// A preemption requested while `handler` runs takes place when it
    /// returns.
    pub fn handle_interrupt<R>(&self, handler: impl FnOnce() -> R) -> R {
        let result = {
            let _intr = self.interrupts.disable();
            let _handler = self.interrupts.enter_handler();
            handler()
        };
        if self.interrupts.take_yield_on_return() {
            self.yield_now();
        }
        result
    }

    /// The timer interrupt.
    pub fn timer_interrupt(&self) {
        self.handle_interrupt(|| self.tick())
    }

    fn tick(&self) {
        let now = self.ticks.advance();
        let (time_slice, timer_freq) = (self.config.time_slice(), self.config.timer_freq());
        self.atomically(|state| {
            if Some(state.current) == state.idle {
                state.stats.idle_ticks += 1;
            } else {
                state.stats.kernel_ticks += 1;
            }
            if state.mlfqs.is_some() {
                state.mlfqs_tick(now, timer_freq);
            }
            state.wake_sleepers(now);

            state.slice += 1;
            if state.slice >= time_slice {
                ((), Then::Yield)
            } else {
                ((), Then::Preempt)
            }
        })
    }
}
