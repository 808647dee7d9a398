//! Interrupt
//!
//! The scheduler core runs on a single CPU, so disabling interrupts is the
//! only mutual exclusion it needs: once the timer cannot fire, nobody else can
//! touch the scheduler state. [`InterruptController`] models the interrupt
//! flag of that CPU together with the "inside an external interrupt handler"
//! state that decides whether a preemption happens now or on return from the
//! handler.
use core::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicIsize, Ordering},
};

/// Enumeration representing the interrupt state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

/// The interrupt flag of a CPU and the external-interrupt bookkeeping.
///
/// A CPU boots with interrupts disabled. The kernel turns them on once the
/// idle thread exists.
pub struct InterruptController {
    enabled: AtomicBool,
    cnt: AtomicIsize,
    in_handler: AtomicBool,
    yield_on_return: AtomicBool,
}

impl InterruptController {
    /// Creates a controller with interrupts disabled.
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            cnt: AtomicIsize::new(0),
            in_handler: AtomicBool::new(false),
            yield_on_return: AtomicBool::new(false),
        }
    }

    /// Reads the current interrupt state.
    ///
    /// # Returns
    /// - [`InterruptState::On`] if interrupts are enabled.
    /// - [`InterruptState::Off`] if interrupts are disabled.
    pub fn current(&self) -> InterruptState {
        if self.enabled.load(Ordering::SeqCst) {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    /// Sets the interrupt state to `state` and returns the previous one.
    pub fn set(&self, state: InterruptState) -> InterruptState {
        if self
            .enabled
            .swap(state == InterruptState::On, Ordering::SeqCst)
        {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    /// Enables interrupts.
    pub fn enable(&self) {
        assert!(
            !self.in_handler(),
            "Interrupts must not be enabled inside an interrupt handler."
        );
        self.set(InterruptState::On);
    }

    /// Disables interrupts until the returned guard is dropped.
    ///
    /// The guard remembers the state it found and restores exactly that
    /// state, so critical sections nest.
    ///
    /// # Example
    /// ```rust,ignore
    /// let _guard = controller.disable(); // Disables interrupts
    /// // Critical section...
    /// // Interrupts are restored when `_guard` goes out of scope.
    /// ```
    pub fn disable(&self) -> InterruptGuard<'_> {
        let prev = self.set(InterruptState::Off);
        core::sync::atomic::fence(Ordering::SeqCst);
        self.cnt.fetch_add(1, Ordering::SeqCst);
        InterruptGuard {
            controller: self,
            prev,
            _not_send: PhantomData,
        }
    }

    /// Returns true if an [`InterruptGuard`] of this controller is alive.
    pub fn is_guarded(&self) -> bool {
        self.cnt.load(Ordering::SeqCst) > 0
    }

    /// Marks the start of an external interrupt handler.
    ///
    /// External interrupts do not nest: the handler runs with interrupts
    /// disabled.
    pub fn enter_handler(&self) -> HandlerGuard<'_> {
        assert!(
            !self.in_handler.swap(true, Ordering::SeqCst),
            "Nested external interrupt."
        );
        HandlerGuard {
            controller: self,
            _not_send: PhantomData,
        }
    }

    /// Returns true while an external interrupt handler is running.
    pub fn in_handler(&self) -> bool {
        self.in_handler.load(Ordering::SeqCst)
    }

    /// Requests a yield right after the running handler returns.
    ///
    /// A handler cannot switch threads by itself; it asks the interrupted
    /// thread to yield once the handler is done.
    pub fn yield_on_return(&self) {
        assert!(self.in_handler(), "yield_on_return outside of a handler.");
        self.yield_on_return.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending yield-on-return request.
    pub fn take_yield_on_return(&self) -> bool {
        self.yield_on_return.swap(false, Ordering::SeqCst)
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When it is
/// dropped, the interrupt state is restored to what it was before the guard was
/// created.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - Due to Rust's ownership and scoping rules, this invariant is naturally
///   upheld unless `drop()` is explicitly called prematurely or an
///   [`InterruptGuard`] is stored in a struct field.
///
/// This structure is created using [`InterruptController::disable`].
pub struct InterruptGuard<'a> {
    controller: &'a InterruptController,
    prev: InterruptState,
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard<'_> {
    /// The interrupt state this guard restores on drop.
    pub fn previous(&self) -> InterruptState {
        self.prev
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        let prev = self.controller.cnt.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "Mismatched InterruptGuard drop calls: {prev}");
        core::sync::atomic::fence(Ordering::SeqCst);
        self.controller.set(self.prev);
    }
}

/// Marks the extent of an external interrupt handler.
///
/// Created by [`InterruptController::enter_handler`].
pub struct HandlerGuard<'a> {
    controller: &'a InterruptController,
    _not_send: PhantomData<*const ()>,
}

impl Drop for HandlerGuard<'_> {
    fn drop(&mut self) {
        self.controller.in_handler.store(false, Ordering::SeqCst);
    }
}
