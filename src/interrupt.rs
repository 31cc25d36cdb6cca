//! Nested interrupt masking.
//!
//! A lock that may also be taken by an interrupt handler must keep
//! interrupts masked for as long as it is held, or the handler could spin
//! forever on a lock its own execution unit holds. Critical sections nest
//! (holding two locks at once is common), so masking is reference-counted
//! per execution unit: interrupts are masked by the first [`Nesting::enter`]
//! and only unmasked by the matching outermost [`Nesting::exit`], and then
//! only if they were enabled before that first `enter`.
use crate::{
    loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed},
    Platform,
};
use core::{fmt, marker::PhantomData};
use hal_core::interrupt::Control;

/// Per-execution-unit interrupt nesting state.
///
/// Each execution unit owns exactly one `Nesting`, returned by
/// [`Platform::nesting`]. It is only ever touched by its own unit, with
/// interrupts masked, so relaxed orderings suffice.
pub struct Nesting {
    /// How many `enter`s are outstanding.
    depth: AtomicUsize,
    /// Were interrupts enabled before the outermost `enter`?
    was_enabled: AtomicBool,
}

/// An RAII guard for one level of interrupt masking.
///
/// Returned by [`push_off`]. Dropping the guard exits one nesting level,
/// on every exit path. The guard is `!Send`: it must be dropped by the
/// execution unit that created it.
#[must_use = "dropping an `IrqGuard` immediately exits the critical section"]
pub struct IrqGuard<'a, P: Platform + ?Sized> {
    platform: &'a P,
    _not_send: PhantomData<*mut ()>,
}

/// Masks interrupts on the current execution unit, returning a guard that
/// restores them when dropped.
pub fn push_off<P: Platform + ?Sized>(platform: &P) -> IrqGuard<'_, P> {
    platform.nesting().enter(platform.interrupts());
    IrqGuard {
        platform,
        _not_send: PhantomData,
    }
}

// === impl Nesting ===

impl Nesting {
    loom_const_fn! {
        #[must_use]
        pub fn new() -> Self {
            Self {
                depth: AtomicUsize::new(0),
                was_enabled: AtomicBool::new(false),
            }
        }
    }

    /// Masks interrupts and enters one nesting level.
    ///
    /// If this is the outermost level, the prior interrupt state is saved so
    /// that the matching [`exit`](Self::exit) can restore it.
    pub fn enter(&self, ctrl: &impl Control) {
        let old = ctrl.is_enabled();
        unsafe {
            // Safety: every `enter` is paired with an `exit`, which
            // re-enables interrupts if they were enabled to begin with.
            ctrl.disable_irq();
        }

        let depth = self.depth.load(Relaxed);
        if depth == 0 {
            self.was_enabled.store(old, Relaxed);
        }
        self.depth.store(depth + 1, Relaxed);
    }

    /// Exits one nesting level, unmasking interrupts if this was the
    /// outermost level and they were enabled before it.
    ///
    /// # Panics
    ///
    /// - If interrupts are enabled when this is called; something inside the
    ///   critical section unmasked them behind our back.
    /// - If there is no matching [`enter`](Self::enter).
    #[track_caller]
    pub fn exit(&self, ctrl: &impl Control) {
        if ctrl.is_enabled() {
            tracing::error!("interrupts enabled inside a critical section");
            panic!("pop_off: interruptible");
        }

        let depth = self.depth.load(Relaxed);
        if depth == 0 {
            tracing::error!("interrupt nesting underflow");
            panic!("pop_off: not in a critical section");
        }

        self.depth.store(depth - 1, Relaxed);
        if depth == 1 && self.was_enabled.load(Relaxed) {
            unsafe {
                // Safety: we are leaving the outermost critical section, and
                // interrupts were enabled before it was entered.
                ctrl.enable_irq();
            }
        }
    }

    /// Returns the current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Relaxed)
    }
}

impl Default for Nesting {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Nesting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nesting")
            .field("depth", &self.depth.load(Relaxed))
            .field("was_enabled", &self.was_enabled.load(Relaxed))
            .finish()
    }
}

// === impl IrqGuard ===

impl<P: Platform + ?Sized> Drop for IrqGuard<'_, P> {
    fn drop(&mut self) {
        self.platform.nesting().exit(self.platform.interrupts());
    }
}

impl<P: Platform + ?Sized> fmt::Debug for IrqGuard<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqGuard")
            .field("nesting", self.platform.nesting())
            .finish()
    }
}
