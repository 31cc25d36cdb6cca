/// An interrupt controller for the current execution unit.
///
/// Unlike a full platform interrupt controller, this only exposes the
/// operations the lock core needs: masking and unmasking *all* interrupts on
/// the calling execution unit, and asking whether they are currently masked.
pub trait Control {
    /// Disable interrupts on the current execution unit.
    ///
    /// # Safety
    ///
    /// Callers must eventually re-enable interrupts (or hand that
    /// responsibility to something that will), or the unit will stop
    /// servicing timers and devices.
    unsafe fn disable_irq(&self);

    /// Enable interrupts on the current execution unit.
    ///
    /// # Safety
    ///
    /// Enabling interrupts inside a critical section that expects them to be
    /// masked breaks that section's mutual exclusion against interrupt
    /// handlers.
    unsafe fn enable_irq(&self);

    /// Returns `true` if interrupts are enabled on the current execution unit.
    fn is_enabled(&self) -> bool;

    /// Enter a critical section, returning a guard.
    ///
    /// Interrupts are unconditionally re-enabled when the guard is dropped.
    /// This does **not** nest; use the lock core's nesting guard when critical
    /// sections may overlap.
    fn enter_critical(&self) -> CriticalGuard<'_, Self> {
        unsafe {
            self.disable_irq();
        }
        CriticalGuard { ctrl: self }
    }
}

#[derive(Debug)]
#[must_use = "dropping a `CriticalGuard` immediately re-enables interrupts"]
pub struct CriticalGuard<'a, C: Control + ?Sized> {
    ctrl: &'a C,
}

// === impl CriticalGuard ===

impl<C: Control + ?Sized> Drop for CriticalGuard<'_, C> {
    fn drop(&mut self) {
        unsafe {
            self.ctrl.enable_irq();
        }
    }
}

impl<C: Control + ?Sized> Control for &'_ C {
    #[inline]
    unsafe fn disable_irq(&self) {
        C::disable_irq(self)
    }

    #[inline]
    unsafe fn enable_irq(&self) {
        C::enable_irq(self)
    }

    #[inline]
    fn is_enabled(&self) -> bool {
        C::is_enabled(self)
    }
}
