#![cfg_attr(target_os = "none", no_std)]
//! Hardware abstraction traits consumed by the `lockstat` lock core.
//!
//! The lock core never touches hardware directly. Instead, an
//! [`Architecture`] implementation tells it which execution unit is running
//! and how to mask that unit's interrupts. Timestamps come from its
//! [`time::Clock`].

pub mod cpu;
pub mod interrupt;
pub mod time;

pub use self::cpu::CpuId;

/// A platform the lock core can run on.
///
/// Implementations must be shareable between every execution unit, since a
/// single `Architecture` value is referenced by every lock.
pub trait Architecture: Sync {
    /// This platform's interrupt controller.
    type InterruptCtrl: interrupt::Control;

    /// This platform's timestamp source.
    type Clock: time::Clock;

    /// The name of the architecture, as a string.
    const NAME: &'static str;

    /// Returns the interrupt controller for the *current* execution unit.
    fn interrupts(&self) -> &Self::InterruptCtrl;

    /// Returns the clock used to timestamp lock acquisitions.
    fn clock(&self) -> &Self::Clock;

    /// Returns the identity of the execution unit this is called on.
    ///
    /// The result is only stable while interrupts are disabled; with
    /// interrupts enabled, the caller may be migrated to another unit.
    fn current_cpu(&self) -> CpuId;
}

impl<A: Architecture> Architecture for &'_ A {
    type InterruptCtrl = A::InterruptCtrl;
    type Clock = A::Clock;
    const NAME: &'static str = A::NAME;

    #[inline]
    fn interrupts(&self) -> &Self::InterruptCtrl {
        A::interrupts(self)
    }

    #[inline]
    fn clock(&self) -> &Self::Clock {
        A::clock(self)
    }

    #[inline]
    fn current_cpu(&self) -> CpuId {
        A::current_cpu(self)
    }
}
