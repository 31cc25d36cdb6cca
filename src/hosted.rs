//! A [`Platform`] for running instrumented locks in an ordinary process.
//!
//! Each OS thread is treated as its own execution unit, with its own
//! simulated interrupt-enable flag and its own interrupt [`Nesting`] state.
//! Masking "interrupts" on a hosted thread has no effect on the process; it
//! only flips that thread's flag, so the nesting discipline can be observed
//! and tested.
use crate::{interrupt::Nesting, loom::sync::atomic::AtomicU64, Platform};
use core::{
    cell::Cell,
    sync::atomic::Ordering::{Acquire, Relaxed, Release},
};
use hal_core::{interrupt::Control, time::Clock, Architecture, CpuId};
use std::{sync::atomic::AtomicUsize, time::Instant};

/// A hosted platform, timestamping with the clock `C`.
#[derive(Debug, Default)]
pub struct Hosted<C = MonotonicClock> {
    clock: C,
}

/// The simulated interrupt controller of the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostedIrq {
    _p: (),
}

/// A clock that reads nanoseconds since it was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    base: Instant,
}

/// A clock that only moves when it is told to.
///
/// Useful for making hold and wait times deterministic in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    reads: AtomicU64,
}

struct Unit {
    cpu: CpuId,
    irq_enabled: Cell<bool>,
    nesting: &'static Nesting,
}

static NEXT_CPU: AtomicUsize = AtomicUsize::new(0);
static IRQ: HostedIrq = HostedIrq { _p: () };

std::thread_local! {
    static UNIT: Unit = Unit::new();
}

/// Returns `true` if the current thread's simulated interrupts are enabled.
#[must_use]
pub fn interrupts_enabled() -> bool {
    UNIT.with(|unit| unit.irq_enabled.get())
}

/// Returns the execution unit id assigned to the current thread.
#[must_use]
pub fn current_cpu() -> CpuId {
    UNIT.with(|unit| unit.cpu)
}

// === impl Hosted ===

impl Hosted {
    /// Returns a hosted platform using a [`MonotonicClock`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl<C> Hosted<C> {
    /// Returns a hosted platform using `clock` for timestamps.
    #[must_use]
    pub const fn with_clock(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock + Sync> Architecture for Hosted<C> {
    type InterruptCtrl = HostedIrq;
    type Clock = C;
    const NAME: &'static str = "hosted";

    fn interrupts(&self) -> &HostedIrq {
        &IRQ
    }

    fn clock(&self) -> &C {
        &self.clock
    }

    fn current_cpu(&self) -> CpuId {
        current_cpu()
    }
}

impl<C: Clock + Sync> Platform for Hosted<C> {
    fn nesting(&self) -> &Nesting {
        UNIT.with(|unit| unit.nesting)
    }
}

// === impl Unit ===

impl Unit {
    fn new() -> Self {
        let cpu = CpuId::new(NEXT_CPU.fetch_add(1, Relaxed));
        test_debug!(%cpu, "new hosted execution unit");
        Self {
            cpu,
            irq_enabled: Cell::new(true),
            // A thread's nesting state must outlive every lock it touches,
            // and thread-locals can't hand out `'static` references.
            nesting: Box::leak(Box::new(Nesting::new())),
        }
    }
}

// === impl HostedIrq ===

impl Control for HostedIrq {
    unsafe fn disable_irq(&self) {
        UNIT.with(|unit| unit.irq_enabled.set(false));
    }

    unsafe fn enable_irq(&self) {
        UNIT.with(|unit| unit.irq_enabled.set(true));
    }

    fn is_enabled(&self) -> bool {
        interrupts_enabled()
    }
}

// === impl MonotonicClock ===

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        u64::try_from(self.base.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

// === impl ManualClock ===

impl ManualClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    /// Returns how many times the clock has been read.
    ///
    /// A waiter that has been observed reading the clock has already taken
    /// its starting timestamp.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Acquire)
    }

    /// Moves the clock forward by `ticks`.
    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Relaxed);
    }

    /// Sets the clock to `now`.
    pub fn set(&self, now: u64) {
        self.now.store(now, Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        let now = self.now.load(Relaxed);
        self.reads.fetch_add(1, Release);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn threads_are_distinct_units() {
        let here = current_cpu();
        let there = thread::spawn(current_cpu).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, current_cpu(), "ids are stable per thread");
    }

    #[test]
    fn critical_guard_toggles_this_thread_only() {
        let platform = Hosted::new();
        assert!(interrupts_enabled());
        {
            let _guard = platform.interrupts().enter_critical();
            assert!(!interrupts_enabled());
            assert!(thread::spawn(interrupts_enabled).join().unwrap());
        }
        assert!(interrupts_enabled());
    }

    #[test]
    fn push_off_nests() {
        let platform = Hosted::new();
        let outer = crate::push_off(&platform);
        let inner = crate::push_off(&platform);
        assert_eq!(platform.nesting().depth(), 2);
        drop(inner);
        assert!(!interrupts_enabled());
        drop(outer);
        assert!(interrupts_enabled());
    }

    #[test]
    fn manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), 0);
        clock.advance(10);
        assert_eq!(clock.since(4), 6);
        clock.set(3);
        assert_eq!(clock.since(4), 0, "`since` saturates");
        assert_eq!(clock.reads(), 3);
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
