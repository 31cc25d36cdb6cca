//! The instrumented spinlock.
//!
//! [`Spinlock`] is a busy-waiting mutual exclusion lock that masks
//! interrupts on the acquiring execution unit for as long as it is held.
//! Every acquisition measures how long it spun before winning the lock, and
//! every release measures how long the lock was held; both measurements are
//! forwarded to the [`Registry`] the lock reports to, if any.
//!
//! Timestamps bracket the critical section itself. The wait clock starts at
//! the first failed test-and-set and stops as soon as the lock is won, and the
//! hold clock starts at that same reading. Statistics bookkeeping happens
//! *after* the hold baseline is taken on acquire and *before* the lock is
//! given up on release, so it is charged to the holder and never to the next
//! acquirer's wait.
use crate::{
    loom::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering::*},
    Config, Platform, Registry,
};
use core::{fmt, marker::PhantomData};
use hal_core::{time::Clock, CpuId};
use maitake_sync::util::Backoff;

/// A busy-waiting mutual exclusion lock that records wait and hold times.
///
/// # Fatal misuse
///
/// Acquiring a lock that the current execution unit already holds, or
/// releasing a lock that it does not hold, is a broken invariant rather than
/// a recoverable condition, and panics.
///
/// # Examples
///
/// ```
/// use lockstat::{hosted::Hosted, Config, Registry};
///
/// let platform = Hosted::new();
/// let registry = Registry::new(&platform, Config::new());
/// registry.init();
///
/// let lock = registry.new_lock("tickslock");
/// {
///     let _guard = lock.lock();
///     assert!(lock.holding());
/// }
/// assert!(!lock.holding());
///
/// let stats = registry.snapshot().next().unwrap();
/// assert_eq!(stats.name.as_str(), "tickslock");
/// assert_eq!(stats.acquire_count, 1);
/// ```
pub struct Spinlock<'a, P: Platform> {
    locked: AtomicBool,
    /// Index of the holding execution unit, or `NO_HOLDER`.
    holder: AtomicUsize,
    /// Timestamp taken when the current holder won the lock.
    acquired_at: AtomicU64,
    /// The registry slot this lock's statistics live in, once resolved.
    slot: AtomicUsize,
    name: &'static str,
    no_track: bool,
    platform: &'a P,
    stats: Option<&'a Registry<'a, P>>,
}

/// An RAII guard that releases a [`Spinlock`] when dropped.
///
/// This is returned by [`Spinlock::lock`] and [`Spinlock::try_lock`]. The
/// guard is `!Send`: the lock must be released by the execution unit that
/// acquired it.
#[must_use = "if unused, the lock will be released immediately"]
pub struct SpinlockGuard<'lock, 'a, P: Platform> {
    lock: &'lock Spinlock<'a, P>,
    _not_send: PhantomData<*mut ()>,
}

const NO_HOLDER: usize = usize::MAX;

pub(crate) const UNRESOLVED: usize = usize::MAX;
pub(crate) const UNTRACKED: usize = usize::MAX - 1;

/// Applies the negligible-wait threshold to a measured wait.
///
/// Waits at or below `negligible` ticks are timer granularity noise and are
/// floored to zero, so that they are not counted as contention.
#[inline]
#[must_use]
pub fn observed_wait(start: u64, end: u64, negligible: u64) -> u64 {
    let wait = end.saturating_sub(start);
    if wait <= negligible {
        0
    } else {
        wait
    }
}

// === impl Spinlock ===

impl<'a, P: Platform> Spinlock<'a, P> {
    loom_const_fn! {
        /// Returns a new, unlocked `Spinlock` named `name`.
        ///
        /// The lock does not report statistics anywhere until it is given a
        /// registry with [`with_stats`](Self::with_stats).
        #[must_use]
        pub fn new(name: &'static str, platform: &'a P) -> Self {
            Self {
                locked: AtomicBool::new(false),
                holder: AtomicUsize::new(NO_HOLDER),
                acquired_at: AtomicU64::new(0),
                slot: AtomicUsize::new(UNRESOLVED),
                name,
                no_track: false,
                platform,
                stats: None,
            }
        }
    }

    /// Reports this lock's acquisitions and releases to `registry`.
    #[must_use]
    pub fn with_stats(self, registry: &'a Registry<'a, P>) -> Self {
        Self {
            stats: Some(registry),
            ..self
        }
    }

    /// Marks this lock as "do not track": it will never appear in a
    /// registry, however often it is acquired.
    #[must_use]
    pub fn untracked(self) -> Self {
        Self {
            no_track: true,
            ..self
        }
    }

    /// Returns this lock's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the platform this lock runs on.
    #[must_use]
    pub fn platform(&self) -> &'a P {
        self.platform
    }

    /// Returns `true` unless this lock was marked [`untracked`](Self::untracked).
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        !self.no_track
    }

    /// Returns `true` if *any* execution unit currently holds this lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }

    /// Acquires the lock, spinning until it is available.
    ///
    /// Interrupts on the current execution unit are masked before the lock
    /// state is touched, and stay masked until the matching
    /// [`release`](Self::release).
    ///
    /// # Panics
    ///
    /// If the current execution unit already holds this lock.
    #[track_caller]
    pub fn acquire(&self) {
        self.platform.nesting().enter(self.platform.interrupts());
        let cpu = self.platform.current_cpu();
        if self.held_by(cpu) {
            self.fatal("acquire", "already held by this execution unit", cpu);
        }

        let clock = self.platform.clock();
        let (acquired_at, wait) = if test_dbg!(self.locked.swap(true, Acquire)) {
            let start = clock.now();
            let mut boff = Backoff::new();
            while self.locked.swap(true, Acquire) {
                while self.locked.load(Relaxed) {
                    boff.spin();
                }
            }
            let end = clock.now();
            (end, observed_wait(start, end, self.negligible_wait()))
        } else {
            (clock.now(), 0)
        };

        fence(SeqCst);

        self.holder.store(cpu.index(), Relaxed);
        self.acquired_at.store(acquired_at, Relaxed);
        test_debug!(lock = self.name, %cpu, wait, "acquired");

        if let Some(stats) = self.stats {
            stats.record_acquire(self, wait);
        }
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Returns `true` if the lock was acquired, in which case it must be
    /// released with [`release`](Self::release). A successful attempt is
    /// recorded as an uncontended acquisition; a failed attempt is not
    /// recorded at all.
    ///
    /// # Panics
    ///
    /// If the current execution unit already holds this lock.
    #[track_caller]
    pub fn try_acquire(&self) -> bool {
        self.platform.nesting().enter(self.platform.interrupts());
        let cpu = self.platform.current_cpu();
        if self.held_by(cpu) {
            self.fatal("try_acquire", "already held by this execution unit", cpu);
        }

        if test_dbg!(self.locked.swap(true, Acquire)) {
            self.platform.nesting().exit(self.platform.interrupts());
            return false;
        }

        let acquired_at = self.platform.clock().now();
        fence(SeqCst);
        self.holder.store(cpu.index(), Relaxed);
        self.acquired_at.store(acquired_at, Relaxed);

        if let Some(stats) = self.stats {
            stats.record_acquire(self, 0);
        }
        true
    }

    /// Releases the lock, then unmasks interrupts if this was the outermost
    /// critical section on this execution unit.
    ///
    /// # Panics
    ///
    /// If the current execution unit does not hold this lock.
    #[track_caller]
    pub fn release(&self) {
        let cpu = self.platform.current_cpu();
        if !self.held_by(cpu) {
            self.fatal("release", "not held by this execution unit", cpu);
        }

        let hold_time = self
            .platform
            .clock()
            .since(self.acquired_at.load(Relaxed));
        if let Some(stats) = self.stats {
            stats.record_release(self, hold_time);
        }
        test_debug!(lock = self.name, %cpu, hold_time, "releasing");

        self.holder.store(NO_HOLDER, Relaxed);
        fence(SeqCst);
        test_dbg!(self.locked.store(false, Release));

        self.platform.nesting().exit(self.platform.interrupts());
    }

    /// Returns `true` if the current execution unit holds this lock.
    ///
    /// The answer is only meaningful if interrupts are already masked on
    /// the calling unit. Otherwise the caller may be migrated between the
    /// check and acting on its result. This precondition is not checked.
    #[must_use]
    pub fn holding(&self) -> bool {
        self.held_by(self.platform.current_cpu())
    }

    /// Acquires the lock, returning a guard that releases it when dropped.
    #[track_caller]
    pub fn lock(&self) -> SpinlockGuard<'_, 'a, P> {
        self.acquire();
        SpinlockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire the lock without spinning, returning a guard if
    /// it was acquired.
    #[track_caller]
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, 'a, P>> {
        if self.try_acquire() {
            Some(SpinlockGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Returns the timestamp at which the current holder won the lock.
    pub(crate) fn acquired_at(&self) -> u64 {
        self.acquired_at.load(Relaxed)
    }

    pub(crate) fn cached_slot(&self) -> usize {
        self.slot.load(Acquire)
    }

    pub(crate) fn cache_slot(&self, slot: usize) {
        self.slot.store(slot, Release);
    }

    fn held_by(&self, cpu: CpuId) -> bool {
        self.locked.load(Relaxed) && self.holder.load(Relaxed) == cpu.index()
    }

    fn negligible_wait(&self) -> u64 {
        self.stats
            .map(|stats| stats.config().negligible_wait())
            .unwrap_or(Config::DEFAULT_NEGLIGIBLE_WAIT)
    }

    #[cold]
    #[track_caller]
    fn fatal(&self, op: &'static str, what: &'static str, cpu: CpuId) -> ! {
        tracing::error!(lock = self.name, %cpu, "{op}: {what}");
        panic!("{op}: lock {:?} {what} ({cpu})", self.name);
    }
}

impl<P: Platform> fmt::Debug for Spinlock<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let holder = self.holder.load(Relaxed);
        f.debug_struct("Spinlock")
            .field("name", &self.name)
            .field("locked", &self.locked.load(Relaxed))
            .field(
                "holder",
                &(holder != NO_HOLDER).then(|| CpuId::new(holder)),
            )
            .field("tracked", &!self.no_track)
            .field("stats", &self.stats.is_some())
            .field("platform", &P::NAME)
            .finish()
    }
}

// === impl SpinlockGuard ===

impl<P: Platform> SpinlockGuard<'_, '_, P> {
    /// Returns the name of the lock this guard holds.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.lock.name
    }
}

impl<P: Platform> Drop for SpinlockGuard<'_, '_, P> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<P: Platform> fmt::Debug for SpinlockGuard<'_, '_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinlockGuard")
            .field("lock", &self.lock.name)
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::hosted::{self, Hosted, ManualClock};
    use hal_core::Architecture;
    use std::{sync::Barrier, thread};

    #[test]
    fn negligible_waits_are_floored() {
        assert_eq!(observed_wait(100, 100, 1), 0);
        assert_eq!(observed_wait(100, 101, 1), 0);
        assert_eq!(observed_wait(100, 102, 1), 2);
        assert_eq!(observed_wait(100, 110, 10), 0);
        // a clock that goes backwards is not contention
        assert_eq!(observed_wait(100, 50, 1), 0);
    }

    #[test]
    fn masks_interrupts_while_held() {
        let _trace = crate::test_util::trace_init();
        let platform = Hosted::new();
        let lock = Spinlock::new("cons", &platform);

        assert!(hosted::interrupts_enabled());
        lock.acquire();
        assert!(!hosted::interrupts_enabled());
        assert!(lock.holding());
        assert!(lock.is_locked());
        lock.release();
        assert!(hosted::interrupts_enabled());
        assert!(!lock.holding());
        assert!(!lock.is_locked());
    }

    #[test]
    fn nested_locks_restore_interrupts_once() {
        let _trace = crate::test_util::trace_init();
        let platform = Hosted::new();
        let outer = Spinlock::new("proc", &platform);
        let inner = Spinlock::new("pid_lock", &platform);

        let a = outer.lock();
        let b = inner.lock();
        assert_eq!(platform.nesting().depth(), 2);
        drop(b);
        assert!(!hosted::interrupts_enabled());
        drop(a);
        assert!(hosted::interrupts_enabled());
        assert_eq!(platform.nesting().depth(), 0);
    }

    #[test]
    #[should_panic(expected = "already held by this execution unit")]
    fn reacquire_panics() {
        let platform = Hosted::new();
        let lock = Spinlock::new("kmem", &platform);
        lock.acquire();
        lock.acquire();
    }

    #[test]
    #[should_panic(expected = "not held by this execution unit")]
    fn release_unheld_panics() {
        let platform = Hosted::new();
        let lock = Spinlock::new("kmem", &platform);
        lock.release();
    }

    #[test]
    fn release_from_another_unit_panics() {
        let platform = Hosted::new();
        let lock = Spinlock::new("uart", &platform);
        lock.acquire();

        let res = thread::scope(|s| s.spawn(|| lock.release()).join());
        assert!(res.is_err(), "releasing from another thread must panic");
        assert!(lock.holding());
        lock.release();
    }

    #[test]
    fn try_lock_fails_while_held_elsewhere() {
        let _trace = crate::test_util::trace_init();
        let platform = Hosted::new();
        let lock = Spinlock::new("bcache", &platform);
        let held = Barrier::new(2);
        let done = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                let _guard = lock.lock();
                held.wait();
                done.wait();
            });

            held.wait();
            assert!(lock.try_lock().is_none());
            // a failed attempt must not leave interrupts masked
            assert!(hosted::interrupts_enabled());
            done.wait();
        });

        let guard = lock.try_lock();
        assert!(guard.is_some());
    }

    #[test]
    fn hold_time_brackets_the_critical_section() {
        let _trace = crate::test_util::trace_init();
        let platform = Hosted::with_clock(ManualClock::new());
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let lock = registry.new_lock("tickslock");

        lock.acquire();
        platform.clock().advance(50);
        lock.release();

        lock.acquire();
        platform.clock().advance(30);
        lock.release();

        let stats = registry.snapshot().next().expect("lock must be tracked");
        assert_eq!(stats.acquire_count, 2);
        assert_eq!(stats.contention_count, 0);
        assert_eq!(stats.total_hold_time, 80);
        assert_eq!(stats.max_hold_time, 50);
        assert_eq!(stats.total_wait_time, 0);
        assert_eq!(stats.last_acquire_time, 50);
    }

    /// Holds a lock while a second thread spins on it, advancing the clock
    /// by `ticks` before letting go.
    fn contended_by(ticks: u64) -> crate::RawRecord {
        let _trace = crate::test_util::trace_init();
        let platform = Hosted::with_clock(ManualClock::new());
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let lock = registry.new_lock("pid_lock");

        let held = lock.lock();
        let reads = platform.clock().reads();
        thread::scope(|s| {
            let waiter = s.spawn(|| drop(lock.lock()));
            // the waiter reads the clock only once its first attempt failed
            while platform.clock().reads() == reads {
                std::hint::spin_loop();
            }
            platform.clock().advance(ticks);
            drop(held);
            waiter.join().expect("waiter must not panic");
        });

        let stats = registry.snapshot().next().expect("lock must be tracked");
        stats
    }

    #[test]
    fn negligible_contended_wait_is_not_contention() {
        let stats = contended_by(1);
        assert_eq!(stats.acquire_count, 2);
        assert_eq!(stats.contention_count, 0);
        assert_eq!(stats.total_wait_time, 0);
        assert_eq!(stats.max_wait_time, 0);
    }

    #[test]
    fn contended_acquire_records_its_wait() {
        let stats = contended_by(2);
        assert_eq!(stats.acquire_count, 2);
        assert_eq!(stats.contention_count, 1);
        assert_eq!(stats.total_wait_time, 2);
        assert_eq!(stats.max_wait_time, 2);
        assert_eq!(stats.total_hold_time, 2);
    }

    #[test]
    fn mutual_exclusion() {
        let _trace = crate::test_util::trace_init();
        const THREADS: usize = 4;
        const ITERS: usize = 1000;

        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let lock = registry.new_lock("proc");
        let inside = AtomicBool::new(false);
        let count = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..ITERS {
                        let _guard = lock.lock();
                        assert!(!inside.swap(true, Relaxed), "two holders at once");
                        count.fetch_add(1, Relaxed);
                        inside.store(false, Relaxed);
                    }
                });
            }
        });

        assert_eq!(count.load(Relaxed), THREADS * ITERS);
        let stats = registry.snapshot().next().expect("lock must be tracked");
        assert_eq!(stats.acquire_count, (THREADS * ITERS) as u64);
        assert!(stats.contention_count <= stats.acquire_count);
    }
}
