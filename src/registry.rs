//! The lock statistics registry.
//!
//! A [`Registry`] is a fixed-capacity table of per-lock-name counters. Locks
//! that report to it are assigned an [`Entry`] the first time they are
//! acquired. Entries are never removed; once the table is full, locks with
//! new names are silently not tracked.
//!
//! # Update discipline
//!
//! Additive counters (acquires, contentions, total hold and wait time) are
//! updated with `fetch_add`, so concurrent updates from different execution
//! units are never lost. Maximums are updated with `fetch_max`. No ordering is
//! guaranteed *between* the counters of one entry: a reader may observe an
//! acquire without its matching hold time. Consumers must treat each counter
//! as correct in isolation, not the entry as a consistent whole.
use crate::{
    loom::{
        cell::UnsafeCell,
        sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::*},
    },
    record::{LockName, RawRecord},
    spin::{Spinlock, UNRESOLVED, UNTRACKED},
    Config, Platform, MAX_LOCKS,
};
use core::{fmt, ptr};

/// A bounded table of lock statistics.
///
/// The registry is guarded by its own [`Spinlock`], which is never tracked:
/// recording statistics about the guard would recurse into the registry.
///
/// A registry must be [initialized](Self::init) before it records anything.
/// Acquisitions that race with initialization are not recorded.
pub struct Registry<'a, P: Platform> {
    lock: Spinlock<'a, P>,
    enabled: AtomicBool,
    len: AtomicUsize,
    config: Config,
    entries: [Entry; MAX_LOCKS],
}

/// Statistics for every lock sharing one name.
pub struct Entry {
    /// Written once, while holding the registry lock, before the entry is
    /// published by bumping the registry's length.
    name: UnsafeCell<LockName>,
    enabled: AtomicBool,
    acquire_count: AtomicU64,
    contention_count: AtomicU64,
    total_hold_time: AtomicU64,
    total_wait_time: AtomicU64,
    max_hold_time: AtomicU64,
    max_wait_time: AtomicU64,
    last_acquire_time: AtomicU64,
}

// === impl Registry ===

impl<'a, P: Platform> Registry<'a, P> {
    /// The name of the registry's own guard lock.
    pub const LOCK_NAME: &'static str = "lockstat";

    /// Returns a new, uninitialized registry.
    ///
    /// Nothing is recorded until [`init`](Self::init) is called.
    #[must_use]
    pub fn new(platform: &'a P, config: Config) -> Self {
        Self {
            lock: Spinlock::new(Self::LOCK_NAME, platform).untracked(),
            enabled: AtomicBool::new(false),
            len: AtomicUsize::new(0),
            config,
            entries: core::array::from_fn(|_| Entry::new()),
        }
    }

    /// Initializes the registry, zeroing every entry and enabling tracking.
    ///
    /// Tracking is only switched on once every entry has been reset, so
    /// acquisitions that race with startup never touch a half-reset table.
    /// Calling `init` on an already-initialized registry does nothing.
    pub fn init(&self) {
        let _guard = self.lock.lock();
        if self.enabled.load(Acquire) {
            tracing::warn!("lock statistics registry already initialized");
            return;
        }

        for entry in &self.entries {
            entry.reset();
        }
        self.len.store(0, Release);
        self.enabled.store(true, Release);

        tracing::info!(
            capacity = self.config.capacity(),
            negligible_wait = self.config.negligible_wait(),
            platform = P::NAME,
            "lock statistics enabled"
        );
    }

    /// Returns `true` once [`init`](Self::init) has completed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Acquire)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the number of entries in use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a new lock named `name` that reports to this registry.
    #[must_use]
    pub fn new_lock(&'a self, name: &'static str) -> Spinlock<'a, P> {
        Spinlock::new(name, self.lock.platform()).with_stats(self)
    }

    /// Returns `true` if `lock` is this registry's own guard lock.
    #[must_use]
    pub fn is_guard(&self, lock: &Spinlock<'_, P>) -> bool {
        ptr::eq(
            lock as *const Spinlock<'_, P> as *const (),
            &self.lock as *const Spinlock<'_, P> as *const (),
        )
    }

    /// Returns the index of the entry for `lock`'s name, creating one if no
    /// entry for that name exists yet.
    ///
    /// Returns `None` without taking any lock if `lock` is the registry's
    /// own guard. Also returns `None` if the name is new and every slot is
    /// taken; that lock is simply not tracked, and all other locks carry on
    /// as normal.
    ///
    /// The scan for an existing entry and the creation of a new one happen
    /// under a single acquisition of the registry lock, so two execution
    /// units racing to register the same name always end up sharing one
    /// entry.
    pub fn get_or_create_index(&self, lock: &Spinlock<'_, P>) -> Option<usize> {
        if self.is_guard(lock) {
            return None;
        }

        let name = LockName::new(lock.name());
        let _guard = self.lock.lock();
        let len = self.len.load(Relaxed);

        if let Some(idx) = self.entries[..len]
            .iter()
            .position(|entry| entry.name() == name)
        {
            return Some(idx);
        }

        if len >= self.config.capacity() {
            tracing::debug!(lock = %name, len, "lock statistics registry full, not tracking");
            return None;
        }

        let entry = &self.entries[len];
        entry.claim(name);
        self.len.store(len + 1, Release);
        test_debug!(lock = %name, idx = len, "registered lock");
        Some(len)
    }

    /// Returns the entry at `idx`, if it is in use.
    #[must_use]
    pub fn entry(&self, idx: usize) -> Option<&Entry> {
        self.entries[..self.len()].get(idx)
    }

    /// Records an acquisition of `lock` that waited `wait_time` ticks.
    ///
    /// Does nothing if the registry is not yet enabled, if `lock` is marked
    /// "do not track", or if `lock` has no entry and none can be created.
    pub fn record_acquire(&self, lock: &Spinlock<'_, P>, wait_time: u64) {
        if let Some(entry) = self.tracked_entry(lock) {
            entry.record_acquire(wait_time, lock.acquired_at());
        }
    }

    /// Records a release of `lock` after holding it for `hold_time` ticks.
    ///
    /// Gated exactly like [`record_acquire`](Self::record_acquire).
    pub fn record_release(&self, lock: &Spinlock<'_, P>, hold_time: u64) {
        if let Some(entry) = self.tracked_entry(lock) {
            entry.record_release(hold_time);
        }
    }

    /// Returns a best-effort copy of every entry in use, in registry order.
    ///
    /// Counters may be updated while the snapshot is being taken.
    pub fn snapshot(&self) -> impl Iterator<Item = RawRecord> + '_ {
        self.entries[..self.len()].iter().map(Entry::snapshot)
    }

    fn tracked_entry(&self, lock: &Spinlock<'_, P>) -> Option<&Entry> {
        if !self.enabled.load(Acquire) || !lock.is_tracked() {
            return None;
        }

        let idx = match lock.cached_slot() {
            UNTRACKED => return None,
            UNRESOLVED => {
                let idx = self.get_or_create_index(lock);
                lock.cache_slot(idx.unwrap_or(UNTRACKED));
                idx?
            }
            idx => idx,
        };

        Some(&self.entries[idx])
    }
}

impl<P: Platform> fmt::Display for Registry<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::export::write_dump(f, self.snapshot())
    }
}

impl<P: Platform> fmt::Debug for Registry<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("enabled", &self.is_enabled())
            .field("len", &self.len())
            .field("config", &self.config)
            .field("lock", &self.lock)
            .finish()
    }
}

// === impl Entry ===

impl Entry {
    fn new() -> Self {
        Self {
            name: UnsafeCell::new(LockName::EMPTY),
            enabled: AtomicBool::new(false),
            acquire_count: AtomicU64::new(0),
            contention_count: AtomicU64::new(0),
            total_hold_time: AtomicU64::new(0),
            total_wait_time: AtomicU64::new(0),
            max_hold_time: AtomicU64::new(0),
            max_wait_time: AtomicU64::new(0),
            last_acquire_time: AtomicU64::new(0),
        }
    }

    /// Returns the name of the lock(s) this entry tracks.
    #[must_use]
    pub fn name(&self) -> LockName {
        self.name.with(|name| unsafe {
            // Safety: the name is only written while the entry is
            // unpublished, and entries are only reachable once published.
            *name
        })
    }

    /// Counts one acquisition that waited `wait_time` ticks, made at
    /// `timestamp`.
    pub fn record_acquire(&self, wait_time: u64, timestamp: u64) {
        self.acquire_count.fetch_add(1, Relaxed);
        if wait_time > 0 {
            self.contention_count.fetch_add(1, Relaxed);
            self.total_wait_time.fetch_add(wait_time, Relaxed);
            self.max_wait_time.fetch_max(wait_time, Relaxed);
        }
        self.last_acquire_time.store(timestamp, Relaxed);
    }

    /// Counts one release after holding the lock for `hold_time` ticks.
    pub fn record_release(&self, hold_time: u64) {
        self.total_hold_time.fetch_add(hold_time, Relaxed);
        self.max_hold_time.fetch_max(hold_time, Relaxed);
    }

    /// Returns a best-effort copy of this entry's counters.
    #[must_use]
    pub fn snapshot(&self) -> RawRecord {
        RawRecord {
            name: self.name(),
            acquire_count: self.acquire_count.load(Relaxed),
            contention_count: self.contention_count.load(Relaxed),
            total_hold_time: self.total_hold_time.load(Relaxed),
            total_wait_time: self.total_wait_time.load(Relaxed),
            max_hold_time: self.max_hold_time.load(Relaxed),
            max_wait_time: self.max_wait_time.load(Relaxed),
            last_acquire_time: self.last_acquire_time.load(Relaxed),
            enabled: self.enabled.load(Relaxed),
        }
    }

    /// Takes an unused slot for `name`. Must hold the registry lock.
    fn claim(&self, name: LockName) {
        self.name.with_mut(|slot| unsafe {
            // Safety: the registry lock is held and the entry is not yet
            // published, so nobody else can be reading the name.
            *slot = name
        });
        self.enabled.store(true, Relaxed);
    }

    /// Zeroes the slot. Must hold the registry lock, with tracking disabled.
    fn reset(&self) {
        self.name.with_mut(|slot| unsafe {
            // Safety: tracking is disabled, so no published entries exist.
            *slot = LockName::EMPTY
        });
        self.enabled.store(false, Relaxed);
        for counter in [
            &self.acquire_count,
            &self.contention_count,
            &self.total_hold_time,
            &self.total_wait_time,
            &self.max_hold_time,
            &self.max_wait_time,
            &self.last_acquire_time,
        ] {
            counter.store(0, Relaxed);
        }
    }
}

// Safety: the only non-atomic field is the name, which is written while the
// entry is unpublished and read-only afterwards.
unsafe impl Sync for Entry {}
unsafe impl Send for Entry {}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.snapshot(), f)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::hosted::Hosted;
    use std::thread;

    #[test]
    fn counts_are_exact_under_concurrency() {
        let _trace = crate::test_util::trace_init();
        const THREADS: usize = 8;
        const PAIRS: usize = 500;

        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let lock = registry.new_lock("bcache");

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..PAIRS {
                        lock.acquire();
                        lock.release();
                    }
                });
            }
        });

        let stats = registry.snapshot().next().expect("lock must be tracked");
        assert_eq!(stats.acquire_count, (THREADS * PAIRS) as u64);
        assert!(stats.contention_count <= stats.acquire_count);
        assert!(stats.max_wait_time <= stats.total_wait_time);
        assert!(stats.max_hold_time <= stats.total_hold_time);
    }

    #[test]
    fn locks_with_the_same_name_share_an_entry() {
        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let a = registry.new_lock("proc");
        let b = registry.new_lock("proc");
        let c = registry.new_lock("kmem");

        for lock in [&a, &b, &c, &a] {
            lock.acquire();
            lock.release();
        }

        let records: Vec<_> = registry.snapshot().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_str(), "proc");
        assert_eq!(records[0].acquire_count, 3);
        assert_eq!(records[1].name.as_str(), "kmem");
        assert_eq!(records[1].acquire_count, 1);

        let idx = registry.get_or_create_index(&b).expect("proc is tracked");
        assert_eq!(idx, 0);
        assert_eq!(registry.entry(idx).map(Entry::name), Some(LockName::new("proc")));
        assert!(registry.entry(2).is_none());
    }

    #[test]
    fn names_differing_after_a_nul_share_an_entry() {
        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let a = registry.new_lock("dev\0a");
        let b = registry.new_lock("dev\0b");

        for lock in [&a, &b] {
            lock.acquire();
            lock.release();
        }

        let records: Vec<_> = registry.snapshot().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_str(), "dev");
        assert_eq!(records[0].acquire_count, 2);
    }

    #[test]
    fn untracked_locks_never_get_an_entry() {
        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let lock = registry.new_lock("uart_tx").untracked();

        for _ in 0..100 {
            lock.acquire();
            lock.release();
        }

        assert!(registry.is_empty());
        assert_eq!(registry.get_or_create_index(&lock), Some(0), "name lookups still work");
    }

    #[test]
    fn guard_lock_is_never_an_entry() {
        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        registry.init();

        assert_eq!(registry.get_or_create_index(&registry.lock), None);
        registry.record_acquire(&registry.lock, 10);
        registry.record_release(&registry.lock, 10);

        // a *different* lock that happens to share the guard's name is fine
        let imposter = registry.new_lock(Registry::<Hosted>::LOCK_NAME);
        imposter.acquire();
        imposter.release();
        assert_eq!(registry.len(), 1);
        assert!(registry
            .snapshot()
            .all(|record| record.acquire_count == 1));
    }

    #[test]
    fn nothing_recorded_before_init() {
        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        let lock = registry.new_lock("tickslock");

        lock.acquire();
        lock.release();
        assert!(!registry.is_enabled());
        assert!(registry.is_empty());

        registry.init();
        lock.acquire();
        lock.release();
        assert_eq!(registry.snapshot().next().map(|r| r.acquire_count), Some(1));
    }

    #[test]
    fn overflow_drops_new_names_silently() {
        let _trace = crate::test_util::trace_init();
        const CAPACITY: usize = 4;
        const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new().with_capacity(CAPACITY));
        registry.init();
        let locks = NAMES.map(|name| registry.new_lock(name));

        for _ in 0..3 {
            for lock in &locks {
                lock.acquire();
                lock.release();
            }
        }

        let records: Vec<_> = registry.snapshot().collect();
        assert_eq!(records.len(), CAPACITY);
        for (record, name) in records.iter().zip(NAMES) {
            assert_eq!(record.name.as_str(), name);
            assert_eq!(record.acquire_count, 3);
        }
        assert_eq!(registry.get_or_create_index(&locks[4]), None);
        assert_eq!(registry.get_or_create_index(&locks[0]), Some(0));
    }

    #[test]
    fn full_default_capacity() {
        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let names: Vec<&'static str> = (0..=MAX_LOCKS)
            .map(|i| &*Box::leak(format!("lock{i}").into_boxed_str()))
            .collect();

        for &name in &names {
            let lock = registry.new_lock(name);
            lock.acquire();
            lock.release();
        }

        assert_eq!(registry.len(), MAX_LOCKS);
        let last = registry.new_lock(names[MAX_LOCKS]);
        assert_eq!(registry.get_or_create_index(&last), None);
    }

    #[test]
    fn entry_contention_accounting() {
        let entry = Entry::new();
        entry.record_acquire(0, 5);
        entry.record_acquire(7, 10);
        entry.record_acquire(3, 20);
        entry.record_release(40);
        entry.record_release(15);

        let stats = entry.snapshot();
        assert_eq!(stats.acquire_count, 3);
        assert_eq!(stats.contention_count, 2);
        assert_eq!(stats.total_wait_time, 10);
        assert_eq!(stats.max_wait_time, 7);
        assert_eq!(stats.total_hold_time, 55);
        assert_eq!(stats.max_hold_time, 40);
        assert_eq!(stats.last_acquire_time, 20);
    }

    #[test]
    fn display_dumps_enabled_entries() {
        let platform = Hosted::new();
        let registry = Registry::new(&platform, Config::new());
        registry.init();
        let lock = registry.new_lock("cons");
        lock.acquire();
        lock.release();

        let dump = registry.to_string();
        assert!(dump.starts_with("=== Lock Profiling Statistics ==="));
        assert!(dump.contains("Lock: cons\n  Acquires:    1\n  Contentions: 0\n"));
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use crate::loom::{self, sync::Arc, thread};

    #[test]
    fn concurrent_updates_are_not_lost() {
        loom::model(|| {
            let entry = Arc::new(Entry::new());
            let threads: Vec<_> = [(3, 40), (9, 25)]
                .into_iter()
                .map(|(wait, hold)| {
                    let entry = entry.clone();
                    thread::spawn(move || {
                        entry.record_acquire(wait, 1);
                        entry.record_release(hold);
                    })
                })
                .collect();
            entry.record_acquire(0, 2);
            entry.record_release(5);

            for t in threads {
                t.join().unwrap();
            }

            let stats = entry.snapshot();
            assert_eq!(stats.acquire_count, 3);
            assert_eq!(stats.contention_count, 2);
            assert_eq!(stats.total_wait_time, 12);
            assert_eq!(stats.max_wait_time, 9);
            assert_eq!(stats.total_hold_time, 70);
            assert_eq!(stats.max_hold_time, 40);
        });
    }
}
