//! Runtime configuration for a lock statistics [`Registry`](crate::Registry).

/// The maximum number of distinct lock names a registry can track.
///
/// This is the size of the registry's entry table. A [`Config`] may ask for
/// fewer slots, but never more.
pub const MAX_LOCKS: usize = 64;

/// Configures a lock statistics [`Registry`](crate::Registry).
///
/// # Examples
///
/// ```
/// use lockstat::Config;
///
/// let config = Config::new()
///     .with_capacity(16)
///     .with_negligible_wait(4);
/// assert_eq!(config.capacity(), 16);
/// assert_eq!(config.negligible_wait(), 4);
///
/// // capacity is clamped to the size of the entry table
/// assert_eq!(Config::new().with_capacity(1000).capacity(), lockstat::MAX_LOCKS);
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    capacity: usize,
    negligible_wait: u64,
}

impl Config {
    /// The default wait threshold, in clock ticks.
    ///
    /// A measured wait at or below this many ticks is timer noise, not
    /// contention.
    pub const DEFAULT_NEGLIGIBLE_WAIT: u64 = 1;

    /// Returns the default configuration: [`MAX_LOCKS`] slots, and a
    /// negligible-wait threshold of [`Self::DEFAULT_NEGLIGIBLE_WAIT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capacity: MAX_LOCKS,
            negligible_wait: Self::DEFAULT_NEGLIGIBLE_WAIT,
        }
    }

    /// Limits the registry to `capacity` distinct lock names.
    ///
    /// Values above [`MAX_LOCKS`] are clamped.
    #[must_use]
    pub const fn with_capacity(self, capacity: usize) -> Self {
        let capacity = if capacity > MAX_LOCKS {
            MAX_LOCKS
        } else {
            capacity
        };
        Self { capacity, ..self }
    }

    /// Sets the wait threshold at or below which a measured wait is recorded
    /// as zero.
    #[must_use]
    pub const fn with_negligible_wait(self, ticks: u64) -> Self {
        Self {
            negligible_wait: ticks,
            ..self
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn negligible_wait(&self) -> u64 {
        self.negligible_wait
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
