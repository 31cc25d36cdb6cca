//! Timestamp sources.

/// A monotonic timestamp source.
///
/// Timestamps are opaque ticks (cycles, nanoseconds, timer increments). The
/// lock core only ever subtracts two readings taken on the same platform, so
/// the unit does not matter as long as it is consistent.
pub trait Clock {
    /// Returns the current timestamp.
    fn now(&self) -> u64;

    /// Returns the number of ticks elapsed since `earlier`.
    ///
    /// Saturates to zero if the clock appears to have gone backwards, which
    /// can happen when two readings come from different units whose counters
    /// are not perfectly synchronized.
    #[inline]
    fn since(&self, earlier: u64) -> u64 {
        self.now().saturating_sub(earlier)
    }
}

impl<C: Clock + ?Sized> Clock for &'_ C {
    #[inline]
    fn now(&self) -> u64 {
        C::now(self)
    }
}
