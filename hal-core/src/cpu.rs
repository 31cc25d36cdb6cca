use core::fmt;

/// Identifies a single execution unit (a CPU core, or a hart).
///
/// Ids are small integers assigned by the platform. They are only
/// meaningful relative to one [`Architecture`](crate::Architecture).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CpuId(usize);

impl CpuId {
    /// Returns a new `CpuId` for the execution unit with the given index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns this execution unit's index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}
