//! Derived metrics and ranking.
//!
//! All arithmetic is integer fixed-point: the contention rate is kept in
//! tenths of a percent, multiplying before dividing and truncating the
//! result, so reports are reproducible on every platform.
use lockstat::RawRecord;
use std::fmt;

/// Contention rates strictly above this (in tenths of a percent) are
/// critical.
pub const CRITICAL_THRESHOLD: u64 = 200;

/// Contention rates strictly above this (in tenths of a percent) are
/// elevated.
pub const ELEVATED_THRESHOLD: u64 = 100;

/// A raw record plus the metrics derived from it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Analyzed {
    pub raw: RawRecord,
    /// `contention_count * 1000 / acquire_count`.
    pub contention_x10: u64,
    /// `total_hold_time / acquire_count`.
    pub avg_hold_time: u64,
}

/// A contention rate in tenths of a percent, displayed with one decimal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Percent(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    Normal,
    Elevated,
    Critical,
}

/// Computes metrics for every record and ranks them by contention rate,
/// highest first.
///
/// The sort is stable: records with equal rates keep their snapshot order.
/// Records with no acquisitions are kept (with zeroed metrics) and sort
/// last among equals; renderers skip them.
pub fn analyze(records: impl IntoIterator<Item = RawRecord>) -> Vec<Analyzed> {
    let mut analyzed: Vec<_> = records.into_iter().map(Analyzed::new).collect();
    analyzed.sort_by(|a, b| b.contention_x10.cmp(&a.contention_x10));
    analyzed
}

// === impl Analyzed ===

impl Analyzed {
    #[must_use]
    pub fn new(raw: RawRecord) -> Self {
        let (contention_x10, avg_hold_time) = match raw.acquire_count {
            0 => (0, 0),
            acquires => (
                fixed_div(raw.contention_count, 1000, acquires),
                raw.total_hold_time / acquires,
            ),
        };
        Self {
            raw,
            contention_x10,
            avg_hold_time,
        }
    }

    /// Returns `true` if this lock was acquired at least once.
    ///
    /// Inactive records are omitted from every rendering.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.raw.acquire_count > 0
    }

    #[must_use]
    pub fn contention_rate(&self) -> Percent {
        Percent(self.contention_x10)
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        Severity::of(self.contention_x10)
    }

    /// Average wait per *contended* acquisition, or zero if the lock was
    /// never contended.
    #[must_use]
    pub fn avg_wait_time(&self) -> u64 {
        self.raw
            .total_wait_time
            .checked_div(self.raw.contention_count)
            .unwrap_or(0)
    }
}

/// `a * scale / b`, without overflowing the intermediate product.
fn fixed_div(a: u64, scale: u64, b: u64) -> u64 {
    let q = u128::from(a) * u128::from(scale) / u128::from(b);
    u64::try_from(q).unwrap_or(u64::MAX)
}

// === impl Percent ===

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = format!("{}.{}", self.0 / 10, self.0 % 10);
        f.pad(&pct)
    }
}

// === impl Severity ===

impl Severity {
    #[must_use]
    pub fn of(contention_x10: u64) -> Self {
        if contention_x10 > CRITICAL_THRESHOLD {
            Self::Critical
        } else if contention_x10 > ELEVATED_THRESHOLD {
            Self::Elevated
        } else {
            Self::Normal
        }
    }

    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::Normal => "-",
            Self::Elevated => "**",
            Self::Critical => "!!!",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.marker())
    }
}
