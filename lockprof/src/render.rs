//! Report formats.
//!
//! Every renderer borrows one ranked slice of [`Analyzed`] records, so
//! printing more than one format from a single snapshot can never disagree.
//! Inactive records (no acquisitions) are skipped everywhere.
use crate::{
    analysis::{Analyzed, Severity},
    term::{style, OwoColorize, Style},
};
use std::fmt;

/// Width of a heatmap bar, in columns.
pub const BAR_WIDTH: usize = 50;

const RULE: &str = "=================================================================";

/// The ranked table, with severity markers.
#[derive(Debug)]
pub struct Table<'a> {
    records: &'a [Analyzed],
    styles: Styles,
}

/// Comma-separated values, one header row plus one row per active lock.
#[derive(Debug)]
pub struct Csv<'a>(pub &'a [Analyzed]);

/// A contention heatmap, scaled to the most-contended lock, followed by a
/// per-lock detail view.
#[derive(Debug)]
pub struct Heatmap<'a> {
    records: &'a [Analyzed],
    styles: Styles,
}

#[derive(Debug, Clone, Copy)]
struct Styles {
    critical: Style,
    elevated: Style,
    normal: Style,
    bold: Style,
}

fn active(records: &[Analyzed]) -> impl Iterator<Item = &Analyzed> {
    records.iter().filter(|record| record.is_active())
}

// === impl Table ===

impl<'a> Table<'a> {
    #[must_use]
    pub fn new(records: &'a [Analyzed], color: bool) -> Self {
        Self {
            records,
            styles: Styles::new(color),
        }
    }
}

impl fmt::Display for Table<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(
            f,
            "| {:>4} | {:<20} | {:>8} | {:>6} | {:>17} | {:<3} |",
            "RANK".style(self.styles.bold),
            "LOCK NAME".style(self.styles.bold),
            "ACQ".style(self.styles.bold),
            "CONT%".style(self.styles.bold),
            "AVG HOLD (cycles)".style(self.styles.bold),
            "SEV".style(self.styles.bold),
        )?;
        writeln!(f, "{RULE}")?;

        // ranks count displayed rows only
        for (rank, record) in active(self.records).enumerate() {
            let severity = record.severity();
            let row = format!(
                "| {:>4} | {:<20} | {:>8} | {:>5}% | {:>17} | {:<3} |",
                rank + 1,
                record.raw.name,
                record.raw.acquire_count,
                record.contention_rate(),
                record.avg_hold_time,
                severity,
            );
            writeln!(f, "{}", row.style(self.styles.severity(severity)))?;
        }

        writeln!(f, "{RULE}")
    }
}

// === impl Csv ===

impl Csv<'_> {
    pub const HEADER: &'static str =
        "Lock_Name,Acquire_Count,Contention_Count,Contention_Rate_Percent,Avg_Hold_Time_Cycles";
}

impl fmt::Display for Csv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", Self::HEADER)?;
        for record in active(self.0) {
            writeln!(
                f,
                "{},{},{},{},{}",
                record.raw.name,
                record.raw.acquire_count,
                record.raw.contention_count,
                record.contention_rate(),
                record.avg_hold_time,
            )?;
        }
        Ok(())
    }
}

// === impl Heatmap ===

impl<'a> Heatmap<'a> {
    #[must_use]
    pub fn new(records: &'a [Analyzed], color: bool) -> Self {
        Self {
            records,
            styles: Styles::new(color),
        }
    }
}

impl fmt::Display for Heatmap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max = active(self.records)
            .map(|record| record.raw.contention_count)
            .max()
            .unwrap_or(0);

        writeln!(f, "========== LOCK CONTENTION HEATMAP ==========")?;
        writeln!(f)?;
        for record in active(self.records) {
            let contentions = record.raw.contention_count;
            let bar = Bar::new(contentions, max);
            writeln!(
                f,
                "{:<20} [{}] {contentions}",
                record.raw.name,
                bar.style(self.styles.severity(record.severity())),
            )?;
        }

        writeln!(f)?;
        writeln!(f, "========== DETAILED STATISTICS ==========")?;
        for record in active(self.records) {
            writeln!(f)?;
            writeln!(f, "Lock: {}", record.raw.name.style(self.styles.bold))?;
            writeln!(f, "  Acquires:    {}", record.raw.acquire_count)?;
            writeln!(
                f,
                "  Contentions: {} ({}%)",
                record.raw.contention_count,
                record.contention_rate(),
            )?;
            writeln!(f, "  Avg Hold:    {} cycles", record.avg_hold_time)?;
            writeln!(f, "  Avg Wait:    {} cycles", record.avg_wait_time())?;
            writeln!(f, "  Max Hold:    {} cycles", record.raw.max_hold_time)?;
            writeln!(f, "  Max Wait:    {} cycles", record.raw.max_wait_time)?;
        }
        Ok(())
    }
}

/// A [`BAR_WIDTH`]-column bar, filled in proportion to `value / max`.
struct Bar {
    filled: usize,
}

impl Bar {
    fn new(value: u64, max: u64) -> Self {
        let filled = u128::from(value) * BAR_WIDTH as u128 / u128::from(max.max(1));
        Self {
            filled: usize::try_from(filled).map_or(BAR_WIDTH, |n| n.min(BAR_WIDTH)),
        }
    }
}

impl fmt::Display for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.filled {
            f.write_str("#")?;
        }
        for _ in self.filled..BAR_WIDTH {
            f.write_str(" ")?;
        }
        Ok(())
    }
}

// === impl Styles ===

impl Styles {
    fn new(color: bool) -> Self {
        let if_color = |s: Style| if color { s } else { style() };
        Self {
            critical: if_color(style().red().bold()),
            elevated: if_color(style().yellow()),
            normal: if_color(style().green()),
            bold: if_color(style().bold()),
        }
    }

    fn severity(&self, severity: Severity) -> Style {
        match severity {
            Severity::Critical => self.critical,
            Severity::Elevated => self.elevated,
            Severity::Normal => self.normal,
        }
    }
}
