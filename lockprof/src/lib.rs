use color_eyre::{eyre::WrapErr, Help};
use lockstat::RawRecord;
use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

pub use color_eyre::eyre::Result;

pub mod analysis;
pub mod render;
pub mod term;
pub mod trace;
pub mod workload;

use self::{
    analysis::Analyzed,
    render::{Csv, Heatmap, Table},
};

#[derive(Debug, clap::Parser)]
#[command(
    name = "lockprof",
    version,
    about = "ranks exported lock statistics by contention"
)]
pub struct Options {
    /// A snapshot exported from a lock statistics registry, or `-` to read
    /// one from stdin.
    ///
    /// If this is not provided, a built-in stress workload is run and its
    /// statistics are analyzed instead.
    #[arg(value_name = "SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Print comma-separated values instead of a table.
    #[arg(short = 'c', long, conflicts_with = "both")]
    pub csv: bool,

    /// Print the table followed by comma-separated values.
    #[arg(short = 'b', long)]
    pub both: bool,

    /// Also print a contention heatmap and per-lock details.
    #[arg(long)]
    pub heatmap: bool,

    /// Write the raw snapshot to this path before analyzing it.
    #[arg(long, value_name = "PATH")]
    pub dump: Option<PathBuf>,

    #[command(flatten)]
    pub workload: workload::WorkloadOptions,

    #[command(flatten)]
    pub output: term::OutputOptions,
}

/// Which reports to print.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Format {
    Table,
    Csv,
    Both,
}

// === impl Options ===

impl Options {
    #[must_use]
    pub fn format(&self) -> Format {
        match (self.csv, self.both) {
            (_, true) => Format::Both,
            (true, false) => Format::Csv,
            (false, false) => Format::Table,
        }
    }

    /// Loads (or generates) a snapshot, analyzes it, and prints the selected
    /// reports to stdout.
    ///
    /// Returns exit code 1 if the snapshot has nothing to analyze.
    pub fn run(&self) -> Result<ExitCode> {
        let bytes = match self.snapshot.as_deref() {
            Some(path) => read_snapshot(path)?,
            None => self.workload.run()?,
        };

        if let Some(path) = self.dump.as_deref() {
            fs::write(path, &bytes)
                .wrap_err_with(|| format!("failed to write snapshot to `{}`", path.display()))?;
            tracing::info!(path = %path.display(), bytes = bytes.len(), "dumped snapshot");
        }

        let records = decode(&bytes)?;
        let analyzed = analysis::analyze(records);
        if !analyzed.iter().any(Analyzed::is_active) {
            eprintln!("lockprof: no lock statistics to analyze");
            return Ok(ExitCode::from(1));
        }

        let mut stdout = io::stdout().lock();
        self.report(&analyzed, &mut stdout)
            .wrap_err("failed to write report")?;
        Ok(ExitCode::SUCCESS)
    }

    /// Writes the selected reports for one analyzed snapshot.
    pub fn report(&self, analyzed: &[Analyzed], out: &mut impl Write) -> io::Result<()> {
        let color = self.output.color_reports();
        match self.format() {
            Format::Table => write!(out, "{}", Table::new(analyzed, color))?,
            Format::Csv => write!(out, "{}", Csv(analyzed))?,
            Format::Both => {
                write!(out, "{}", Table::new(analyzed, color))?;
                write!(out, "{}", Csv(analyzed))?;
            }
        }

        if self.heatmap {
            writeln!(out)?;
            write!(out, "{}", Heatmap::new(analyzed, color))?;
        }

        out.flush()
    }
}

/// Reads a snapshot file, or stdin if `path` is `-`.
pub fn read_snapshot(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut bytes = Vec::new();
        io::stdin()
            .read_to_end(&mut bytes)
            .wrap_err("failed to read snapshot from stdin")?;
        return Ok(bytes);
    }

    fs::read(path)
        .wrap_err_with(|| format!("failed to read snapshot `{}`", path.display()))
        .suggestion("run `lockprof --dump <PATH>` to produce a snapshot")
}

/// Decodes every record in a snapshot.
pub fn decode(bytes: &[u8]) -> Result<Vec<RawRecord>> {
    let records = RawRecord::decode_all(bytes)
        .enumerate()
        .map(|(i, record)| record.wrap_err_with(|| format!("failed to decode record {i}")))
        .collect::<Result<Vec<_>>>()
        .with_note(|| {
            format!(
                "a snapshot is a sequence of {}-byte records",
                lockstat::record::RECORD_SIZE
            )
        })?;
    tracing::debug!(records = records.len(), "decoded snapshot");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(std::iter::once("lockprof").chain(args.iter().copied()))
            .expect("arguments parse")
    }

    #[test]
    fn format_flags() {
        assert_eq!(parse(&[]).format(), Format::Table);
        assert_eq!(parse(&["-c"]).format(), Format::Csv);
        assert_eq!(parse(&["-b"]).format(), Format::Both);
        assert_eq!(parse(&["--both", "--heatmap"]).format(), Format::Both);
        assert!(Options::try_parse_from(["lockprof", "-c", "-b"]).is_err());
    }

    #[test]
    fn snapshot_and_workload_args() {
        let opts = parse(&["--workers", "2", "--iterations", "7", "snap.bin"]);
        assert_eq!(opts.snapshot.as_deref(), Some(Path::new("snap.bin")));
        assert_eq!(opts.workload.workers, 2);
        assert_eq!(opts.workload.iterations, 7);
    }

    #[test]
    fn both_prints_table_then_csv() {
        let opts = parse(&["-b", "--color", "never"]);
        let analyzed = analysis::analyze([RawRecord {
            name: lockstat::LockName::new("bcache"),
            acquire_count: 8,
            contention_count: 3,
            total_hold_time: 400,
            enabled: true,
            ..RawRecord::default()
        }]);

        let mut out = Vec::new();
        opts.report(&analyzed, &mut out).expect("report writes");
        let out = String::from_utf8(out).expect("report is UTF-8");
        let table = out.find("LOCK NAME").expect("table printed");
        let csv = out.find(Csv::HEADER).expect("csv printed");
        assert!(table < csv);
        assert!(out.ends_with("bcache,8,3,37.5,50\n"));
    }

    #[test]
    fn decode_reports_truncation() {
        let err = decode(&[0; 100]).unwrap_err();
        assert!(format!("{err:?}").contains("record 1"));
    }
}
