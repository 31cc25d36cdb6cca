use clap::Parser;
use lockprof::{Options, Result};
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let opts = Options::parse();
    opts.output.init()?;

    tracing::debug!(
        ?opts.snapshot,
        format = ?opts.format(),
        heatmap = opts.heatmap,
        ?opts.dump,
        "lockprof configuration"
    );

    opts.run()
}
