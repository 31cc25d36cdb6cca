//! Terminal output options.
use clap::{ArgGroup, Args};
use std::fmt;

pub use atty::Stream;

pub use owo_colors::{style, OwoColorize, Style};
const ARG_GROUP: &str = "output-opts";

#[derive(Debug, Args)]
#[command(
    next_help_heading = "Output Options",
    group = ArgGroup::new(ARG_GROUP).multiple(true),
)]
pub struct OutputOptions {
    /// Whether to emit colors in output.
    #[clap(
        long,
        env = "LOCKPROF_COLOR",
        default_value_t = ColorMode::Auto,
        global = true,
        group = ARG_GROUP,
    )]
    pub color: ColorMode,

    /// Configures diagnostic logging (written to stderr).
    #[clap(
        short,
        long,
        env = "RUST_LOG",
        default_value = "lockprof=info,lockstat=info,warn",
        global = true,
        group = ARG_GROUP,
    )]
    pub log: tracing_subscriber::filter::Targets,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
#[repr(u8)]
#[clap(rename_all = "lower")]
pub enum ColorMode {
    /// Determine whether to color output based on whether or not the output
    /// stream is a TTY.
    Auto = 0,
    /// Always color output.
    Always = 1,
    /// Never color output.
    Never = 2,
}

// === impl OutputOptions ===

impl OutputOptions {
    /// Installs the diagnostic subscriber.
    pub fn init(&self) -> color_eyre::Result<()> {
        self.trace_init()
    }

    /// Returns `true` if reports written to stdout should be colored.
    pub fn color_reports(&self) -> bool {
        self.color.should_color(Stream::Stdout)
    }
}

// === impl ColorMode ===

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            ColorMode::Auto => "auto",
            ColorMode::Always => "always",
            ColorMode::Never => "never",
        };
        f.pad(mode)
    }
}

impl ColorMode {
    /// Returns `style` if diagnostics (on stderr) should be colored, or a
    /// plain style if not.
    pub fn if_color(self, style: Style) -> Style {
        if self.should_color(Stream::Stderr) {
            style
        } else {
            owo_colors::style()
        }
    }

    pub fn should_color(self, stream: Stream) -> bool {
        match self {
            ColorMode::Auto => atty::is(stream),
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}
