use crate::{
    term::{style, ColorMode, OutputOptions, OwoColorize, Style},
    Result,
};
use std::fmt;
use tracing::{field::Field, Event, Level, Subscriber};
use tracing_subscriber::{
    field::Visit,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

impl OutputOptions {
    pub fn trace_init(&self) -> Result<()> {
        use tracing_subscriber::prelude::*;
        let fmt = tracing_subscriber::fmt::layer()
            .event_format(LevelFormatter {
                styles: Styles::new(self.color),
            })
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(fmt)
            .with(tracing_error::ErrorLayer::default())
            .with(self.log.clone())
            .try_init()?;
        Ok(())
    }
}

/// Formats events as `level: message, field: value`, followed by the names of
/// the spans the event occurred in.
#[derive(Debug)]
struct LevelFormatter {
    styles: Styles,
}

struct Visitor<'styles, 'writer> {
    writer: Writer<'writer>,
    is_empty: bool,
    styles: &'styles Styles,
}

#[derive(Debug)]
struct Styles {
    error: Style,
    warn: Style,
    info: Style,
    debug: Style,
    trace: Style,
    pipes: Style,
    bold: Style,
}

impl<S, N> FormatEvent<S, N> for LevelFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = *event.metadata().level();
        let (tag, tag_style) = match level {
            Level::ERROR => ("error", self.styles.error),
            Level::WARN => ("warning", self.styles.warn),
            Level::INFO => ("info", self.styles.info),
            Level::DEBUG => ("debug", self.styles.debug),
            Level::TRACE => ("trace", self.styles.trace),
        };
        write!(
            writer,
            "{}{} ",
            tag.style(tag_style),
            ":".style(self.styles.bold)
        )?;

        let mut visitor = Visitor {
            writer: writer.by_ref(),
            is_empty: true,
            styles: &self.styles,
        };
        event.record(&mut visitor);

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(
                    writer,
                    " {} {}",
                    "|".style(self.styles.pipes),
                    span.name().style(self.styles.bold)
                )?;
            }
        }

        writer.write_char('\n')
    }
}

// === impl Visitor ===

impl Visitor<'_, '_> {
    const MESSAGE: &'static str = "message";
}

impl Visit for Visitor<'_, '_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if !self.is_empty {
            let _ = self.writer.write_str(", ");
        }

        if field.name() == Self::MESSAGE {
            let _ = write!(self.writer, "{:?}", value.style(self.styles.bold));
        } else {
            let _ = write!(
                self.writer,
                "{}{} {:?}",
                field.name().style(self.styles.bold),
                ":".style(self.styles.bold),
                value
            );
        }

        self.is_empty = false;
    }
}

// === impl Styles ===

impl Styles {
    fn new(colors: ColorMode) -> Self {
        Self {
            error: colors.if_color(style().red().bold()),
            warn: colors.if_color(style().yellow().bold()),
            info: colors.if_color(style().green().bold()),
            debug: colors.if_color(style().blue().bold()),
            trace: colors.if_color(style().purple().bold()),
            bold: colors.if_color(style().bold()),
            pipes: colors.if_color(style().blue().bold()),
        }
    }
}
