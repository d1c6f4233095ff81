//! Log output setup.
//!
//! Events are printed as `TIMESTAMP LEVEL target: span1:span2: message`, with
//! the level colored only when stderr is a terminal.

use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub struct TrackerLogFormat {
    color: bool,
}

impl TrackerLogFormat {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn level_color(level: &Level) -> &'static str {
        match *level {
            Level::ERROR => "\x1b[31m",
            Level::WARN => "\x1b[33m",
            Level::INFO => "\x1b[32m",
            Level::DEBUG => "\x1b[34m",
            Level::TRACE => "\x1b[35m",
        }
    }
}

impl<S, N> FormatEvent<S, N> for TrackerLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )?;

        let level = metadata.level();
        if self.color {
            write!(writer, "{}{:>5}\x1b[0m ", Self::level_color(level), level)?;
        } else {
            write!(writer, "{:>5} ", level)?;
        }

        write!(writer, "{}: ", metadata.target())?;

        if let Some(scope) = ctx.event_scope() {
            let mut first = true;
            for span in scope.from_root() {
                if !first {
                    write!(writer, ":")?;
                }
                write!(writer, "{}", span.name())?;
                // Show the cycle number so interleaved retries stay readable
                if let Some(fields) = span
                    .extensions()
                    .get::<tracing_subscriber::fmt::FormattedFields<N>>()
                    && !fields.fields.is_empty()
                {
                    write!(writer, "{{{}}}", fields)?;
                }
                first = false;
            }
            if !first {
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Install the global subscriber: `RUST_LOG` filtering (default `info`),
/// the formatter above, and a Sentry layer that only does work when a Sentry
/// client has been initialized.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let color = std::io::stderr().is_terminal();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .event_format(TrackerLogFormat::new(color))
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sentry_tracing::layer())
        .init();
}
