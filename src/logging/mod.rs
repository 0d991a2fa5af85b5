// Structured logging configured for the proxy's line format.

use std::fmt;
use std::thread;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter producing one line per event:
/// `YYYY-MM-DD HH:MM:SS.mmm --- [<thread-name>] : <message>`.
/// The thread name is right-aligned to 15 characters; unnamed threads
/// fall back to their numeric id.
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
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
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let current = thread::current();
        match current.name() {
            Some(name) => write!(writer, "{} --- [{:>15}] : ", stamp, name)?,
            None => write!(writer, "{} --- [{:>15?}] : ", stamp, current.id())?,
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Configures the global tracing subscriber.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().event_format(LineFormat))
        .init();
}

/// Like [`init`], but tolerates an already-installed subscriber.
/// Used by tests where several cases race to configure logging.
pub fn try_init() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().event_format(LineFormat))
        .try_init();
}
