//! provides logging helpers

use std::env;
use std::fmt::{self};
use std::path::Path;

use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use utils::logging::LOG_PATH_ENV_VAR;

const METRICS_TARGET: &str = "metrics";

/// Writes the pre-formatted line protocol record carried by the event.
struct LineProtocolFormatter;

struct FieldVisitor {
    msg: String,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, _: &Field, value: &str) {
        self.msg.push_str(value);
    }

    fn record_debug(&mut self, _: &Field, value: &dyn fmt::Debug) {
        self.msg.push_str(&format!("{value:?}"));
    }
}

impl<S, N> FormatEvent<S, N> for LineProtocolFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor { msg: String::new() };
        event.record(&mut visitor);
        write!(writer, "{}", visitor.msg)
    }
}

/// Keeps the non-blocking writers flushing until dropped.
pub struct LoggingGuards {
    _log: Option<WorkerGuard>,
    _metrics: Option<WorkerGuard>,
}

fn metrics_appender(metrics_file: &Path) -> Result<RollingFileAppender, String> {
    let dir = match metrics_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let prefix = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("invalid metrics file {}", metrics_file.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
        .map_err(|e| e.to_string())
}

/// initiate the global tracing subscriber
///
/// Events on the `metrics` target go to `metrics_file` only; everything else
/// goes to the human readable log.
pub fn init(metrics_file: &Path) -> LoggingGuards {
    let (fmt_layer, log_guard) = utils::logging::get_fmt_layer(env::var(LOG_PATH_ENV_VAR).ok());
    let fmt_layer = fmt_layer.with_filter(utils::logging::env_filter().and(
        filter::filter_fn(|metadata| metadata.target() != METRICS_TARGET),
    ));

    let (metrics_layer, metrics_guard) = match metrics_appender(metrics_file) {
        Ok(appender) => {
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let layer = layer()
                .event_format(LineProtocolFormatter)
                .fmt_fields(format::DefaultFields::new())
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(filter::filter_fn(|metadata| {
                    metadata.target() == METRICS_TARGET
                }));
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("metrics disabled: {e}");
            (None, None)
        }
    };

    registry().with(fmt_layer).with(metrics_layer).init();
    LoggingGuards {
        _log: log_guard,
        _metrics: metrics_guard,
    }
}
