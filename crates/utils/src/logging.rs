//! provides logging helpers

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable selecting a log file instead of stderr.
pub const LOG_PATH_ENV_VAR: &str = "LOG_PATH";

/// Number of rotated log files kept on disk.
const MAX_LOG_FILES: usize = 3;

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Builds the human-readable fmt layer.
///
/// Writes to stderr unless `log_path` is set, in which case a daily rolling
/// file is used and the returned guard must be kept alive for the lifetime of
/// the process.
pub fn get_fmt_layer<S>(log_path: Option<String>) -> (BoxedLayer<S>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file_writer = log_path.as_deref().and_then(|log_path| {
        let path = Path::new(log_path);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let prefix = path.file_name()?.to_str()?;
        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .max_log_files(MAX_LOG_FILES)
            .build(dir)
        {
            Ok(appender) => Some(tracing_appender::non_blocking(appender)),
            Err(e) => {
                eprintln!("failed to open log file {log_path}: {e}, logging to stderr");
                None
            }
        }
    });

    match file_writer {
        Some((writer, guard)) => {
            let layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (layer, Some(guard))
        }
        None => {
            let layer = layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed();
            (layer, None)
        }
    }
}

/// Default level filter, overridable through `RUST_LOG`.
pub fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
pub fn init() -> Option<WorkerGuard> {
    let (fmt_layer, guard) = get_fmt_layer(std::env::var(LOG_PATH_ENV_VAR).ok());
    registry().with(fmt_layer.with_filter(env_filter())).init();
    guard
}
