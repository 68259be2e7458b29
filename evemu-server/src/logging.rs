//! Global `tracing` subscriber setup for the server binary and tests.

use anyhow::Context;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, time::ChronoUtc, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::ServerConfig;

/// Directives used when `RUST_LOG` is not set. `evemu::dump` is covered by
/// the first one, so tree dumps at debug and above are shown.
pub const DEFAULT_FILTER: &str = "evemu=debug,warn";

const TEST_FILTER: &str = "evemu=trace,warn";

fn filter_or(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// One formatted line per event: UTC timestamp, thread id, target.
fn line_layer<S, W>(writer: W, ansi: bool) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_timer(ChronoUtc::rfc_3339())
        .with_thread_ids(true)
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer)
}

/// Install the process-wide subscriber: stderr plus a file under
/// `config.log_dir` that rotates daily and is named after `config.log_prefix`.
///
/// File writes happen on a background thread until the returned guard is
/// dropped.
pub fn init_logging(config: &ServerConfig) -> anyhow::Result<WorkerGuard> {
    let dir = config.log_dir.as_path();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.log_prefix.as_str())
        .filename_suffix("log")
        .build(dir)
        .context("opening rolling log file")?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter_or(DEFAULT_FILTER))
        .with(line_layer(std::io::stderr, true))
        .with(line_layer(file_writer, false))
        .try_init()
        .context("a global subscriber is already installed")?;

    tracing::info!(
        target: "evemu::service",
        "Writing logs to {} ({}.*.log)",
        dir.display(),
        config.log_prefix
    );
    Ok(guard)
}

/// Route events into the test harness's captured output. Later calls are
/// no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or(TEST_FILTER))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_filters_parse() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new(TEST_FILTER).is_ok());
    }

    #[test]
    fn test_init_test_logging_is_repeatable() {
        init_test_logging();
        init_test_logging();
        tracing::debug!(target: "evemu::service", "still logging");
    }
}
