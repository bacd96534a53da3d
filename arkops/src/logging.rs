//! Tracing initialization for embedders.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! host's job. `init_logging` is a convenience entry point for binaries and
//! integration harnesses that just want sensible defaults.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global subscriber: human-readable stdout, filtered by
/// `RUST_LOG` (default `info`), plus an optional daily-rotated plain-text
/// file under `log_dir`.
///
/// Returns the appender guard when file output is enabled; dropping it
/// flushes and stops the background writer, so hold it for the process
/// lifetime.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    match log_dir {
        Some(dir) => {
            let file_appender = rolling::daily(dir, "arkops.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}
