//! Logging and tracing configuration
//!
//! User-facing run progress goes to stderr. Every run additionally keeps a
//! diagnostic dump in a log file so mismatches can be root-caused after
//! the fact without re-running the suite.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Initialize tracing for a harness run.
///
/// Log levels are controlled by the `RUST_LOG` environment variable; the
/// default is INFO for this crate, or DEBUG when `--debug` is given.
/// Returns the file writer guard, which must stay alive for the duration
/// of the run so buffered diagnostics are flushed on exit.
pub fn init(debug: bool) -> Option<WorkerGuard> {
    let default_filter = if debug {
        "regress=debug,warn"
    } else {
        "regress=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if let Some(log_dir) = paths::log_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let appender = tracing_appender::rolling::never(&log_dir, "regress.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            return Some(guard);
        }
    }

    // Fallback: stderr only
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();

    None
}

/// Get the path of the diagnostic log file
pub fn diagnostics_log_path() -> Option<PathBuf> {
    paths::log_dir().map(|dir| dir.join("regress.log"))
}
