//! Tracing bootstrap for the arbx daemon.
//!
//! Subsystems log through `tracing` with stable targets (`engine`,
//! `engine::queue`, `breaker`, `rpc`, `flashloan`), so operators can tune
//! verbosity per subsystem via `RUST_LOG`, e.g.
//! `RUST_LOG=info,breaker=debug,rpc=trace`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Where file logs go when file logging is enabled.
#[derive(Debug, Clone)]
pub struct FileLogConfig {
    /// Directory the rolling log files are written to.
    pub directory: std::path::PathBuf,
    /// File name prefix.
    pub prefix: String,
}

/// Initializes the global subscriber with a stdout fmt layer and, optionally,
/// an hourly-rolling file layer.
///
/// Returns the file worker guard; dropping it flushes and stops the writer,
/// so the caller must hold it for the process lifetime.
///
/// The default filter is `info` for everything; `RUST_LOG` overrides it.
pub fn init(file: Option<FileLogConfig>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout = tracing_subscriber::fmt::layer().with_target(true);

    match file {
        Some(FileLogConfig { directory, prefix }) => {
            let appender = tracing_appender::rolling::hourly(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer =
                tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer).boxed();

            tracing_subscriber::registry().with(filter).with(stdout).with(file_layer).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout).init();
            None
        }
    }
}
