//! Tracing setup for the binary: compact stderr output plus an optional
//! plain-text log file.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for the given `-v` count, on top of the configured level.
pub fn filter_directive(base: &str, verbosity: u8) -> String {
    match verbosity {
        0 => base.to_string(),
        1 => format!("{base},tandem=debug,tandem_cli=debug,tandem_sync=debug,tandem_storage=debug"),
        _ => "debug".to_string(),
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `base` and
/// `verbosity`. The returned guard must live until the process exits or
/// buffered file output is lost.
pub fn init(base: &str, verbosity: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(base, verbosity)))
        .context("invalid log filter")?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let name = path
                .file_name()
                .with_context(|| format!("log file path {} has no file name", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(file_layer)
        .try_init()
        .context("logging already initialized")?;

    Ok(guard)
}
