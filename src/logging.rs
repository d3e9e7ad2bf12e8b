//! Tracing subscriber setup for the `transit` binary.

use crate::config::LoggingConfig;
use anyhow::{Context, Result, anyhow};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter: `RUST_LOG` wins, then `--verbose`, then the config level.
pub fn filter(config: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = if verbose {
        "transit=debug"
    } else {
        config.level.as_str()
    };
    EnvFilter::try_new(directive).with_context(|| format!("Invalid log level '{}'", directive))
}

/// Install the global subscriber. Logs go to stderr, and also to `log_file`
/// when given.
///
/// Keep the returned guard alive until exit so buffered file output is
/// flushed.
pub fn init(
    config: &LoggingConfig,
    verbose: bool,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = filter(config, verbose)?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("Log file path has no file name: {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    installed.context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_configured_level() {
        let config = LoggingConfig {
            level: "transit=trace,warn".to_string(),
            json: false,
        };
        // RUST_LOG may be set in the environment; either way a filter results
        assert!(filter(&config, false).is_ok());
        assert!(filter(&config, true).is_ok());
    }
}
