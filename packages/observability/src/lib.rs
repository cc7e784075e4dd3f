//! # Observability
//!
//! Centralized logging layer for the starter workspace.
//!
//! Crates are **log producers** only. They use the standard `tracing` macros
//! and never decide where output goes. The binary calls [`init_with_config`]
//! once at startup, which installs:
//!
//! - a JSONL file layer (`~/.starter/logs/starter.jsonl` by default) with
//!   sensitive fields redacted,
//! - an optional compact stderr layer for interactive use,
//! - an `EnvFilter` built from `RUST_LOG`, falling back to the configured level.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "starter".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod json_layer;
mod writer;

use std::path::PathBuf;
use std::sync::OnceLock;

pub use json_layer::{redact_fields, JsonLayer, LogEntry};
pub use writer::{CentralLogWriter, WriterFactory};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g. "starter").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g. "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG`.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.starter/logs/starter.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize logging with default settings for the named service.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with a custom configuration.
///
/// Only the first call installs a subscriber; later calls are ignored. If the
/// log file cannot be opened the file layer is skipped and a warning is
/// emitted on whatever layers remain.
pub fn init_with_config(config: LogConfig) {
    if INITIALIZED.set(()).is_err() {
        return;
    }

    let log_path = config.log_path.clone().unwrap_or_else(writer::default_log_path);
    let file_error = match CentralLogWriter::new(&log_path) {
        Ok(writer) => {
            let factory = WriterFactory::new(writer);
            let json_layer = JsonLayer::new(config.service_name.clone(), factory)
                .with_filter(env_filter(&config.default_level));
            let stderr_layer = stderr_layer(&config);
            let _ = tracing_subscriber::registry()
                .with(json_layer)
                .with(stderr_layer)
                .try_init();
            None
        }
        Err(e) => {
            let _ = tracing_subscriber::registry()
                .with(stderr_layer(&config))
                .try_init();
            Some(e)
        }
    };

    match file_error {
        None => tracing::debug!(log_path = %log_path.display(), "observability initialized"),
        Some(e) => tracing::warn!(
            log_path = %log_path.display(),
            error = %e,
            "log file unavailable, continuing without file output"
        ),
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>(config: &LogConfig) -> Option<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if !config.also_stderr {
        return None;
    }
    Some(
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter(&config.default_level))
            .boxed(),
    )
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }
}
