//! Structured logging setup
//!
//! The library emits `tracing` events while it works: fitted membrane time
//! constants at `debug`, failed slices at `warn`, and so on. Host
//! applications that do not already install a subscriber can use
//! [`init_logging`] to get a sensibly configured one.
//!
//! ## Example
//!
//! ```rust,ignore
//! use aec_core::observe::{init_logging, LogConfig, LogLevel};
//!
//! let config = LogConfig {
//!     level: LogLevel::Debug,
//!     ..Default::default()
//! };
//! init_logging(&config);
//!
//! tracing::info!(slices = 12, "compensation complete");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON, machine-readable.
    Json,
    /// Pretty, human-readable.
    #[default]
    Pretty,
    /// Compact, one line per event.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level used when `RUST_LOG` is not set.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Include source location (file:line).
    pub source_location: bool,
    /// Module filter, e.g. `"aec_core=debug"`. Overrides `level`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            source_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Development preset: verbose with source locations.
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            source_location: true,
            ..Default::default()
        }
    }

    /// Quiet preset: errors only, compact.
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            format: LogFormat::Compact,
            ..Default::default()
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at application startup; later calls are silently ignored so
/// tests and embedding hosts can race without panicking. A `RUST_LOG`
/// environment variable takes precedence over `config.level`.
pub fn init_logging(config: &LogConfig) {
    let filter = if let Some(ref custom) = config.filter {
        EnvFilter::try_new(custom)
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", config.level)))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", config.level)))
    };

    let result = match config.format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .pretty()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .compact()
                    .with_file(config.source_location)
                    .with_line_number(config.source_location),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    // A subscriber may already be installed; that is fine.
    let _ = result;
}
