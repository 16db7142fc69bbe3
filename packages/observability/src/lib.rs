//! # Observability
//!
//! Logging setup shared by herald services.
//!
//! Services call [`init`] or [`init_with_config`] once at startup and use
//! the standard `tracing` macros everywhere else. Where the lines go
//! (terminal, JSON on stdout, an append-only file) is decided here and
//! nowhere else.
//!
//! `RUST_LOG` always wins over [`LogConfig::default_level`].
//!
//! ```rust,ignore
//! fn main() -> anyhow::Result<()> {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "herald".into(),
//!         default_level: "debug".into(),
//!         format: observability::LogFormat::Json,
//!         ..Default::default()
//!     })?;
//!
//!     tracing::info!("broker started");
//!     Ok(())
//! }
//! ```

mod file_writer;
mod json_layer;

pub use file_writer::AppendWriter;
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format for terminal logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected compact or json)")),
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSON line.
    pub service_name: String,

    /// Default filter (e.g. "info", "herald=debug"). Overridden by `RUST_LOG`.
    pub default_level: String,

    /// Terminal output format.
    pub format: LogFormat,

    /// Also append JSON lines to this file.
    pub log_path: Option<PathBuf>,

    /// Emit terminal output on stderr instead of stdout.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings.
///
/// A global subscriber that is already installed is left in place.
pub fn init(service_name: &str) {
    // Without a log file nothing in setup can fail.
    let _ = init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Fails only if the log file cannot be opened. Calling this when a global
/// subscriber is already installed (tests, embedding) is a no-op.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let file_layer = match &config.log_path {
        Some(path) => Some(
            JsonLayer::new(config.service_name.clone(), AppendWriter::open(path)?)
                .with_filter(filter()),
        ),
        None => None,
    };

    let terminal_layer = match (config.format, config.also_stderr) {
        (LogFormat::Json, true) => {
            JsonLayer::new(config.service_name.clone(), io::stderr).boxed()
        }
        (LogFormat::Json, false) => {
            JsonLayer::new(config.service_name.clone(), io::stdout).boxed()
        }
        (LogFormat::Compact, true) => tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .boxed(),
        (LogFormat::Compact, false) => tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(terminal_layer.with_filter(filter()))
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            service = %config.service_name,
            log_path = ?config.log_path,
            "observability initialized"
        );
    }
    Ok(())
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};
