//! # Observability
//!
//! Centralized logging for the LMS session services.
//!
//! Services are **log producers**. They call `observability::init()` once at
//! startup and use the standard `tracing` macros everywhere else. Where the
//! lines end up is decided here:
//!
//! - structured JSONL appended to `~/.lms-session/logs/session.jsonl`
//! - optionally a compact human-readable stream on stderr
//!
//! `tail -f ~/.lms-session/logs/session.jsonl | jq` gives a live view.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "lms-session".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod jsonl;

use std::path::PathBuf;

pub use jsonl::{CentralLogWriter, WriterFactory};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "lms-session", "inspector").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.lms-session/logs/session.jsonl`.
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

/// Initialize logging with default settings for the given service.
///
/// If the log file cannot be opened the file sink is skipped and a note is
/// printed to stderr.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless: the first subscriber wins and
/// later calls are ignored.
pub fn init_with_config(config: LogConfig) {
    jsonl::init_jsonl_subscriber(&config);
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
