//! Structured logging setup.
//!
//! The library crates only emit `tracing` events. Applications that want them printed
//! install a subscriber once at startup from an explicit [`LogConfig`]:
//!
//! ```ignore
//! use docbase::logging::{LogConfig, LogTarget};
//!
//! docbase::logging::install(&LogConfig::new("warn").with_target(LogTarget::Stderr))?;
//! # Ok::<(), docbase::error::DocumentStoreError>(())
//! ```

use serde::Deserialize;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

use docbase_core::error::{DocumentStoreError, DocumentStoreResult};

/// Where formatted log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// One of `debug`, `info`, `warn`, `error` or `fatal`.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub target: LogTarget,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_level(), target: LogTarget::default() }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self { level: level.into(), target: LogTarget::default() }
    }

    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// The most verbose level let through.
    ///
    /// `fatal` has no `tracing` counterpart and maps to `error`. Unrecognized levels
    /// let everything through rather than hiding events.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" | "warning" => LevelFilter::WARN,
            "error" | "fatal" => LevelFilter::ERROR,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// Fails with [`DocumentStoreError::Configuration`] when a global subscriber is
/// already installed.
pub fn install(config: &LogConfig) -> DocumentStoreResult<()> {
    let registry = tracing_subscriber::registry().with(config.level_filter());

    let result = match config.target {
        LogTarget::Stdout => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stdout))
            .try_init(),
        LogTarget::Stderr => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| DocumentStoreError::Configuration(format!("logging already initialized: {e}")))
}
