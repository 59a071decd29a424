//! Application configuration.

use serde::Deserialize;
use std::path::Path;

use docbase_core::{
    config::ConnectionConfig,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::logging::LogConfig;

/// Connection and logging settings for an application, usually read once at startup.
///
/// ```json
/// {
///     "mongo": { "uri": "mongodb://localhost:27017", "default_database": "app" },
///     "log": { "level": "warn", "target": "stderr" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    pub mongo: ConnectionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> DocumentStoreResult<Self> {
        let config: AppConfig = serde_json::from_str(json)
            .map_err(|e| DocumentStoreError::Configuration(e.to_string()))?;

        config.mongo.validate()?;

        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> DocumentStoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DocumentStoreError::Configuration(format!("{}: {e}", path.display())))?;

        Self::from_json_str(&json)
    }
}
