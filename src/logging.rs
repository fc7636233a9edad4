//! Logging setup.
//!
//! Structured logging through `tracing`. SQL statements issued by the store
//! are logged under the `bald::sql` target, which can be switched on and off
//! independently of the main level.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::ConfigurationError;

/// Target used for store statements.
pub const SQL_TARGET: &str = "bald::sql";

/// Logging configuration (the `logging` key of a project file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    pub level: String,

    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,

    /// Log store statements.
    pub sql: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            sql: false,
        }
    }
}

impl LoggingConfig {
    pub fn enable_sql_log(&mut self) {
        self.sql = true;
    }

    pub fn disable_sql_log(&mut self) {
        self.sql = false;
    }

    /// Filter directives for this configuration.
    pub fn directives(&self) -> String {
        let sql_level = if self.sql { "info" } else { "error" };
        format!("{},{}={}", self.level, SQL_TARGET, sql_level)
    }
}

/// Initialize the global subscriber.
///
/// `BALD_LOG` overrides the configured directives. Calling this more than
/// once is harmless: later calls leave the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigurationError> {
    let filter = EnvFilter::try_from_env("BALD_LOG")
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .map_err(|e| ConfigurationError::Logging(e.to_string()))?;

    let base = Registry::default().with(filter);

    let result = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    ConfigurationError::ReadConfig {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ConfigurationError::ReadConfig {
                    path: path.clone(),
                    source,
                })?;
            base.with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
            .try_init()
        }
        None => base
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_toggle_changes_directives() {
        let mut config = LoggingConfig::default();
        assert_eq!(config.directives(), "info,bald::sql=error");
        config.enable_sql_log();
        assert_eq!(config.directives(), "info,bald::sql=info");
        config.disable_sql_log();
        assert!(!config.sql);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
