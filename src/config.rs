//! Task service configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`.redfish-tasks.toml`)
//! 2. Environment variables (with `REDFISH_TASKS_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [task_service]
//! default_timeout_secs = 300
//! max_tasks = 100
//! retention_secs = 600
//! bus_capacity = 256
//! retry_after_secs = 30
//!
//! [task_service.logging]
//! default_directive = "redfish_tasks=debug"
//! ansi = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_BUS_CAPACITY, DEFAULT_MAX_TASKS, DEFAULT_RETENTION, DEFAULT_RETRY_AFTER_SECS,
    DEFAULT_TASK_TIMEOUT,
};

/// File looked up by [`TaskServiceConfig::load`].
pub const CONFIG_FILE: &str = ".redfish-tasks.toml";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {error}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error text.
        error: String,
    },

    /// The contents were not valid TOML for this structure.
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Settings for the task registry and the adapters built on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskServiceConfig {
    /// Seconds a task may run before it is forced terminal.
    pub default_timeout_secs: u64,

    /// Maximum number of tasks held at once.
    pub max_tasks: usize,

    /// Seconds a terminal task is kept when no poller reads it.
    pub retention_secs: u64,

    /// Capacity of the in-process notification bus.
    pub bus_capacity: usize,

    /// Value of the `Retry-After` header on accepted responses.
    pub retry_after_secs: u64,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for TaskServiceConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TASK_TIMEOUT.as_secs(),
            max_tasks: DEFAULT_MAX_TASKS,
            retention_secs: DEFAULT_RETENTION.as_secs(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
            logging: LoggingConfig::default(),
        }
    }
}

impl TaskServiceConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `.redfish-tasks.toml` in the working directory
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply environment
    /// overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content with a `[task_service]` table.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            task_service: TaskServiceConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(full.task_service)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("REDFISH_TASKS_DEFAULT_TIMEOUT_SECS") {
            self.default_timeout_secs = v;
        }
        if let Some(v) = env_parse("REDFISH_TASKS_MAX_TASKS") {
            self.max_tasks = v;
        }
        if let Some(v) = env_parse("REDFISH_TASKS_RETENTION_SECS") {
            self.retention_secs = v;
        }
        if let Some(v) = env_parse("REDFISH_TASKS_BUS_CAPACITY") {
            self.bus_capacity = v;
        }
        if let Some(v) = env_parse("REDFISH_TASKS_RETRY_AFTER_SECS") {
            self.retry_after_secs = v;
        }
        if let Ok(directive) = std::env::var("REDFISH_TASKS_LOG") {
            self.logging.default_directive = directive;
        }
        if let Some(v) = env_parse("REDFISH_TASKS_LOG_ANSI") {
            self.logging.ansi = v;
        }
    }

    /// Sets the task timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the registry capacity.
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Sets the retention window for unread terminal tasks.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    /// Sets the bus capacity.
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Task timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Retention window as a [`Duration`].
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Logging configuration used by [`init_logging`](crate::logging::init_logging).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub default_directive: String,

    /// Emit ANSI colour codes.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            ansi: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = TaskServiceConfig::default();
        assert_eq!(config.default_timeout(), DEFAULT_TASK_TIMEOUT);
        assert_eq!(config.max_tasks, 100);
        assert_eq!(config.retention(), Duration::from_secs(600));
        assert_eq!(config.logging.default_directive, "info");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = TaskServiceConfig::from_toml(
            r#"
            [task_service]
            max_tasks = 8

            [task_service.logging]
            ansi = false
            "#,
        )
        .unwrap();
        assert_eq!(config.max_tasks, 8);
        assert_eq!(config.default_timeout_secs, 300);
        assert!(!config.logging.ansi);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(
            TaskServiceConfig::from_toml("").unwrap(),
            TaskServiceConfig::default()
        );
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = TaskServiceConfig::from_toml("[task_service\nmax_tasks = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = TaskServiceConfig::from_file("/nonexistent/redfish-tasks.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.toml");
        std::fs::write(&path, "[task_service]\nretention_secs = 42\n").unwrap();
        let config = TaskServiceConfig::from_file(&path).unwrap();
        assert_eq!(config.retention_secs, 42);
    }

    #[test]
    fn builders_override_fields() {
        let config = TaskServiceConfig::default()
            .with_default_timeout(Duration::from_secs(5))
            .with_max_tasks(2)
            .with_retention(Duration::from_secs(1))
            .with_bus_capacity(4);
        assert_eq!(config.default_timeout_secs, 5);
        assert_eq!(config.max_tasks, 2);
        assert_eq!(config.retention_secs, 1);
        assert_eq!(config.bus_capacity, 4);
    }
}
