//! Configuration management system for TreeMirror
//!
//! This crate provides layered configuration for the TreeMirror binary:
//!
//! - **Multiple formats**: YAML, TOML and JSON configuration files
//! - **Validation**: a loaded configuration is checked before it is handed out
//! - **Environment overrides**: `TREEMIRROR__SYNC__INTERVAL_SECS=30` and friends
//! - **Defaults**: every option has a default, so a file only needs the
//!   values it changes
//!
//! # Examples
//!
//! ```rust,no_run
//! use treemirror_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("treemirror.yaml")
//!     .add_env_prefix("TREEMIRROR")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Interval: {:?}", config.sync.interval());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use treemirror_types::CompareMode;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Log levels accepted by `logging.level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Default layout of operation log timestamps
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Main configuration structure for TreeMirror
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// What to mirror and how often
    pub sync: SyncConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check the configuration for values the mirror cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sync.interval_secs == 0 {
            return Err(ConfigError::validation(
                "Sync interval must be greater than 0 seconds",
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }

        if let (Some(source), Some(replica)) = (&self.sync.source, &self.sync.replica) {
            if source == replica {
                return Err(ConfigError::validation(
                    "Source and replica must be different directories",
                ));
            }
        }

        Ok(())
    }
}

/// Mirror configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Source directory
    pub source: Option<PathBuf>,
    /// Replica directory
    pub replica: Option<PathBuf>,
    /// Seconds between the start of one pass and the next
    pub interval_secs: u64,
    /// How files present on both sides are compared
    pub compare_mode: CompareMode,
    /// Report decisions without touching the replica
    pub dry_run: bool,
}

impl SyncConfig {
    /// Interval between passes
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: None,
            replica: None,
            interval_secs: 60,
            compare_mode: CompareMode::default(),
            dry_run: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Diagnostic log level
    pub level: String,
    /// Operation log file
    pub log_file: Option<PathBuf>,
    /// Echo operation log lines to stdout
    pub console_echo: bool,
    /// `chrono` format of operation log timestamps
    pub timestamp_format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            console_echo: true,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}
