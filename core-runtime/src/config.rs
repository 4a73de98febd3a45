//! # Core Configuration Module
//!
//! Provides configuration management for the list sync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! holding the database location, logging setup, event bus sizing and the
//! [`SyncSettings`] that bound every sync run. The builder enforces fail-fast
//! validation so a misconfigured host never starts a sync.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SyncSettings};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/lists/lists.db")
//!     .sync_settings(SyncSettings::default().with_remote_timeout_secs(15))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! For tests, use an in-memory database:
//!
//! ```
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder().in_memory().build().unwrap();
//! assert!(config.database_path.is_none());
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use crate::logging::LoggingConfig;
use std::path::PathBuf;

/// Largest accepted event buffer.
const MAX_EVENT_BUFFER_SIZE: usize = 10_000;

/// Settings that bound a single sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Timeout applied to every individual remote call (seconds)
    pub remote_timeout_secs: u64,

    /// Timeout for an entire sync run (seconds)
    pub run_timeout_secs: u64,

    /// How far back local change detection looks when no previous
    /// successful session exists (hours)
    pub lookback_hours: u32,

    /// Probe remote health before detection starts
    pub verify_remote_health: bool,

    /// Run the auto-resolution pass over a run's conflict tasks before the
    /// session is finalized
    pub auto_resolve_after_run: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_timeout_secs: 30,
            run_timeout_secs: 600, // 10 minutes
            lookback_hours: 24,
            verify_remote_health: true,
            auto_resolve_after_run: true,
        }
    }
}

impl SyncSettings {
    pub fn with_remote_timeout_secs(mut self, secs: u64) -> Self {
        self.remote_timeout_secs = secs;
        self
    }

    pub fn with_run_timeout_secs(mut self, secs: u64) -> Self {
        self.run_timeout_secs = secs;
        self
    }

    pub fn with_lookback_hours(mut self, hours: u32) -> Self {
        self.lookback_hours = hours;
        self
    }

    pub fn with_remote_health_check(mut self, enabled: bool) -> Self {
        self.verify_remote_health = enabled;
        self
    }

    pub fn with_auto_resolution(mut self, enabled: bool) -> Self {
        self.auto_resolve_after_run = enabled;
        self
    }

    /// Validates the settings and returns an error if invalid.
    ///
    /// This checks:
    /// - Timeouts are non-zero
    /// - A single remote call cannot outlive the whole run
    /// - The lookback window is between 1 hour and 30 days
    pub fn validate(&self) -> Result<()> {
        if self.remote_timeout_secs == 0 {
            return Err(Error::Config(
                "Remote timeout must be greater than 0 seconds".to_string(),
            ));
        }

        if self.run_timeout_secs == 0 {
            return Err(Error::Config(
                "Run timeout must be greater than 0 seconds".to_string(),
            ));
        }

        if self.remote_timeout_secs > self.run_timeout_secs {
            return Err(Error::Config(format!(
                "Remote timeout ({}s) cannot exceed the run timeout ({}s)",
                self.remote_timeout_secs, self.run_timeout_secs
            )));
        }

        if !(1..=720).contains(&self.lookback_hours) {
            return Err(Error::Config(format!(
                "Lookback window of {} hours is out of range (1-720)",
                self.lookback_hours
            )));
        }

        Ok(())
    }
}

/// Core configuration for the list sync core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file, `None` for an in-memory database
    pub database_path: Option<PathBuf>,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    /// Logging setup applied by the host at startup
    pub logging: LoggingConfig,

    /// Sync run bounds
    pub sync: SyncSettings,
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size exceeds maximum of {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        self.sync.validate()
    }
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    in_memory: bool,
    event_buffer_size: Option<usize>,
    logging: Option<LoggingConfig>,
    sync: Option<SyncSettings>,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/lists.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self.in_memory = false;
        self
    }

    /// Use an in-memory database instead of a file.
    pub fn in_memory(mut self) -> Self {
        self.database_path = None;
        self.in_memory = true;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = Some(settings);
        self
    }

    /// Builds the configuration, validating it first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if neither a database path nor in-memory mode
    /// was chosen, or if any setting is out of range.
    pub fn build(self) -> Result<CoreConfig> {
        if self.database_path.is_none() && !self.in_memory {
            return Err(Error::Config(
                "Database path is required. Use .database_path() or .in_memory() to set it."
                    .to_string(),
            ));
        }

        let config = CoreConfig {
            database_path: self.database_path,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            logging: self.logging.unwrap_or_default(),
            sync: self.sync.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
