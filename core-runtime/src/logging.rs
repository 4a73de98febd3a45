//! # Logging
//!
//! `tracing` subscriber setup for hosts embedding the sync engine.
//!
//! Sync runs open an `#[instrument]` span per coordinator entry point, so the
//! session id and owner id travel with every event logged inside a run. The
//! JSON format keeps those span fields on each line for log shippers.
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::LogLevel;
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Json)
//!     .with_engine_level(LogLevel::Debug);
//!
//! init_logging(config).expect("Failed to initialize logging");
//! tracing::info!("Scheduler started");
//! ```

use crate::error::{Error, Result};
use bridge_traits::time::LogLevel;
use std::io;
use tracing_subscriber::{
    filter::EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
    Layer, Registry,
};

/// Crates whose level follows [`LoggingConfig::engine_level`]
const ENGINE_TARGETS: [&str; 4] = ["core_sync", "core_library", "core_runtime", "bridge_traits"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored output for local development
    Pretty,
    /// One JSON object per event, span fields flattened in
    Json,
    /// Single-line text
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for everything outside the engine crates
    pub level: LogLevel,
    /// Level for the engine crates; falls back to `level`
    pub engine_level: Option<LogLevel>,
    /// Full `EnvFilter` directive string, replaces the computed filter
    pub filter: Option<String>,
    /// Log every SQL statement sqlx executes
    pub sql_statements: bool,
    /// Emit an event when a run span opens and closes
    pub enable_spans: bool,
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            engine_level: None,
            filter: None,
            sql_statements: false,
            enable_spans: true,
            display_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_engine_level(mut self, level: LogLevel) -> Self {
        self.engine_level = Some(level);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_sql_statements(mut self, enable: bool) -> Self {
        self.sql_statements = enable;
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    /// Directive string handed to `EnvFilter`
    pub fn filter_directives(&self) -> String {
        if let Some(custom) = &self.filter {
            return custom.clone();
        }

        let engine = self.engine_level.unwrap_or(self.level).as_str();
        let sqlx = if self.sql_statements { "debug" } else { "warn" };

        let mut directives = vec![self.level.as_str().to_string()];
        directives.extend(ENGINE_TARGETS.iter().map(|target| format!("{target}={engine}")));
        directives.push(format!("sqlx={sqlx}"));
        directives.join(",")
    }
}

/// Install the global subscriber
///
/// Only the first call in a process succeeds.
///
/// # Errors
///
/// Returns `Error::Config` when the filter does not parse or a subscriber is
/// already installed
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(config.filter_directives())
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

fn span_events(config: &LoggingConfig) -> FmtSpan {
    if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn fmt_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Pretty => base.pretty().with_span_events(span_events(config)).boxed(),
        LogFormat::Compact => base.compact().with_span_events(span_events(config)).boxed(),
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
    }
}
