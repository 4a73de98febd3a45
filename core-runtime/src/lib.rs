//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the list sync core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system for session and conflict task notifications
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other crates depend on. It
//! establishes the logging conventions, the configuration surface hosts fill
//! in, and the broadcast channel through which status changes are observed.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
