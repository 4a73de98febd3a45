//! # Host Bridge Traits
//!
//! Abstraction traits that a host application implements for the sync core.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync engine and the outside
//! world. The engine never talks to the network or the wall clock directly;
//! it goes through the traits below so that hosts can plug in their own HTTP
//! client and tests can run deterministically.
//!
//! ## Traits
//!
//! - [`RemoteSyncApi`](remote::RemoteSyncApi) - Remote system-of-record client
//!   (aggregate fetch, resource mutations, health probe)
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge operations return [`BridgeError`](error::BridgeError). Remote
//! failures are classified so the engine can tell fatal authentication
//! failures apart from transient rate limits, server errors and network
//! failures:
//!
//! ```ignore
//! match api.fetch_aggregate("remote-list-1").await {
//!     Err(e) if e.is_fatal() => return Err(e.into()),
//!     Err(e) if e.is_retryable() => warn!("transient remote failure: {}", e),
//!     Err(e) => warn!("remote failure: {}", e),
//!     Ok(aggregate) => process(aggregate),
//! }
//! ```

pub mod error;
pub mod remote;
pub mod time;

pub use error::{BridgeError, Result};
pub use remote::{
    HealthStatus, RemoteAggregate, RemoteItem, RemoteResource, RemoteSyncApi, ResourceData,
    ResourceKind,
};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
