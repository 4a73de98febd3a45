//! Workspace facade crate.
//!
//! This crate exposes the sync engine crates behind a single feature flag so
//! host applications (job schedulers, web backends) can depend on
//! `listsync-workspace` without wiring each crate individually.

#[cfg(feature = "engine")]
pub use core_library as library;
#[cfg(feature = "engine")]
pub use core_runtime as runtime;
#[cfg(feature = "engine")]
pub use core_sync as sync;

#[cfg(feature = "engine")]
pub use core_sync::{ConflictStrategy, SyncCoordinator, SyncResult, SyncStrategy};
