//! # Sync Engine
//!
//! Bidirectional synchronization between local todo lists and a remote
//! system-of-record.
//!
//! ## Overview
//!
//! A sync run detects what changed on each side since the last successful
//! run, pairs up changes that touch the same record, settles those conflicts
//! with a pluggable strategy, and applies the outcome to both sides. Every
//! run is recorded as a [`SyncSession`]; conflicts that need a person become
//! [`ConflictResolutionTask`]s.
//!
//! ## Components
//!
//! - **Change Model** (`change`, `snapshot`, `checksum`): Field snapshots and their content fingerprint
//! - **Change Detector** (`change_detector`): Local change-sets and remote fetches
//! - **Conflict Detector** (`conflict_detector`): Pairs and classifies conflicting changes
//! - **Conflict Resolver** (`conflict_resolver`): Strategy registry settling conflicts
//! - **Change Applier** (`change_applier`): Writes change-sets to both sides
//! - **Session State Machine** (`session`): Sync session lifecycle with validated transitions
//! - **Conflict Tasks** (`conflict_task`): Deferred conflicts awaiting resolution
//! - **Repository** (`repository`): Persistence for sessions and tasks
//! - **Sync Coordinator** (`coordinator`): Orchestrates runs and task operations

pub mod change;
pub mod change_applier;
pub mod change_detector;
pub mod checksum;
pub mod conflict_detector;
pub mod conflict_resolver;
pub mod conflict_task;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod overview;
pub mod repository;
pub mod retry;
pub mod session;
pub mod snapshot;
pub mod strategy;

pub use change::{Change, ChangeAction, ChangeOrigin};
pub use change_applier::{ChangeApplier, SyncResult};
pub use change_detector::ChangeDetector;
pub use checksum::ChangeChecksum;
pub use conflict_detector::{Conflict, ConflictDetector, ConflictType};
pub use conflict_resolver::{ConflictHandler, ConflictResolver, Resolution};
pub use conflict_task::{
    ConflictAnalysis, ConflictResolutionTask, ConflictTaskId, ResolutionStrategy, Severity,
    TaskStats, TaskStatus,
};
pub use context::RunContext;
pub use coordinator::{SyncConfig, SyncCoordinator};
pub use error::{Result, SyncError};
pub use overview::{SyncOverview, SyncState};
pub use repository::{
    ConflictTaskRepository, SqliteConflictTaskRepository, SqliteSyncSessionRepository,
    SyncSessionRepository,
};
pub use retry::RetryPolicy;
pub use session::{SessionStats, SessionStatus, SessionSummary, SyncSession, SyncSessionId};
pub use snapshot::{FieldDiff, RecordSnapshot, SnapshotField};
pub use strategy::{ConflictStrategy, SyncStrategy};
