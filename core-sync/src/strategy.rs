//! Closed sets of sync and conflict strategies.
//!
//! Hosts pass strategy names as strings at the edges; parsing them here makes
//! an unknown name a construction-time error instead of a mid-run surprise.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How a run decides which records count as changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Every record is treated as changed
    FullSync,
    /// Only records modified since the last successful run
    #[default]
    IncrementalSync,
    /// Incremental run triggered by an individual edit
    RealTimeSync,
    /// Incremental run on a coarse schedule
    BatchSync,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::FullSync => "full_sync",
            SyncStrategy::IncrementalSync => "incremental_sync",
            SyncStrategy::RealTimeSync => "real_time_sync",
            SyncStrategy::BatchSync => "batch_sync",
        }
    }

    /// Whether the run ignores the last-sync watermark
    pub fn is_full(&self) -> bool {
        matches!(self, SyncStrategy::FullSync)
    }

    /// Delay before the scheduler should run this strategy again, if any
    pub fn next_run_delay(&self) -> Option<Duration> {
        match self {
            SyncStrategy::IncrementalSync => Some(Duration::from_secs(60 * 60)),
            SyncStrategy::BatchSync => Some(Duration::from_secs(4 * 60 * 60)),
            SyncStrategy::FullSync | SyncStrategy::RealTimeSync => None,
        }
    }
}

impl FromStr for SyncStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full_sync" => Ok(SyncStrategy::FullSync),
            "incremental_sync" => Ok(SyncStrategy::IncrementalSync),
            "real_time_sync" => Ok(SyncStrategy::RealTimeSync),
            "batch_sync" => Ok(SyncStrategy::BatchSync),
            _ => Err(SyncError::InvalidStrategy(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How detected conflicts are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep the side with the later timestamp, remote on ties
    #[default]
    LastWriteWins,
    /// Field-level merge of both sides
    MergeChanges,
    /// Always keep the remote side
    ExternalPriority,
    /// Always keep the local side
    LocalPriority,
    /// Defer to a conflict resolution task
    ManualResolution,
}

impl ConflictStrategy {
    pub const ALL: [ConflictStrategy; 5] = [
        ConflictStrategy::LastWriteWins,
        ConflictStrategy::MergeChanges,
        ConflictStrategy::ExternalPriority,
        ConflictStrategy::LocalPriority,
        ConflictStrategy::ManualResolution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::MergeChanges => "merge_changes",
            ConflictStrategy::ExternalPriority => "external_priority",
            ConflictStrategy::LocalPriority => "local_priority",
            ConflictStrategy::ManualResolution => "manual_resolution",
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "last_write_wins" => Ok(ConflictStrategy::LastWriteWins),
            "merge_changes" => Ok(ConflictStrategy::MergeChanges),
            "external_priority" => Ok(ConflictStrategy::ExternalPriority),
            "local_priority" => Ok(ConflictStrategy::LocalPriority),
            "manual_resolution" => Ok(ConflictStrategy::ManualResolution),
            _ => Err(SyncError::InvalidStrategy(s.to_string())),
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
