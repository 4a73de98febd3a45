//! # Conflict Detection
//!
//! Pairs local and remote changes that address the same record and flags
//! the pairs whose content differs.
//!
//! Pairing is a nested loop over both change-sets. The sets are bounded by
//! the records modified since the last sync, not by the size of the list.

use crate::change::{Change, ChangeAction};
use crate::snapshot::{FieldDiff, SnapshotField};
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Classification of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    DataConflict,
    TimestampConflict,
    DeletionConflict,
    CreationConflict,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::DataConflict => "data_conflict",
            ConflictType::TimestampConflict => "timestamp_conflict",
            ConflictType::DeletionConflict => "deletion_conflict",
            ConflictType::CreationConflict => "creation_conflict",
        }
    }

    /// Triage weight used by task priority scoring
    pub fn weight(&self) -> f64 {
        match self {
            ConflictType::DeletionConflict => 10.0,
            ConflictType::CreationConflict => 5.0,
            ConflictType::DataConflict => 3.0,
            ConflictType::TimestampConflict => 1.0,
        }
    }

    /// Classify a pair of changes given the fields that differ
    pub fn classify(local: &Change, remote: &Change, fields: &[FieldDiff]) -> Self {
        let either = |action: ChangeAction| local.action == action || remote.action == action;

        if either(ChangeAction::Create) {
            ConflictType::CreationConflict
        } else if either(ChangeAction::Delete) {
            ConflictType::DeletionConflict
        } else if !fields.is_empty()
            && fields.iter().all(|diff| diff.field == SnapshotField::UpdatedAt)
        {
            ConflictType::TimestampConflict
        } else {
            ConflictType::DataConflict
        }
    }
}

impl FromStr for ConflictType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "data_conflict" => Ok(ConflictType::DataConflict),
            "timestamp_conflict" => Ok(ConflictType::TimestampConflict),
            "deletion_conflict" => Ok(ConflictType::DeletionConflict),
            "creation_conflict" => Ok(ConflictType::CreationConflict),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A local and a remote change to the same record with different content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub local_change: Change,
    pub remote_change: Change,
    pub conflict_fields: Vec<FieldDiff>,
}

impl Conflict {
    /// Whether this conflict settles the given change
    pub fn covers(&self, change: &Change) -> bool {
        self.local_change.same_record(change) || self.remote_change.same_record(change)
    }

    pub fn field_names(&self) -> Vec<SnapshotField> {
        self.conflict_fields.iter().map(|diff| diff.field).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Every pair of changes to the same record whose checksums differ
    pub fn detect_conflicts(&self, local: &[Change], remote: &[Change]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for local_change in local {
            for remote_change in remote {
                if !local_change.same_record(remote_change) {
                    continue;
                }

                if local_change.checksum == remote_change.checksum {
                    debug!(
                        change = %local_change.describe(),
                        "Both sides changed identically, no conflict"
                    );
                    continue;
                }

                let conflict_fields = local_change.data.diff(&remote_change.data);
                let conflict_type =
                    ConflictType::classify(local_change, remote_change, &conflict_fields);

                debug!(
                    change = %local_change.describe(),
                    conflict_type = %conflict_type,
                    fields = conflict_fields.len(),
                    "Conflict detected"
                );

                conflicts.push(Conflict {
                    conflict_type,
                    local_change: local_change.clone(),
                    remote_change: remote_change.clone(),
                    conflict_fields,
                });
            }
        }

        conflicts
    }
}
