//! # Record Snapshots
//!
//! Typed view of a list or item as seen by one side of a sync. Snapshots are
//! what changes carry, what checksums are computed over, and what conflict
//! tasks persist as `local_data`, `remote_data` and `resolution_data`.
//!
//! The `id` of a snapshot is always the *local* identifier. Snapshots built
//! from remote records are normalised into the local identity space by the
//! change detector so both sides of a conflict compare field by field.

use bridge_traits::{RemoteAggregate, RemoteItem, ResourceData};
use chrono::{DateTime, Utc};
use core_library::{TodoItem, TodoList};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Fields
// ============================================================================

/// The top-level fields of a [`RecordSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotField {
    Id,
    ExternalId,
    Name,
    Description,
    Completed,
    UpdatedAt,
}

/// How conflicting values of a field may be reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Record identity (`id`, `external_id`)
    Identity,
    /// Free text written by a person
    Text,
    Boolean,
    Timestamp,
}

impl SnapshotField {
    /// All fields in serialization order
    pub const ALL: [SnapshotField; 6] = [
        SnapshotField::Id,
        SnapshotField::ExternalId,
        SnapshotField::Name,
        SnapshotField::Description,
        SnapshotField::Completed,
        SnapshotField::UpdatedAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotField::Id => "id",
            SnapshotField::ExternalId => "external_id",
            SnapshotField::Name => "name",
            SnapshotField::Description => "description",
            SnapshotField::Completed => "completed",
            SnapshotField::UpdatedAt => "updated_at",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            SnapshotField::Id | SnapshotField::ExternalId => FieldKind::Identity,
            SnapshotField::Name | SnapshotField::Description => FieldKind::Text,
            SnapshotField::Completed => FieldKind::Boolean,
            SnapshotField::UpdatedAt => FieldKind::Timestamp,
        }
    }

    /// Whether a deterministic rule can settle a difference in this field
    ///
    /// `completed` resolves to true and timestamps to the latest value.
    /// Free text never resolves on its own. Everything else falls back to
    /// the remote value.
    pub fn is_auto_resolvable(&self) -> bool {
        !matches!(self.kind(), FieldKind::Text)
    }
}

impl fmt::Display for SnapshotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One field whose value differs between the local and remote snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: SnapshotField,
    pub local_value: Value,
    pub remote_value: Value,
}

// ============================================================================
// Snapshot
// ============================================================================

/// State of a list or item at one side of a sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub id: Option<i64>,
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RecordSnapshot {
    pub fn from_item(item: &TodoItem) -> Self {
        Self {
            id: Some(item.id.0),
            external_id: item.external_id.clone(),
            description: Some(item.description.clone()),
            completed: Some(item.completed),
            updated_at: Some(item.updated_at),
            ..Default::default()
        }
    }

    pub fn from_list(list: &TodoList) -> Self {
        Self {
            id: Some(list.id.0),
            external_id: list.external_id.clone(),
            name: Some(list.name.clone()),
            updated_at: Some(list.updated_at),
            ..Default::default()
        }
    }

    /// Snapshot of a remote item, keyed by the local item it maps to
    pub fn from_remote_item(item: &RemoteItem, local_id: Option<i64>) -> Self {
        Self {
            id: local_id,
            external_id: Some(item.id.clone()),
            description: Some(item.description.clone()),
            completed: Some(item.completed),
            updated_at: Some(item.updated_at),
            ..Default::default()
        }
    }

    /// Snapshot of the remote list header, keyed by the local list
    pub fn from_remote_list(aggregate: &RemoteAggregate, local_id: i64) -> Self {
        Self {
            id: Some(local_id),
            external_id: Some(aggregate.id.clone()),
            name: Some(aggregate.name.clone()),
            updated_at: Some(aggregate.updated_at),
            ..Default::default()
        }
    }

    /// The value of a field as JSON, `null` when unset
    pub fn value(&self, field: SnapshotField) -> Value {
        match field {
            SnapshotField::Id => self.id.map(Value::from).unwrap_or(Value::Null),
            SnapshotField::ExternalId => optional_string(&self.external_id),
            SnapshotField::Name => optional_string(&self.name),
            SnapshotField::Description => optional_string(&self.description),
            SnapshotField::Completed => self.completed.map(Value::Bool).unwrap_or(Value::Null),
            SnapshotField::UpdatedAt => self
                .updated_at
                .map(|at| Value::String(at.to_rfc3339()))
                .unwrap_or(Value::Null),
        }
    }

    fn field_eq(&self, other: &Self, field: SnapshotField) -> bool {
        match field {
            SnapshotField::Id => self.id == other.id,
            SnapshotField::ExternalId => self.external_id == other.external_id,
            SnapshotField::Name => self.name == other.name,
            SnapshotField::Description => self.description == other.description,
            SnapshotField::Completed => self.completed == other.completed,
            SnapshotField::UpdatedAt => self.updated_at == other.updated_at,
        }
    }

    /// Fields whose values differ, in serialization order
    pub fn differing_fields(&self, remote: &Self) -> Vec<SnapshotField> {
        SnapshotField::ALL
            .into_iter()
            .filter(|field| !self.field_eq(remote, *field))
            .collect()
    }

    /// Per-field differences with `self` as the local side
    pub fn diff(&self, remote: &Self) -> Vec<FieldDiff> {
        self.differing_fields(remote)
            .into_iter()
            .map(|field| FieldDiff {
                field,
                local_value: self.value(field),
                remote_value: remote.value(field),
            })
            .collect()
    }

    /// Field-level merge of two versions of a record
    ///
    /// Starts from `local` and settles every differing field:
    /// `completed` is true if either side is, timestamps take the latest
    /// value, the local id survives, and every other field takes the remote
    /// value (falling back to local when remote has none).
    pub fn merge(local: &Self, remote: &Self) -> Self {
        let mut merged = local.clone();

        for field in local.differing_fields(remote) {
            match field {
                SnapshotField::Id => merged.id = local.id.or(remote.id),
                SnapshotField::ExternalId => {
                    merged.external_id =
                        remote.external_id.clone().or_else(|| local.external_id.clone())
                }
                SnapshotField::Name => {
                    merged.name = remote.name.clone().or_else(|| local.name.clone())
                }
                SnapshotField::Description => {
                    merged.description =
                        remote.description.clone().or_else(|| local.description.clone())
                }
                SnapshotField::Completed => {
                    merged.completed = match (local.completed, remote.completed) {
                        (Some(true), _) | (_, Some(true)) => Some(true),
                        (local, remote) => remote.or(local),
                    }
                }
                SnapshotField::UpdatedAt => {
                    merged.updated_at = local.updated_at.max(remote.updated_at)
                }
            }
        }

        merged
    }

    /// Payload for a remote create or update call
    pub fn to_resource_data(&self, parent_id: Option<String>) -> ResourceData {
        ResourceData {
            parent_id,
            name: self.name.clone(),
            description: self.description.clone(),
            completed: self.completed,
        }
    }
}

fn optional_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

// ============================================================================
// Tests
// ============================================================================
