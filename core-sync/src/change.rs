//! Transient change records produced by the detector and consumed by the
//! conflict detector, resolver and applier. Changes are never persisted.

use crate::checksum::ChangeChecksum;
use crate::snapshot::RecordSnapshot;
use crate::Result;
use bridge_traits::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of the sync a change was observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    Local,
    Remote,
    /// Produced by settling a conflict
    Resolved,
}

impl ChangeOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOrigin::Local => "local",
            ChangeOrigin::Remote => "remote",
            ChangeOrigin::Resolved => "resolved",
        }
    }
}

impl fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A create, update or delete of one record on one side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub record_type: ResourceKind,
    pub action: ChangeAction,
    pub origin: ChangeOrigin,
    pub local_id: Option<i64>,
    pub external_id: Option<String>,
    pub data: RecordSnapshot,
    pub timestamp: DateTime<Utc>,
    pub checksum: ChangeChecksum,
}

impl Change {
    /// Build a change, taking identity from the snapshot and computing the
    /// checksum over it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if the checksum cannot be computed
    pub fn new(
        record_type: ResourceKind,
        action: ChangeAction,
        origin: ChangeOrigin,
        data: RecordSnapshot,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let checksum = ChangeChecksum::compute(&data)?;
        Ok(Self {
            record_type,
            action,
            origin,
            local_id: data.id,
            external_id: data.external_id.clone(),
            data,
            timestamp,
            checksum,
        })
    }

    /// Whether both changes address the same logical record
    ///
    /// The record types must match and at least one identifier axis must be
    /// present on both sides and equal.
    pub fn same_record(&self, other: &Change) -> bool {
        if self.record_type != other.record_type {
            return false;
        }

        let local_match = matches!(
            (self.local_id, other.local_id),
            (Some(a), Some(b)) if a == b
        );
        let external_match = matches!(
            (&self.external_id, &other.external_id),
            (Some(a), Some(b)) if a == b
        );

        local_match || external_match
    }

    /// Short description used in logs and error messages
    pub fn describe(&self) -> String {
        let id = match (self.local_id, &self.external_id) {
            (Some(local), _) => format!("#{}", local),
            (None, Some(external)) => format!("ext:{}", external),
            (None, None) => "new".to_string(),
        };
        format!("{} {} {}", self.action, self.record_type, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: ResourceKind, local_id: Option<i64>, external_id: Option<&str>) -> Change {
        Change::new(
            kind,
            ChangeAction::Update,
            ChangeOrigin::Local,
            RecordSnapshot {
                id: local_id,
                external_id: external_id.map(str::to_string),
                description: Some("Item".to_string()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_takes_identity_from_snapshot() {
        let c = change(ResourceKind::TodoItem, Some(4), Some("ext-4"));
        assert_eq!(c.local_id, Some(4));
        assert_eq!(c.external_id.as_deref(), Some("ext-4"));
        assert_eq!(c.checksum, ChangeChecksum::compute(&c.data).unwrap());
    }

    #[test]
    fn test_same_record_pairing_rule() {
        let a = change(ResourceKind::TodoItem, Some(1), None);
        let b = change(ResourceKind::TodoItem, Some(1), Some("ext-9"));
        let c = change(ResourceKind::TodoItem, None, Some("ext-9"));
        let d = change(ResourceKind::TodoItem, None, None);
        let list = change(ResourceKind::TodoList, Some(1), None);

        assert!(a.same_record(&b));
        assert!(b.same_record(&c));
        assert!(!a.same_record(&c));
        assert!(!d.same_record(&d));
        assert!(!a.same_record(&list));
    }

    #[test]
    fn test_describe() {
        let c = change(ResourceKind::TodoItem, None, Some("ext-2"));
        assert_eq!(c.describe(), "update todo_item ext:ext-2");
    }
}
