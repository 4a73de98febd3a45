//! Remote System-of-Record Abstraction
//!
//! Contract for the client that reaches the remote list service. The sync
//! engine treats the client as opaque: it only needs the aggregate fetch,
//! resource mutations and a health probe described here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// The kind of remote resource addressed by a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A list (the owning aggregate)
    TodoList,
    /// A child item of a list
    TodoItem,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::TodoList => "todo_list",
            ResourceKind::TodoItem => "todo_item",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A remote list together with all of its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAggregate {
    /// Remote identifier of the list
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<RemoteItem>,
}

/// A remote child item as reported inside a [`RemoteAggregate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Remote identifier of the item
    pub id: String,
    pub description: String,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

/// Payload accepted by create and update calls.
///
/// Only the fields relevant to the addressed [`ResourceKind`] are set; the
/// rest are omitted from the serialized body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    /// Remote id of the owning list, required when creating an item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

/// The resource returned by a create or update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    /// Remote identifier assigned by the system-of-record
    pub id: String,
    pub kind: ResourceKind,
    pub updated_at: DateTime<Utc>,
}

/// Result of a remote health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Reported status, `"ok"` when healthy
    pub status: String,
    /// Round-trip latency in milliseconds
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub version: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy")
    }
}

/// Client for the remote system-of-record.
///
/// Implementations must return [`BridgeError::Authentication`] for
/// credential failures so the engine can treat them as fatal, and should
/// classify rate limits and 5xx responses with the matching variants.
///
/// [`BridgeError::Authentication`]: crate::error::BridgeError::Authentication
///
/// # Example
///
/// ```ignore
/// use bridge_traits::remote::{RemoteSyncApi, ResourceKind, ResourceData};
///
/// async fn push(api: &dyn RemoteSyncApi, list_id: &str) -> bridge_traits::error::Result<()> {
///     let data = ResourceData {
///         parent_id: Some(list_id.to_string()),
///         description: Some("Buy milk".to_string()),
///         completed: Some(false),
///         ..Default::default()
///     };
///     let created = api.create_resource(ResourceKind::TodoItem, &data).await?;
///     println!("created {}", created.id);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait RemoteSyncApi: Send + Sync {
    /// Fetch a list and all of its items by the list's remote identifier.
    async fn fetch_aggregate(&self, external_id: &str) -> Result<RemoteAggregate>;

    /// Create a remote resource.
    async fn create_resource(&self, kind: ResourceKind, data: &ResourceData)
        -> Result<RemoteResource>;

    /// Update a remote resource identified by its remote id.
    async fn update_resource(
        &self,
        kind: ResourceKind,
        external_id: &str,
        data: &ResourceData,
    ) -> Result<RemoteResource>;

    /// Delete a remote resource identified by its remote id.
    async fn delete_resource(&self, kind: ResourceKind, external_id: &str) -> Result<()>;

    /// Probe the remote service.
    async fn health_check(&self) -> Result<HealthStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use mockall::mock;

    mock! {
        Remote {}

        #[async_trait]
        impl RemoteSyncApi for Remote {
            async fn fetch_aggregate(&self, external_id: &str) -> Result<RemoteAggregate>;
            async fn create_resource(&self, kind: ResourceKind, data: &ResourceData) -> Result<RemoteResource>;
            async fn update_resource(&self, kind: ResourceKind, external_id: &str, data: &ResourceData) -> Result<RemoteResource>;
            async fn delete_resource(&self, kind: ResourceKind, external_id: &str) -> Result<()>;
            async fn health_check(&self) -> Result<HealthStatus>;
        }
    }

    #[test]
    fn test_resource_kind_serialization() {
        assert_eq!(ResourceKind::TodoItem.as_str(), "todo_item");
        assert_eq!(
            serde_json::to_string(&ResourceKind::TodoList).unwrap(),
            "\"todo_list\""
        );
    }

    #[test]
    fn test_resource_data_omits_unset_fields() {
        let data = ResourceData {
            description: Some("Walk the dog".to_string()),
            completed: Some(true),
            ..Default::default()
        };

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "description": "Walk the dog", "completed": true })
        );
    }

    #[test]
    fn test_aggregate_items_default_to_empty() {
        let json = r#"{"id":"L1","name":"Groceries","updated_at":"2024-01-01T00:00:00Z"}"#;
        let aggregate: RemoteAggregate = serde_json::from_str(json).unwrap();
        assert!(aggregate.items.is_empty());
    }

    #[test]
    fn test_health_status() {
        let mut status = HealthStatus {
            status: "ok".to_string(),
            latency_ms: 12,
            timestamp: Utc::now(),
            version: Some("v2".to_string()),
        };
        assert!(status.is_healthy());

        status.status = "degraded".to_string();
        assert!(!status.is_healthy());
    }

    #[tokio::test]
    async fn test_trait_object_usage() {
        let mut remote = MockRemote::new();
        remote
            .expect_delete_resource()
            .times(1)
            .returning(|_, _| Err(BridgeError::Authentication("expired".to_string())));

        let api: &dyn RemoteSyncApi = &remote;
        let err = api
            .delete_resource(ResourceKind::TodoItem, "remote-1")
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
