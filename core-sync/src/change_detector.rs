//! # Change Detection
//!
//! Builds the local and remote change-sets of a run.
//!
//! Local changes are items (and the list header) modified after the run's
//! watermark. Remote changes come from the list's aggregate: items the local
//! store has never seen are creates, mapped items newer than their last sync
//! are updates.

use crate::change::{Change, ChangeAction, ChangeOrigin};
use crate::context::RunContext;
use crate::snapshot::RecordSnapshot;
use crate::{Result, SyncError};
use bridge_traits::{RemoteAggregate, RemoteSyncApi, ResourceKind};
use chrono::{DateTime, Utc};
use core_library::repositories::TodoItemRepository;
use core_library::TodoItem;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct ChangeDetector {
    items: Arc<dyn TodoItemRepository>,
    remote: Arc<dyn RemoteSyncApi>,
}

impl ChangeDetector {
    pub fn new(items: Arc<dyn TodoItemRepository>, remote: Arc<dyn RemoteSyncApi>) -> Self {
        Self { items, remote }
    }

    /// Local records modified strictly after the run's watermark
    ///
    /// Under a full sync every record counts as changed and items without a
    /// remote identifier are treated as creates.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store cannot be read
    #[instrument(skip(self, ctx), fields(owner_id = %ctx.owner_id(), since = %ctx.since))]
    pub async fn detect_local_changes(&self, ctx: &RunContext) -> Result<Vec<Change>> {
        let full = ctx.sync_strategy.is_full();
        let items = if full {
            self.items.find_by_list(ctx.owner_id()).await?
        } else {
            self.items
                .find_modified_since(ctx.owner_id(), ctx.since)
                .await?
        };

        let mut changes = Vec::with_capacity(items.len() + 1);
        for item in &items {
            let action = local_action(item, ctx.since, full);
            changes.push(Change::new(
                ResourceKind::TodoItem,
                action,
                ChangeOrigin::Local,
                RecordSnapshot::from_item(item),
                item.updated_at,
            )?);
        }

        let list = &ctx.list;
        if full || list.updated_at > ctx.since {
            changes.push(Change::new(
                ResourceKind::TodoList,
                ChangeAction::Update,
                ChangeOrigin::Local,
                RecordSnapshot::from_list(list),
                list.updated_at,
            )?);
        }

        debug!(count = changes.len(), "Local changes detected");
        Ok(changes)
    }

    /// Changes reported by the remote aggregate of the run's list
    ///
    /// A list that was never linked has no remote changes. Remote failures
    /// degrade to an empty change-set, except authentication failures.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Authentication` if the remote rejects the
    /// credentials, or an error if the local store cannot be read
    #[instrument(skip(self, ctx), fields(owner_id = %ctx.owner_id()))]
    pub async fn fetch_remote_changes(&self, ctx: &RunContext) -> Result<Vec<Change>> {
        let Some(external_id) = ctx.remote_list_id() else {
            debug!("List has no remote identifier, skipping fetch");
            return Ok(Vec::new());
        };

        let aggregate = match ctx
            .call_remote(self.remote.fetch_aggregate(external_id))
            .await
        {
            Ok(aggregate) => aggregate,
            Err(e @ SyncError::Authentication(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to fetch remote changes, continuing without them");
                return Ok(Vec::new());
            }
        };

        let changes = self.changes_from_aggregate(ctx, &aggregate).await?;
        info!(
            items = aggregate.items.len(),
            changes = changes.len(),
            "Remote changes fetched"
        );
        Ok(changes)
    }

    async fn changes_from_aggregate(
        &self,
        ctx: &RunContext,
        aggregate: &RemoteAggregate,
    ) -> Result<Vec<Change>> {
        let mut changes = Vec::new();

        if newer_than_sync(aggregate.updated_at, ctx.list.synced_at) {
            changes.push(Change::new(
                ResourceKind::TodoList,
                ChangeAction::Update,
                ChangeOrigin::Remote,
                RecordSnapshot::from_remote_list(aggregate, ctx.owner_id().0),
                aggregate.updated_at,
            )?);
        }

        for remote_item in &aggregate.items {
            let local = self
                .items
                .find_by_external_id(ctx.owner_id(), &remote_item.id)
                .await?;

            let change = match local {
                None => Some((ChangeAction::Create, None)),
                Some(local) if newer_than_sync(remote_item.updated_at, local.synced_at) => {
                    Some((ChangeAction::Update, Some(local.id.0)))
                }
                Some(_) => None,
            };

            if let Some((action, local_id)) = change {
                changes.push(Change::new(
                    ResourceKind::TodoItem,
                    action,
                    ChangeOrigin::Remote,
                    RecordSnapshot::from_remote_item(remote_item, local_id),
                    remote_item.updated_at,
                )?);
            }
        }

        Ok(changes)
    }
}

fn local_action(item: &TodoItem, since: DateTime<Utc>, full: bool) -> ChangeAction {
    let is_new = if full {
        item.external_id.is_none()
    } else {
        item.created_at > since
    };

    if is_new {
        ChangeAction::Create
    } else {
        ChangeAction::Update
    }
}

/// A record with no sync stamp always counts as newer
fn newer_than_sync(updated_at: DateTime<Utc>, synced_at: Option<DateTime<Utc>>) -> bool {
    synced_at.map_or(true, |synced_at| updated_at > synced_at)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SyncSessionId;
    use crate::strategy::{ConflictStrategy, SyncStrategy};
    use async_trait::async_trait;
    use bridge_traits::{
        BridgeError, Clock, HealthStatus, ManualClock, RemoteItem, RemoteResource, ResourceData,
    };
    use chrono::{Duration, TimeZone};
    use core_library::db::create_test_pool;
    use core_library::repositories::{
        SqliteTodoItemRepository, SqliteTodoListRepository, TodoListRepository,
    };
    use core_library::{NewTodoItem, NewTodoList, TodoItemUpdate, TodoList};
    use mockall::mock;
    use tokio_util::sync::CancellationToken;

    mock! {
        Remote {}

        #[async_trait]
        impl RemoteSyncApi for Remote {
            async fn fetch_aggregate(&self, external_id: &str) -> bridge_traits::Result<RemoteAggregate>;
            async fn create_resource(&self, kind: ResourceKind, data: &ResourceData) -> bridge_traits::Result<RemoteResource>;
            async fn update_resource(&self, kind: ResourceKind, external_id: &str, data: &ResourceData) -> bridge_traits::Result<RemoteResource>;
            async fn delete_resource(&self, kind: ResourceKind, external_id: &str) -> bridge_traits::Result<()>;
            async fn health_check(&self) -> bridge_traits::Result<HealthStatus>;
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
    }

    struct Fixture {
        items: Arc<SqliteTodoItemRepository>,
        clock: Arc<ManualClock>,
        list: TodoList,
    }

    /// A linked list last synced at `t0`, with the clock two days later
    async fn setup() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let lists = SqliteTodoListRepository::with_clock(pool.clone(), clock.clone());
        let items = Arc::new(SqliteTodoItemRepository::with_clock(pool, clock.clone()));

        let list = lists
            .insert(&NewTodoList::new("Errands").synced_with("remote-list"))
            .await
            .unwrap();
        lists.mark_synced(list.id, t0()).await.unwrap();
        let list = lists.find_by_id(list.id).await.unwrap().unwrap();

        clock.advance(Duration::days(2));
        Fixture { items, clock, list }
    }

    impl Fixture {
        fn ctx(&self, strategy: SyncStrategy) -> RunContext {
            RunContext {
                session_id: SyncSessionId::new(),
                list: self.list.clone(),
                sync_strategy: strategy,
                conflict_strategy: ConflictStrategy::LastWriteWins,
                since: t0() + Duration::days(1),
                started_at: t0(),
                remote_timeout: std::time::Duration::from_secs(5),
                cancel_token: CancellationToken::new(),
            }
        }

        fn detector(&self, remote: MockRemote) -> ChangeDetector {
            ChangeDetector::new(self.items.clone(), Arc::new(remote))
        }
    }

    fn aggregate(updated_at: DateTime<Utc>, items: Vec<RemoteItem>) -> RemoteAggregate {
        RemoteAggregate {
            id: "remote-list".to_string(),
            name: "Errands".to_string(),
            updated_at,
            items,
        }
    }

    fn remote_item(id: &str, completed: bool, updated_at: DateTime<Utc>) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            description: format!("Item {}", id),
            completed,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_local_changes_since_watermark() {
        let fixture = setup().await;
        let fresh = fixture
            .items
            .insert(&NewTodoItem::new(fixture.list.id, "New item"))
            .await
            .unwrap();

        let changes = fixture
            .detector(MockRemote::new())
            .detect_local_changes(&fixture.ctx(SyncStrategy::IncrementalSync))
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Create);
        assert_eq!(changes[0].local_id, Some(fresh.id.0));
        assert_eq!(changes[0].origin, ChangeOrigin::Local);
    }

    #[tokio::test]
    async fn test_old_item_edited_after_watermark_is_update() {
        let fixture = setup().await;
        let mut ctx = fixture.ctx(SyncStrategy::IncrementalSync);
        let item = fixture
            .items
            .insert(&NewTodoItem::new(fixture.list.id, "Old item"))
            .await
            .unwrap();

        ctx.since = fixture.clock.now();
        fixture.clock.advance(Duration::minutes(5));
        fixture
            .items
            .update(
                item.id,
                &TodoItemUpdate {
                    completed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let changes = fixture
            .detector(MockRemote::new())
            .detect_local_changes(&ctx)
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Update);
        assert_eq!(changes[0].data.completed, Some(true));
    }

    #[tokio::test]
    async fn test_full_sync_includes_everything() {
        let fixture = setup().await;
        fixture
            .items
            .insert(&NewTodoItem::new(fixture.list.id, "Linked").from_remote("r-1"))
            .await
            .unwrap();
        fixture
            .items
            .insert(&NewTodoItem::new(fixture.list.id, "Unlinked"))
            .await
            .unwrap();

        let mut ctx = fixture.ctx(SyncStrategy::FullSync);
        ctx.since = fixture.clock.now() + Duration::days(1);

        let changes = fixture
            .detector(MockRemote::new())
            .detect_local_changes(&ctx)
            .await
            .unwrap();

        let actions: Vec<_> = changes.iter().map(|c| (c.record_type, c.action)).collect();
        assert_eq!(
            actions,
            vec![
                (ResourceKind::TodoItem, ChangeAction::Update),
                (ResourceKind::TodoItem, ChangeAction::Create),
                (ResourceKind::TodoList, ChangeAction::Update),
            ]
        );
    }

    #[tokio::test]
    async fn test_remote_changes_create_and_update() {
        let fixture = setup().await;
        let linked = fixture
            .items
            .insert(&NewTodoItem::new(fixture.list.id, "Item r-1").from_remote("r-1"))
            .await
            .unwrap();
        fixture
            .items
            .insert(&NewTodoItem::new(fixture.list.id, "Item r-2").from_remote("r-2"))
            .await
            .unwrap();

        let now = fixture.clock.now();
        let mut remote = MockRemote::new();
        remote
            .expect_fetch_aggregate()
            .withf(|id| id == "remote-list")
            .times(1)
            .returning(move |_| {
                Ok(aggregate(
                    t0() - Duration::hours(1),
                    vec![
                        remote_item("r-1", true, now + Duration::minutes(1)),
                        remote_item("r-2", false, now - Duration::minutes(1)),
                        remote_item("r-3", false, now),
                    ],
                ))
            });

        let changes = fixture
            .detector(remote)
            .fetch_remote_changes(&fixture.ctx(SyncStrategy::IncrementalSync))
            .await
            .unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].action, ChangeAction::Update);
        assert_eq!(changes[0].local_id, Some(linked.id.0));
        assert_eq!(changes[0].external_id.as_deref(), Some("r-1"));
        assert_eq!(changes[1].action, ChangeAction::Create);
        assert_eq!(changes[1].local_id, None);
        assert_eq!(changes[1].external_id.as_deref(), Some("r-3"));
    }

    #[tokio::test]
    async fn test_remote_list_change_after_last_sync() {
        let fixture = setup().await;
        let mut remote = MockRemote::new();
        remote
            .expect_fetch_aggregate()
            .returning(|_| Ok(aggregate(t0() + Duration::hours(1), Vec::new())));

        let changes = fixture
            .detector(remote)
            .fetch_remote_changes(&fixture.ctx(SyncStrategy::IncrementalSync))
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].record_type, ResourceKind::TodoList);
        assert_eq!(changes[0].local_id, Some(fixture.list.id.0));
    }

    #[tokio::test]
    async fn test_unlinked_list_has_no_remote_changes() {
        let mut fixture = setup().await;
        fixture.list.external_id = None;

        let mut remote = MockRemote::new();
        remote.expect_fetch_aggregate().never();

        let changes = fixture
            .detector(remote)
            .fetch_remote_changes(&fixture.ctx(SyncStrategy::IncrementalSync))
            .await
            .unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_degrades_to_empty() {
        let fixture = setup().await;
        let mut remote = MockRemote::new();
        remote
            .expect_fetch_aggregate()
            .returning(|_| Err(BridgeError::Network("connection reset".to_string())));

        let changes = fixture
            .detector(remote)
            .fetch_remote_changes(&fixture.ctx(SyncStrategy::IncrementalSync))
            .await
            .unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_remote_authentication_failure_propagates() {
        let fixture = setup().await;
        let mut remote = MockRemote::new();
        remote
            .expect_fetch_aggregate()
            .returning(|_| Err(BridgeError::Authentication("bad token".to_string())));

        let err = fixture
            .detector(remote)
            .fetch_remote_changes(&fixture.ctx(SyncStrategy::IncrementalSync))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
    }
}
