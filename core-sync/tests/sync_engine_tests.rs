//! Integration tests for the sync run workflow
//!
//! These tests drive the coordinator against an in-memory database and a
//! scripted remote:
//! - Bidirectional run with a deferred conflict settled by auto-resolution
//! - Idempotent follow-up runs
//! - Authentication failures during fetch
//! - Full sync treating unlinked items as creates
//! - Concurrent run rejection and cooperative cancellation
//! - Run timeouts that land between changes, never inside one

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, Clock, HealthStatus, ManualClock, RemoteAggregate, RemoteItem, RemoteResource,
    RemoteSyncApi, ResourceData, ResourceKind,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_library::db::create_test_pool;
use core_library::repositories::{
    SqliteTodoItemRepository, SqliteTodoListRepository, TodoItemRepository, TodoListRepository,
};
use core_library::{NewTodoItem, NewTodoList, TodoItem, TodoItemUpdate, TodoList};
use core_runtime::events::EventBus;
use core_sync::{
    ConflictStrategy, SessionStatus, SyncConfig, SyncCoordinator, SyncError, SyncResult,
    SyncStrategy, TaskStatus,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, Notify};

// ============================================================================
// Scripted Remote
// ============================================================================

#[derive(Default)]
struct RemoteState {
    aggregate: Option<RemoteAggregate>,
    auth_failure: bool,
    fetches: usize,
    created: Vec<(ResourceKind, ResourceData)>,
    updated: Vec<(ResourceKind, String, ResourceData)>,
    deleted: Vec<String>,
}

/// Holds `fetch_aggregate` until released
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

/// Remote that serves a fixed aggregate and records every write
struct ScriptedRemote {
    state: AsyncMutex<RemoteState>,
    gate: Option<Arc<Gate>>,
    /// Delay before a create is acknowledged; the create is already recorded
    create_delay: Option<std::time::Duration>,
}

impl ScriptedRemote {
    fn new(aggregate: RemoteAggregate) -> Self {
        Self {
            state: AsyncMutex::new(RemoteState {
                aggregate: Some(aggregate),
                ..RemoteState::default()
            }),
            gate: None,
            create_delay: None,
        }
    }

    fn with_slow_creates(aggregate: RemoteAggregate, delay: std::time::Duration) -> Self {
        Self {
            create_delay: Some(delay),
            ..Self::new(aggregate)
        }
    }

    fn gated(aggregate: RemoteAggregate, gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(aggregate)
        }
    }

    async fn fail_authentication(&self) {
        self.state.lock().await.auth_failure = true;
    }
}

#[async_trait]
impl RemoteSyncApi for ScriptedRemote {
    async fn fetch_aggregate(&self, external_id: &str) -> bridge_traits::Result<RemoteAggregate> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let mut state = self.state.lock().await;
        state.fetches += 1;
        if state.auth_failure {
            return Err(BridgeError::Authentication("token revoked".to_string()));
        }

        state.aggregate.clone().ok_or_else(|| BridgeError::NotFound {
            kind: ResourceKind::TodoList.to_string(),
            id: external_id.to_string(),
        })
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        data: &ResourceData,
    ) -> bridge_traits::Result<RemoteResource> {
        let id = {
            let mut state = self.state.lock().await;
            state.created.push((kind, data.clone()));
            format!("ext-created-{}", state.created.len())
        };

        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        Ok(RemoteResource {
            id,
            kind,
            updated_at: t0(),
        })
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        external_id: &str,
        data: &ResourceData,
    ) -> bridge_traits::Result<RemoteResource> {
        let mut state = self.state.lock().await;
        state
            .updated
            .push((kind, external_id.to_string(), data.clone()));
        Ok(RemoteResource {
            id: external_id.to_string(),
            kind,
            updated_at: t0(),
        })
    }

    async fn delete_resource(
        &self,
        _kind: ResourceKind,
        external_id: &str,
    ) -> bridge_traits::Result<()> {
        self.state.lock().await.deleted.push(external_id.to_string());
        Ok(())
    }

    async fn health_check(&self) -> bridge_traits::Result<HealthStatus> {
        Ok(HealthStatus {
            status: "ok".to_string(),
            latency_ms: 8,
            timestamp: t0(),
            version: None,
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 7, 30, 0).unwrap()
}

/// Start of the edit session, two days after the list was last synced
fn t1() -> DateTime<Utc> {
    t0() + Duration::days(2)
}

struct Harness {
    pool: SqlitePool,
    clock: Arc<ManualClock>,
    list: TodoList,
}

impl Harness {
    async fn new() -> Self {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(t0()));

        let lists = SqliteTodoListRepository::with_clock(pool.clone(), clock.clone());
        let list = lists
            .insert(&NewTodoList::new("Household").synced_with("remote-list"))
            .await
            .unwrap();
        lists.mark_synced(list.id, t0()).await.unwrap();
        clock.set(t1());

        Self { pool, clock, list }
    }

    fn items(&self) -> SqliteTodoItemRepository {
        SqliteTodoItemRepository::with_clock(self.pool.clone(), self.clock.clone())
    }

    fn coordinator(&self, remote: Arc<ScriptedRemote>, config: SyncConfig) -> SyncCoordinator {
        SyncCoordinator::with_clock(
            config,
            self.pool.clone(),
            remote,
            Arc::new(EventBus::new(100)),
            self.clock.clone(),
        )
    }

    async fn item(&self, description: &str) -> TodoItem {
        self.items()
            .find_by_list(self.list.id)
            .await
            .unwrap()
            .into_iter()
            .find(|item| item.description == description)
            .unwrap()
    }

    /// Two new local items, one item edited on both sides, one new remote item
    async fn seed_bidirectional(&self) -> RemoteAggregate {
        let items = self.items();

        // Pulled long before the lookback window
        self.clock.set(t0() + Duration::hours(1));
        let shared = items
            .insert(
                &NewTodoItem::new(self.list.id, "Water plants")
                    .completed(true)
                    .from_remote("ext-shared"),
            )
            .await
            .unwrap();

        self.clock.set(t1());
        items
            .insert(&NewTodoItem::new(self.list.id, "Buy milk"))
            .await
            .unwrap();
        items
            .insert(&NewTodoItem::new(self.list.id, "Call plumber"))
            .await
            .unwrap();

        self.clock.advance(Duration::minutes(1));
        items
            .update(
                shared.id,
                &TodoItemUpdate {
                    completed: Some(false),
                    ..TodoItemUpdate::default()
                },
            )
            .await
            .unwrap();

        RemoteAggregate {
            id: "remote-list".to_string(),
            name: "Household".to_string(),
            updated_at: t0() - Duration::hours(1),
            items: vec![
                RemoteItem {
                    id: "ext-shared".to_string(),
                    description: "Water plants".to_string(),
                    completed: true,
                    updated_at: t1() + Duration::seconds(30),
                },
                RemoteItem {
                    id: "ext-new".to_string(),
                    description: "Pick up parcel".to_string(),
                    completed: false,
                    updated_at: t1() + Duration::seconds(10),
                },
            ],
        }
    }
}

fn quiet_aggregate() -> RemoteAggregate {
    RemoteAggregate {
        id: "remote-list".to_string(),
        name: "Household".to_string(),
        updated_at: t0() - Duration::hours(1),
        items: Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_bidirectional_run_with_deferred_conflict() {
    let harness = Harness::new().await;
    let aggregate = harness.seed_bidirectional().await;
    let remote = Arc::new(ScriptedRemote::new(aggregate));
    let coordinator = harness.coordinator(remote.clone(), SyncConfig::default());

    let result = coordinator
        .run_sync(
            harness.list.id,
            SyncStrategy::IncrementalSync,
            ConflictStrategy::ManualResolution,
        )
        .await
        .unwrap();

    assert_eq!(
        result,
        SyncResult {
            local_applied: 2,
            remote_applied: 1,
            conflicts_resolved: 1,
            errors: Vec::new(),
        }
    );

    let session = &coordinator.list_history(harness.list.id, 1).await.unwrap()[0];
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.local_changes_count, 3);
    assert_eq!(session.remote_changes_count, 2);
    assert_eq!(session.conflicts_count, 1);
    assert_eq!(session.sync_results, result);

    // The deferred task was persisted, then settled by the field rules
    let tasks = coordinator.session_tasks(&session.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::AutoResolved);
    assert_eq!(tasks[0].external_id.as_deref(), Some("ext-shared"));

    let shared = harness.item("Water plants").await;
    assert!(shared.completed);
    assert!(!shared.needs_sync());

    let parcel = harness.item("Pick up parcel").await;
    assert_eq!(parcel.external_id.as_deref(), Some("ext-new"));
    assert!(harness.item("Buy milk").await.external_id.is_some());
    assert!(harness.item("Call plumber").await.external_id.is_some());

    let state = remote.state.lock().await;
    assert_eq!(state.fetches, 1);
    assert_eq!(state.created.len(), 2);
    assert!(state
        .created
        .iter()
        .all(|(kind, data)| *kind == ResourceKind::TodoItem
            && data.parent_id.as_deref() == Some("remote-list")));
    assert_eq!(state.updated.len(), 1);
    assert_eq!(state.updated[0].1, "ext-shared");
    assert_eq!(state.updated[0].2.completed, Some(true));
    assert!(state.deleted.is_empty());
}

#[tokio::test]
async fn test_follow_up_run_is_idempotent() {
    let harness = Harness::new().await;
    let aggregate = harness.seed_bidirectional().await;
    let remote = Arc::new(ScriptedRemote::new(aggregate));
    let coordinator = harness.coordinator(remote.clone(), SyncConfig::default());

    coordinator
        .run_sync(
            harness.list.id,
            SyncStrategy::IncrementalSync,
            ConflictStrategy::LastWriteWins,
        )
        .await
        .unwrap();
    let items_after_first = harness.items().count_by_list(harness.list.id).await.unwrap();

    harness.clock.advance(Duration::minutes(5));
    let second = coordinator
        .run_sync(
            harness.list.id,
            SyncStrategy::IncrementalSync,
            ConflictStrategy::LastWriteWins,
        )
        .await
        .unwrap();

    assert_eq!(second, SyncResult::default());
    assert_eq!(
        harness.items().count_by_list(harness.list.id).await.unwrap(),
        items_after_first
    );

    let history = coordinator.list_history(harness.list.id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].conflicts_count, 0);

    let state = remote.state.lock().await;
    assert_eq!(state.fetches, 2);
    assert_eq!(state.created.len(), 2);
    assert_eq!(state.updated.len(), 1);
}

#[tokio::test]
async fn test_authentication_failure_during_fetch() {
    let harness = Harness::new().await;
    let aggregate = harness.seed_bidirectional().await;
    let remote = Arc::new(ScriptedRemote::new(aggregate));
    remote.fail_authentication().await;
    let coordinator = harness.coordinator(remote.clone(), SyncConfig::default());

    let result = coordinator
        .run_sync(
            harness.list.id,
            SyncStrategy::IncrementalSync,
            ConflictStrategy::ManualResolution,
        )
        .await;
    assert!(matches!(result, Err(SyncError::Authentication(_))));

    let session = &coordinator.list_history(harness.list.id, 1).await.unwrap()[0];
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.completed_at.is_some());
    assert!(session
        .error_message
        .as_deref()
        .unwrap()
        .contains("token revoked"));
    assert!(coordinator.session_tasks(&session.id).await.unwrap().is_empty());

    // Nothing was applied on either side
    assert!(harness.item("Buy milk").await.external_id.is_none());
    let state = remote.state.lock().await;
    assert!(state.created.is_empty());
    assert!(state.updated.is_empty());
}

#[tokio::test]
async fn test_full_sync_pushes_every_record() {
    let harness = Harness::new().await;
    let items = harness.items();
    items
        .insert(&NewTodoItem::new(harness.list.id, "Renew passport").from_remote("ext-linked"))
        .await
        .unwrap();
    items
        .insert(&NewTodoItem::new(harness.list.id, "Book flights"))
        .await
        .unwrap();

    let remote = Arc::new(ScriptedRemote::new(quiet_aggregate()));
    let coordinator = harness.coordinator(remote.clone(), SyncConfig::default());

    let result = coordinator
        .run_sync(
            harness.list.id,
            SyncStrategy::FullSync,
            ConflictStrategy::LastWriteWins,
        )
        .await
        .unwrap();
    assert_eq!(result.local_applied, 3);
    assert_eq!(result.remote_applied, 0);

    let state = remote.state.lock().await;
    assert_eq!(state.created.len(), 1);
    assert_eq!(state.created[0].1.description.as_deref(), Some("Book flights"));

    let mut updated: Vec<(ResourceKind, &str)> = state
        .updated
        .iter()
        .map(|(kind, id, _)| (*kind, id.as_str()))
        .collect();
    updated.sort_by_key(|(_, id)| id.to_string());
    assert_eq!(
        updated,
        vec![
            (ResourceKind::TodoItem, "ext-linked"),
            (ResourceKind::TodoList, "remote-list"),
        ]
    );

    let list = SqliteTodoListRepository::new(harness.pool.clone())
        .find_by_id(harness.list.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(list.synced_at, Some(harness.clock.now()));
}

#[tokio::test]
async fn test_concurrent_run_rejected_and_cancellation_honoured() {
    let harness = Harness::new().await;
    let gate = Arc::new(Gate::default());
    let remote = Arc::new(ScriptedRemote::gated(quiet_aggregate(), gate.clone()));
    let coordinator = Arc::new(harness.coordinator(remote, SyncConfig::default()));
    let owner_id = harness.list.id;

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .run_sync(
                    owner_id,
                    SyncStrategy::IncrementalSync,
                    ConflictStrategy::LastWriteWins,
                )
                .await
        })
    };

    gate.entered.notified().await;
    assert!(coordinator.is_sync_active(owner_id));

    let second = coordinator
        .run_sync(owner_id, SyncStrategy::RealTimeSync, ConflictStrategy::LastWriteWins)
        .await;
    assert!(matches!(second, Err(SyncError::SyncInProgress { .. })));

    let session = coordinator.list_history(owner_id, 1).await.unwrap().remove(0);
    assert_eq!(session.status, SessionStatus::Running);
    coordinator.cancel_sync(&session.id).await.unwrap();
    gate.release.notify_one();

    let outcome = running.await.unwrap();
    assert!(matches!(outcome, Err(SyncError::Cancelled)));
    assert!(!coordinator.is_sync_active(owner_id));

    let history = coordinator.list_history(owner_id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_run_timeout_keeps_created_item_linked() {
    let harness = Harness::new().await;
    harness
        .items()
        .insert(&NewTodoItem::new(harness.list.id, "Buy milk"))
        .await
        .unwrap();

    let remote = Arc::new(ScriptedRemote::with_slow_creates(
        quiet_aggregate(),
        std::time::Duration::from_millis(1500),
    ));
    let config = SyncConfig {
        run_timeout_secs: 1,
        ..SyncConfig::default()
    };
    let coordinator = harness.coordinator(remote.clone(), config);

    let result = coordinator
        .run_sync(
            harness.list.id,
            SyncStrategy::IncrementalSync,
            ConflictStrategy::LastWriteWins,
        )
        .await;
    assert!(matches!(result, Err(SyncError::Timeout(1))));

    let session = &coordinator.list_history(harness.list.id, 1).await.unwrap()[0];
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(
        session.error_message.as_deref(),
        Some("Timeout after 1 seconds")
    );
    assert!(!coordinator.is_sync_active(harness.list.id));

    // The create that was in flight at the deadline still got linked
    let milk = harness.item("Buy milk").await;
    assert_eq!(milk.external_id.as_deref(), Some("ext-created-1"));
    assert_eq!(remote.state.lock().await.created.len(), 1);

    harness.clock.advance(Duration::minutes(5));
    coordinator
        .run_sync(
            harness.list.id,
            SyncStrategy::IncrementalSync,
            ConflictStrategy::LastWriteWins,
        )
        .await
        .unwrap();

    let state = remote.state.lock().await;
    assert_eq!(state.created.len(), 1);
    assert!(state.updated.iter().any(|(_, id, _)| id == "ext-created-1"));
    assert_eq!(harness.items().count_by_list(harness.list.id).await.unwrap(), 1);
}
