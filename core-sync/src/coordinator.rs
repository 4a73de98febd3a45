//! # Sync Coordinator
//!
//! Runs bidirectional synchronization between a todo list and the remote
//! system-of-record, and exposes the session and conflict-task operations
//! hosts need around those runs.
//!
//! ## Workflow
//!
//! 0. Refuse the run when the list is missing, sync is disabled, or another
//!    run already owns the list
//! 1. Create the session and move it to `running`
//! 2. Probe remote health (authentication failures abort the run)
//! 3. Detect local changes since the watermark and fetch remote changes
//! 4. Detect conflicts and record the change counts on the session
//! 5. Resolve conflicts with the requested strategy, persisting deferred tasks
//! 6. Apply remote changes locally, push local changes, apply resolutions
//! 7. Auto-resolve this run's deferred tasks where the field rules allow it
//! 8. Complete the session and stamp the list as synced
//!
//! The cancellation token is checked between phases and between changes, so
//! a run always stops on a change boundary. Reaching `run_timeout_secs`
//! cancels the token rather than dropping the run; every remote call is
//! bounded by `remote_timeout_secs`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{ConflictStrategy, SyncConfig, SyncCoordinator, SyncStrategy};
//! use std::sync::Arc;
//!
//! let coordinator = SyncCoordinator::new(SyncConfig::default(), pool, remote, event_bus);
//! let result = coordinator
//!     .run_sync(list_id, SyncStrategy::IncrementalSync, ConflictStrategy::LastWriteWins)
//!     .await?;
//! println!("pushed {} pulled {}", result.local_applied, result.remote_applied);
//! ```

use crate::{
    change_applier::{ChangeApplier, SyncResult},
    change_detector::ChangeDetector,
    conflict_detector::ConflictDetector,
    conflict_resolver::{ConflictHandler, ConflictResolver, Resolution},
    conflict_task::{ConflictResolutionTask, ConflictTaskId, TaskStats, TaskStatus},
    context::RunContext,
    overview::{SyncOverview, SyncState},
    repository::{
        ConflictTaskRepository, SqliteConflictTaskRepository, SqliteSyncSessionRepository,
        SyncSessionRepository,
    },
    retry::RetryPolicy,
    session::{SessionStats, SyncSession, SyncSessionId},
    snapshot::RecordSnapshot,
    strategy::{ConflictStrategy, SyncStrategy},
    Result, SyncError,
};
use bridge_traits::{Clock, RemoteSyncApi, SystemClock};
use chrono::{DateTime, Utc};
use core_library::repositories::{
    SqliteTodoItemRepository, SqliteTodoListRepository, TodoItemRepository, TodoListRepository,
};
use core_library::{TodoList, TodoListId};
use core_runtime::config::SyncSettings;
use core_runtime::events::{ConflictEvent, CoreEvent, EventBus, RemoteEvent, SyncEvent};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Sync coordinator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Timeout applied to every individual remote call (seconds)
    pub remote_timeout_secs: u64,

    /// Timeout for an entire run (seconds)
    pub run_timeout_secs: u64,

    /// Local detection window when the list has no successful session (hours)
    pub lookback_hours: u32,

    /// Probe remote health before detection starts
    pub verify_remote_health: bool,

    /// Auto-resolve a run's deferred tasks before the session completes
    pub auto_resolve_after_run: bool,

    /// Strategy used by [`SyncCoordinator::sync_now`] and task maintenance
    pub default_sync_strategy: SyncStrategy,

    /// Conflict strategy used by [`SyncCoordinator::sync_now`]
    pub default_conflict_strategy: ConflictStrategy,

    /// Policy used by [`SyncCoordinator::sync_now`]
    pub retry_policy: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            remote_timeout_secs: settings.remote_timeout_secs,
            run_timeout_secs: settings.run_timeout_secs,
            lookback_hours: settings.lookback_hours,
            verify_remote_health: settings.verify_remote_health,
            auto_resolve_after_run: settings.auto_resolve_after_run,
            default_sync_strategy: SyncStrategy::default(),
            default_conflict_strategy: ConflictStrategy::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Active run tracking
#[derive(Debug, Clone)]
struct ActiveRun {
    session_id: SyncSessionId,
    cancel_token: CancellationToken,
}

type ActiveRuns = Arc<Mutex<HashMap<TodoListId, ActiveRun>>>;

/// Releases the owner's slot when the run ends, however it ends
struct ActiveRunGuard {
    runs: ActiveRuns,
    owner_id: TodoListId,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.owner_id);
    }
}

/// Sync coordinator for orchestrating list synchronization
pub struct SyncCoordinator {
    config: SyncConfig,

    /// Event bus for session and task transitions
    event_bus: Arc<EventBus>,

    clock: Arc<dyn Clock>,

    /// Client for the remote system-of-record
    remote: Arc<dyn RemoteSyncApi>,

    lists: Arc<dyn TodoListRepository>,
    items: Arc<dyn TodoItemRepository>,
    sessions: Arc<dyn SyncSessionRepository>,
    tasks: Arc<dyn ConflictTaskRepository>,

    detector: ChangeDetector,
    conflict_detector: ConflictDetector,
    resolver: ConflictResolver,
    applier: ChangeApplier,

    /// At most one run per list
    active_runs: ActiveRuns,
}

impl SyncCoordinator {
    /// Create a coordinator on the system clock
    ///
    /// # Arguments
    ///
    /// * `config` - Sync configuration
    /// * `db_pool` - Database holding lists, items, sessions and tasks
    /// * `remote` - Client for the remote system-of-record
    /// * `event_bus` - Event bus for session and task transitions
    pub fn new(
        config: SyncConfig,
        db_pool: SqlitePool,
        remote: Arc<dyn RemoteSyncApi>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self::with_clock(config, db_pool, remote, event_bus, Arc::new(SystemClock))
    }

    /// Create a coordinator on an explicit clock
    pub fn with_clock(
        config: SyncConfig,
        db_pool: SqlitePool,
        remote: Arc<dyn RemoteSyncApi>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let lists: Arc<dyn TodoListRepository> = Arc::new(SqliteTodoListRepository::with_clock(
            db_pool.clone(),
            clock.clone(),
        ));
        let items: Arc<dyn TodoItemRepository> = Arc::new(SqliteTodoItemRepository::with_clock(
            db_pool.clone(),
            clock.clone(),
        ));
        let sessions: Arc<dyn SyncSessionRepository> =
            Arc::new(SqliteSyncSessionRepository::new(db_pool.clone()));
        let tasks: Arc<dyn ConflictTaskRepository> =
            Arc::new(SqliteConflictTaskRepository::new(db_pool));

        let detector = ChangeDetector::new(items.clone(), remote.clone());
        let applier =
            ChangeApplier::new(lists.clone(), items.clone(), remote.clone(), clock.clone());

        Self {
            config,
            event_bus,
            clock,
            remote,
            lists,
            items,
            sessions,
            tasks,
            detector,
            conflict_detector: ConflictDetector::new(),
            resolver: ConflictResolver::new(),
            applier,
            active_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register an additional or replacement conflict strategy handler
    pub fn register_handler(&mut self, handler: Arc<dyn ConflictHandler>) {
        info!("Registered conflict handler: {}", handler.strategy());
        self.resolver.register(handler);
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Run one sync of a list
    ///
    /// # Errors
    ///
    /// Returns `OwnerNotFound`, `SyncDisabled` or `SyncInProgress` before any
    /// session is created. Once the session exists, failures finalize it as
    /// failed (or cancelled) and are returned; `Timeout` when the run exceeds
    /// its bound.
    #[instrument(skip(self), fields(owner_id = %owner_id, strategy = %sync_strategy))]
    pub async fn run_sync(
        &self,
        owner_id: TodoListId,
        sync_strategy: SyncStrategy,
        conflict_strategy: ConflictStrategy,
    ) -> Result<SyncResult> {
        let list = self.require_list(owner_id).await?;
        if !list.sync_enabled {
            return Err(SyncError::SyncDisabled {
                owner_id: owner_id.0,
            });
        }

        let session = SyncSession::new(owner_id, sync_strategy, self.clock.now());
        let cancel_token = CancellationToken::new();
        let _guard = self.register_run(owner_id, session.id, cancel_token.clone())?;

        self.sessions.insert(&session).await?;
        self.emit_session(&session);

        let mut session = session.start(self.clock.now())?;
        self.sessions.update(&session).await?;
        self.emit_session(&session);

        info!(session_id = %session.id, "Sync run started");

        let (outcome, deadline_hit) = self
            .run_until_deadline(&mut session, list, conflict_strategy, cancel_token)
            .await;

        match outcome {
            Ok(result) => self.finish_completed(session, result).await,
            Err(SyncError::Cancelled) if deadline_hit => {
                let secs = self.config.run_timeout_secs;
                let message = format!("Timeout after {} seconds", secs);
                Err(self
                    .finish_failed(session, SyncError::Timeout(secs), message)
                    .await)
            }
            Err(e) => {
                let message = e.to_string();
                Err(self.finish_failed(session, e, message).await)
            }
        }
    }

    /// Drive the run to completion, cancelling its token at the deadline
    ///
    /// The run future is never dropped early: a change in flight when the
    /// deadline passes is finished, and the run stops at its next
    /// cancellation check.
    async fn run_until_deadline(
        &self,
        session: &mut SyncSession,
        list: TodoList,
        conflict_strategy: ConflictStrategy,
        cancel_token: CancellationToken,
    ) -> (Result<SyncResult>, bool) {
        let run_token = cancel_token.clone();
        let run = self.execute_run(session, list, conflict_strategy, cancel_token);
        let deadline = sleep(Duration::from_secs(self.config.run_timeout_secs));
        tokio::pin!(run, deadline);

        let mut deadline_hit = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                () = &mut deadline, if !deadline_hit => {
                    warn!(
                        timeout_secs = self.config.run_timeout_secs,
                        "Run deadline reached, stopping after the change in flight"
                    );
                    deadline_hit = true;
                    run_token.cancel();
                }
            }
        };

        (outcome, deadline_hit)
    }

    /// Run a sync, retrying transient failures per `policy`
    ///
    /// # Errors
    ///
    /// Returns the last error once the policy gives up
    #[instrument(skip(self, policy), fields(owner_id = %owner_id))]
    pub async fn run_sync_with_retry(
        &self,
        owner_id: TodoListId,
        sync_strategy: SyncStrategy,
        conflict_strategy: ConflictStrategy,
        policy: &RetryPolicy,
    ) -> Result<SyncResult> {
        let mut attempt = 1;
        loop {
            match self
                .run_sync(owner_id, sync_strategy, conflict_strategy)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => match policy.delay_for(attempt, &e) {
                    Some(delay) => {
                        warn!(
                            attempt,
                            delay_secs = delay.as_secs(),
                            error = %e,
                            "Sync run failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// Run a sync with the configured default strategies and retry policy
    ///
    /// # Errors
    ///
    /// See [`SyncCoordinator::run_sync_with_retry`]
    pub async fn sync_now(&self, owner_id: TodoListId) -> Result<SyncResult> {
        self.run_sync_with_retry(
            owner_id,
            self.config.default_sync_strategy,
            self.config.default_conflict_strategy,
            &self.config.retry_policy,
        )
        .await
    }

    #[instrument(skip(self, session, list, cancel_token), fields(session_id = %session.id))]
    async fn execute_run(
        &self,
        session: &mut SyncSession,
        list: TodoList,
        conflict_strategy: ConflictStrategy,
        cancel_token: CancellationToken,
    ) -> Result<SyncResult> {
        let since = self.watermark(&list, session.strategy).await?;
        let ctx = RunContext {
            session_id: session.id,
            list,
            sync_strategy: session.strategy,
            conflict_strategy,
            since,
            started_at: session.started_at,
            remote_timeout: Duration::from_secs(self.config.remote_timeout_secs),
            cancel_token,
        };

        if self.config.verify_remote_health {
            info!("Phase 0: Checking remote health");
            self.check_remote_health(&ctx).await?;
        }
        ctx.check_cancelled()?;

        info!("Phase 1: Detecting changes since {}", ctx.since);
        let local = self.detector.detect_local_changes(&ctx).await?;
        let remote = self.detector.fetch_remote_changes(&ctx).await?;
        ctx.check_cancelled()?;

        info!("Phase 2: Detecting conflicts");
        let conflicts = self.conflict_detector.detect_conflicts(&local, &remote);
        session.record_counts(
            local.len() as u64,
            remote.len() as u64,
            conflicts.len() as u64,
        )?;
        self.sessions.update(session).await?;
        info!(
            local = local.len(),
            remote = remote.len(),
            conflicts = conflicts.len(),
            "Change-sets ready"
        );

        info!("Phase 3: Resolving {} conflicts", conflicts.len());
        let resolutions = self
            .resolver
            .resolve_all(&conflicts, &ctx, self.clock.now())?;

        let mut deferred = Vec::new();
        for task in resolutions.iter().filter_map(Resolution::task) {
            self.tasks.insert(task).await?;
            self.emit_task(task);
            deferred.push(task.clone());
        }
        ctx.check_cancelled()?;

        info!("Phase 4: Applying changes");
        let mut result = self
            .applier
            .apply_changes(&ctx, &local, &remote, &resolutions)
            .await?;
        ctx.check_cancelled()?;

        if self.config.auto_resolve_after_run && !deferred.is_empty() {
            info!("Phase 5: Auto-resolving {} conflict tasks", deferred.len());
            self.auto_resolve_tasks(&ctx, deferred, &mut result).await?;
            ctx.check_cancelled()?;
        }

        Ok(result)
    }

    /// Local records modified after this instant count as changed
    async fn watermark(&self, list: &TodoList, strategy: SyncStrategy) -> Result<DateTime<Utc>> {
        if strategy.is_full() {
            return Ok(DateTime::<Utc>::MIN_UTC);
        }

        let last = self.sessions.find_last_successful(list.id).await?;
        Ok(match last.and_then(|session| session.completed_at) {
            Some(completed_at) => completed_at,
            None => {
                self.clock.now() - chrono::Duration::hours(i64::from(self.config.lookback_hours))
            }
        })
    }

    async fn check_remote_health(&self, ctx: &RunContext) -> Result<()> {
        let (healthy, status, latency_ms) =
            match ctx.call_remote(self.remote.health_check()).await {
                Ok(health) => (health.is_healthy(), health.status, Some(health.latency_ms)),
                Err(e @ SyncError::Authentication(_)) => return Err(e),
                Err(e) => (false, e.to_string(), None),
            };

        if !healthy {
            warn!(status = %status, "Remote unhealthy, continuing");
        }

        self.event_bus
            .emit(CoreEvent::Remote(RemoteEvent::HealthChecked {
                healthy,
                status,
                latency_ms,
            }))
            .ok();
        Ok(())
    }

    async fn finish_completed(
        &self,
        session: SyncSession,
        result: SyncResult,
    ) -> Result<SyncResult> {
        let now = self.clock.now();
        let session = session.complete(result.clone(), now)?;
        self.sessions.update(&session).await?;
        self.lists.mark_synced(session.owner_id, now).await?;
        self.emit_session(&session);

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Completed {
                session_id: session.id.to_string(),
                owner_id: session.owner_id.0,
                local_applied: result.local_applied,
                remote_applied: result.remote_applied,
                conflicts_resolved: result.conflicts_resolved,
                errors: result.errors.len() as u64,
                duration_ms: session.duration(now).num_milliseconds().max(0) as u64,
            }))
            .ok();

        info!(
            session_id = %session.id,
            local_applied = result.local_applied,
            remote_applied = result.remote_applied,
            conflicts_resolved = result.conflicts_resolved,
            errors = result.errors.len(),
            "Sync run completed in {}",
            session.duration_in_words(now)
        );
        Ok(result)
    }

    /// Finalize the session for `error` and hand the error back
    async fn finish_failed(
        &self,
        session: SyncSession,
        error: SyncError,
        message: String,
    ) -> SyncError {
        let now = self.clock.now();
        let (session_id, owner_id) = (session.id, session.owner_id);
        let cancelled = matches!(error, SyncError::Cancelled);

        let finalized = if cancelled {
            session.cancel(now)
        } else {
            session.fail(message.clone(), now)
        };

        match finalized {
            Ok(session) => {
                if let Err(e) = self.sessions.update(&session).await {
                    error!(session_id = %session_id, error = %e, "Failed to persist finalized session");
                }
                self.emit_session(&session);
            }
            Err(e) => error!(session_id = %session_id, error = %e, "Failed to finalize session"),
        }

        if cancelled {
            info!(session_id = %session_id, "Sync run cancelled");
        } else {
            error!(session_id = %session_id, error = %message, "Sync run failed");
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::Failed {
                    session_id: session_id.to_string(),
                    owner_id: owner_id.0,
                    message,
                    recoverable: error.is_retryable(),
                }))
                .ok();
        }

        error
    }

    fn register_run(
        &self,
        owner_id: TodoListId,
        session_id: SyncSessionId,
        cancel_token: CancellationToken,
    ) -> Result<ActiveRunGuard> {
        let mut runs = self
            .active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if runs.contains_key(&owner_id) {
            return Err(SyncError::SyncInProgress {
                owner_id: owner_id.0,
            });
        }

        runs.insert(
            owner_id,
            ActiveRun {
                session_id,
                cancel_token,
            },
        );

        Ok(ActiveRunGuard {
            runs: Arc::clone(&self.active_runs),
            owner_id,
        })
    }

    fn active_run_for_session(&self, session_id: &SyncSessionId) -> Option<(TodoListId, ActiveRun)> {
        self.active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, run)| run.session_id == *session_id)
            .map(|(owner_id, run)| (*owner_id, run.clone()))
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Check if a run is currently active for a list
    pub fn is_sync_active(&self, owner_id: TodoListId) -> bool {
        self.active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&owner_id)
    }

    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session doesn't exist
    pub async fn get_session(&self, session_id: &SyncSessionId) -> Result<SyncSession> {
        self.sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Sessions of a list, most recent first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn list_history(&self, owner_id: TodoListId, limit: usize) -> Result<Vec<SyncSession>> {
        self.sessions
            .get_history(owner_id, limit.try_into().unwrap_or(u32::MAX))
            .await
    }

    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn session_stats(&self, owner_id: TodoListId) -> Result<SessionStats> {
        let sessions = self.sessions.get_history(owner_id, u32::MAX).await?;
        Ok(SessionStats::from_sessions(&sessions))
    }

    /// Delete a session and its conflict tasks
    ///
    /// # Errors
    ///
    /// Returns `SyncInProgress` if the session belongs to the active run
    pub async fn delete_session(&self, session_id: &SyncSessionId) -> Result<bool> {
        if let Some((owner_id, _)) = self.active_run_for_session(session_id) {
            return Err(SyncError::SyncInProgress {
                owner_id: owner_id.0,
            });
        }
        self.sessions.delete(session_id).await
    }

    /// Cancel a session
    ///
    /// An active run is signalled through its token and finalizes itself at
    /// its next cancellation check. Any other non-terminal session is cancelled
    /// in place.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, or `InvalidStateTransition` for terminal
    /// sessions
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn cancel_sync(&self, session_id: &SyncSessionId) -> Result<()> {
        if let Some((_, run)) = self.active_run_for_session(session_id) {
            run.cancel_token.cancel();
            info!("Cancellation requested for active run");
            return Ok(());
        }

        let session = self
            .get_session(session_id)
            .await?
            .cancel(self.clock.now())?;
        self.sessions.update(&session).await?;
        self.emit_session(&session);
        info!("Cancelled sync session");
        Ok(())
    }

    /// Mark a running session paused
    ///
    /// A run in progress cannot be paused; it finalizes its own session.
    ///
    /// # Errors
    ///
    /// Returns `SyncInProgress` if the session belongs to the active run,
    /// `SessionNotFound`, or `InvalidStateTransition` unless running
    pub async fn pause_sync(&self, session_id: &SyncSessionId) -> Result<SyncSession> {
        if let Some((owner_id, _)) = self.active_run_for_session(session_id) {
            return Err(SyncError::SyncInProgress {
                owner_id: owner_id.0,
            });
        }

        let session = self.get_session(session_id).await?.pause(self.clock.now())?;
        self.sessions.update(&session).await?;
        self.emit_session(&session);
        Ok(session)
    }

    /// Mark a paused session running again
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, or `InvalidStateTransition` unless paused
    pub async fn resume_sync(&self, session_id: &SyncSessionId) -> Result<SyncSession> {
        let session = self
            .get_session(session_id)
            .await?
            .resume(self.clock.now())?;
        self.sessions.update(&session).await?;
        self.emit_session(&session);
        Ok(session)
    }

    // ========================================================================
    // Overview
    // ========================================================================

    /// # Errors
    ///
    /// Returns `OwnerNotFound` if the list doesn't exist
    pub async fn sync_overview(&self, owner_id: TodoListId) -> Result<SyncOverview> {
        let list = self.require_list(owner_id).await?;
        let latest = self.sessions.find_latest(owner_id).await?;
        let pending_items = self.items.find_needing_sync(owner_id).await?.len() as u64;
        let tasks_requiring_attention =
            self.tasks.find_requiring_attention(owner_id).await?.len() as u64;

        let now = self.clock.now();
        Ok(SyncOverview {
            owner_id,
            state: SyncState::derive(&list, latest.as_ref(), pending_items),
            synced_at: list.synced_at,
            pending_items,
            last_session: latest.map(|session| session.summary(now)),
            tasks_requiring_attention,
        })
    }

    /// Sync-enabled lists modified since their last sync
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn owners_needing_sync(&self) -> Result<Vec<TodoList>> {
        Ok(self.lists.find_needing_sync().await?)
    }

    // ========================================================================
    // Conflict Tasks
    // ========================================================================

    /// # Errors
    ///
    /// Returns `TaskNotFound` if the task doesn't exist
    pub async fn get_task(&self, task_id: &ConflictTaskId) -> Result<ConflictResolutionTask> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| SyncError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Tasks created by one session
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn session_tasks(
        &self,
        session_id: &SyncSessionId,
    ) -> Result<Vec<ConflictResolutionTask>> {
        self.tasks.find_by_session(session_id).await
    }

    /// Pending and reviewing tasks of a list, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn tasks_requiring_attention(
        &self,
        owner_id: TodoListId,
    ) -> Result<Vec<ConflictResolutionTask>> {
        self.tasks.find_requiring_attention(owner_id).await
    }

    /// Tasks of a list still waiting to be picked up
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn pending_tasks(&self, owner_id: TodoListId) -> Result<Vec<ConflictResolutionTask>> {
        let tasks = self.tasks.find_requiring_attention(owner_id).await?;
        Ok(tasks
            .into_iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .collect())
    }

    /// Tasks requiring attention, highest priority first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn priority_queue(&self, owner_id: TodoListId) -> Result<Vec<ConflictResolutionTask>> {
        let tasks = self.tasks.find_requiring_attention(owner_id).await?;
        Ok(crate::conflict_task::priority_queue(tasks, self.clock.now()))
    }

    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn task_stats(&self, owner_id: TodoListId) -> Result<TaskStats> {
        let tasks = self.tasks.find_by_owner(owner_id).await?;
        Ok(TaskStats::from_tasks(&tasks))
    }

    /// Move a pending task into review
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound`, `SyncInProgress` while a run owns the list, or
    /// `InvalidStateTransition` unless pending
    pub async fn review_task(&self, task_id: &ConflictTaskId) -> Result<ConflictResolutionTask> {
        let mut task = self.get_task(task_id).await?;
        self.idle_task_owner(&task).await?;
        task.start_review(self.clock.now())?;
        self.tasks.update(&task).await?;
        self.emit_task(&task);
        Ok(task)
    }

    /// Settle a task with data chosen by a person and apply it to both sides
    ///
    /// The task is persisted as resolved only after the resolution was
    /// applied, so a failed apply leaves it open for another attempt.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound`, `InvalidStateTransition` for terminal tasks,
    /// `SyncInProgress` while a run owns the list, or the apply error
    #[instrument(skip(self, resolution), fields(task_id = %task_id))]
    pub async fn resolve_task(
        &self,
        task_id: &ConflictTaskId,
        resolution: RecordSnapshot,
        resolved_by: Option<String>,
    ) -> Result<ConflictResolutionTask> {
        let mut task = self.get_task(task_id).await?;
        let now = self.clock.now();
        task.manual_resolve(resolution, resolved_by, now)?;

        if let Some(change) = task.resolution_change(now)? {
            let ctx = self.task_context(&task).await?;
            self.applier.apply_resolved(&ctx, &change).await?;
        }

        self.tasks.update(&task).await?;
        self.emit_task(&task);
        Ok(task)
    }

    /// Dismiss a task without applying anything
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound`, `SyncInProgress` while a run owns the list, or
    /// `InvalidStateTransition` for terminal tasks
    pub async fn reject_task(
        &self,
        task_id: &ConflictTaskId,
        reason: Option<String>,
        rejected_by: Option<String>,
    ) -> Result<ConflictResolutionTask> {
        let mut task = self.get_task(task_id).await?;
        self.idle_task_owner(&task).await?;
        task.reject(reason, rejected_by, self.clock.now())?;
        self.tasks.update(&task).await?;
        self.emit_task(&task);
        Ok(task)
    }

    /// Auto-resolve every pending task of a list that the field rules allow
    ///
    /// # Errors
    ///
    /// Returns `OwnerNotFound`, `SyncInProgress` while a run owns the list, or
    /// a fatal remote error. Other apply failures are recorded in the result
    /// and leave their task pending.
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub async fn auto_resolve_pending(&self, owner_id: TodoListId) -> Result<SyncResult> {
        let list = self.require_list(owner_id).await?;
        if self.is_sync_active(owner_id) {
            return Err(SyncError::SyncInProgress {
                owner_id: owner_id.0,
            });
        }

        let pending: Vec<ConflictResolutionTask> = self
            .tasks
            .find_requiring_attention(owner_id)
            .await?
            .into_iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .collect();

        let mut result = SyncResult::default();
        let Some(first) = pending.first() else {
            debug!("No pending tasks");
            return Ok(result);
        };

        let ctx = self.maintenance_context(list, first.session_id);
        self.auto_resolve_tasks(&ctx, pending, &mut result).await?;
        Ok(result)
    }

    async fn auto_resolve_tasks(
        &self,
        base: &RunContext,
        tasks: Vec<ConflictResolutionTask>,
        result: &mut SyncResult,
    ) -> Result<()> {
        let mut resolved = 0u64;
        let mut remaining = 0u64;

        for task in tasks {
            // Re-read so a task settled since it was listed is left alone
            let Some(mut task) = self.tasks.find_by_id(&task.id).await? else {
                continue;
            };
            let now = self.clock.now();
            if !task.attempt_auto_resolution(now) {
                remaining += 1;
                continue;
            }

            if let Some(change) = task.resolution_change(now)? {
                let ctx = RunContext {
                    session_id: task.session_id,
                    ..base.clone()
                };
                if let Err(e) = self.applier.apply_resolved(&ctx, &change).await {
                    result.record_error("resolved", e)?;
                    remaining += 1;
                    continue;
                }
            }

            match self.tasks.update(&task).await {
                Ok(()) => {}
                Err(SyncError::InvalidStateTransition { from, .. }) => {
                    warn!(task_id = %task.id, stored = %from, "Task settled elsewhere, keeping it");
                    remaining += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
            self.emit_task(&task);
            result.conflicts_resolved += 1;
            resolved += 1;
        }

        self.event_bus
            .emit(CoreEvent::Conflict(ConflictEvent::AutoResolved {
                owner_id: base.owner_id().0,
                resolved,
                remaining,
            }))
            .ok();
        info!(resolved, remaining, "Auto-resolution pass finished");
        Ok(())
    }

    async fn task_context(&self, task: &ConflictResolutionTask) -> Result<RunContext> {
        let owner_id = self.idle_task_owner(task).await?;
        let list = self.require_list(owner_id).await?;
        Ok(self.maintenance_context(list, task.session_id))
    }

    /// The list a task belongs to, refused while a run owns that list
    async fn idle_task_owner(&self, task: &ConflictResolutionTask) -> Result<TodoListId> {
        let session = self.get_session(&task.session_id).await?;
        if self.is_sync_active(session.owner_id) {
            return Err(SyncError::SyncInProgress {
                owner_id: session.owner_id.0,
            });
        }
        Ok(session.owner_id)
    }

    /// Context for work outside a run
    fn maintenance_context(&self, list: TodoList, session_id: SyncSessionId) -> RunContext {
        let now = self.clock.now();
        RunContext {
            session_id,
            list,
            sync_strategy: self.config.default_sync_strategy,
            conflict_strategy: self.config.default_conflict_strategy,
            since: now,
            started_at: now,
            remote_timeout: Duration::from_secs(self.config.remote_timeout_secs),
            cancel_token: CancellationToken::new(),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require_list(&self, owner_id: TodoListId) -> Result<TodoList> {
        self.lists
            .find_by_id(owner_id)
            .await?
            .ok_or(SyncError::OwnerNotFound {
                owner_id: owner_id.0,
            })
    }

    fn emit_session(&self, session: &SyncSession) {
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::SessionChanged {
                session_id: session.id.to_string(),
                owner_id: session.owner_id.0,
                status: session.status.to_string(),
                session: event_payload(session),
            }))
            .ok();
    }

    fn emit_task(&self, task: &ConflictResolutionTask) {
        self.event_bus
            .emit(CoreEvent::Conflict(ConflictEvent::TaskChanged {
                task_id: task.id.to_string(),
                session_id: task.session_id.to_string(),
                status: task.status.to_string(),
                task: event_payload(task),
            }))
            .ok();
    }
}

/// Serialized entity for an event, `Null` if it cannot be serialized
fn event_payload<T: Serialize>(entity: &T) -> serde_json::Value {
    serde_json::to_value(entity).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialize event payload");
        serde_json::Value::Null
    })
}

// ============================================================================
// Tests
// ============================================================================
