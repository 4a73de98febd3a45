//! # Conflict Resolution
//!
//! Settles every detected conflict with the strategy chosen for the run.
//!
//! ## Strategies
//!
//! Each [`ConflictStrategy`] maps to a [`ConflictHandler`] in a registry:
//! - **last_write_wins**: keep the change with the later timestamp, remote on ties
//! - **merge_changes**: field-level merge of both sides
//! - **external_priority** / **local_priority**: keep one side unconditionally
//! - **manual_resolution**: defer to a [`ConflictResolutionTask`]
//!
//! Every conflict yields exactly one [`Resolution`]. Deferred resolutions
//! carry the local change as a placeholder which is applied on neither side
//! until the task is settled.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::conflict_resolver::ConflictResolver;
//!
//! let resolver = ConflictResolver::new();
//! let resolutions = resolver.resolve_all(&conflicts, &ctx, clock.now())?;
//! ```

use crate::change::{Change, ChangeAction, ChangeOrigin};
use crate::conflict_detector::Conflict;
use crate::conflict_task::ConflictResolutionTask;
use crate::context::RunContext;
use crate::snapshot::RecordSnapshot;
use crate::strategy::ConflictStrategy;
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Outcome of settling one conflict
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The conflict was settled inline; `change` is applied on both sides
    Resolved {
        conflict: Conflict,
        change: Change,
        strategy: ConflictStrategy,
    },

    /// The conflict was handed to a task for later resolution
    Deferred {
        conflict: Conflict,
        task: ConflictResolutionTask,
        placeholder: Change,
    },
}

impl Resolution {
    pub fn conflict(&self) -> &Conflict {
        match self {
            Resolution::Resolved { conflict, .. } | Resolution::Deferred { conflict, .. } => {
                conflict
            }
        }
    }

    /// The change to apply now, `None` for deferred resolutions
    pub fn applicable_change(&self) -> Option<&Change> {
        match self {
            Resolution::Resolved { change, .. } => Some(change),
            Resolution::Deferred { .. } => None,
        }
    }

    pub fn task(&self) -> Option<&ConflictResolutionTask> {
        match self {
            Resolution::Deferred { task, .. } => Some(task),
            Resolution::Resolved { .. } => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolution::Deferred { .. })
    }
}

/// One conflict resolution strategy
pub trait ConflictHandler: Send + Sync {
    fn strategy(&self) -> ConflictStrategy;

    /// Settle a single conflict
    ///
    /// # Errors
    ///
    /// Returns an error if the resolved change cannot be built
    fn resolve(&self, conflict: &Conflict, ctx: &RunContext, now: DateTime<Utc>)
        -> Result<Resolution>;
}

/// Build the change that applies `data` to both sides of a conflict
///
/// The identity of the result combines both sides so the applier can find
/// the record locally and remotely.
fn resolved_change(
    conflict: &Conflict,
    data: &RecordSnapshot,
    action: ChangeAction,
    timestamp: DateTime<Utc>,
) -> Result<Change> {
    let local = &conflict.local_change;
    let remote = &conflict.remote_change;

    let mut data = data.clone();
    data.id = local.local_id.or(remote.local_id);
    data.external_id = remote
        .external_id
        .clone()
        .or_else(|| local.external_id.clone());

    Change::new(local.record_type, action, ChangeOrigin::Resolved, data, timestamp)
}

fn winner_action(winner: &Change) -> ChangeAction {
    match winner.action {
        ChangeAction::Delete => ChangeAction::Delete,
        ChangeAction::Create | ChangeAction::Update => ChangeAction::Update,
    }
}

fn keep(conflict: &Conflict, winner: &Change, strategy: ConflictStrategy) -> Result<Resolution> {
    let change = resolved_change(conflict, &winner.data, winner_action(winner), winner.timestamp)?;
    Ok(Resolution::Resolved {
        conflict: conflict.clone(),
        change,
        strategy,
    })
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictHandler for LastWriteWins {
    fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::LastWriteWins
    }

    fn resolve(&self, conflict: &Conflict, _ctx: &RunContext, _now: DateTime<Utc>) -> Result<Resolution> {
        let local = &conflict.local_change;
        let remote = &conflict.remote_change;

        let winner = if local.timestamp > remote.timestamp {
            local
        } else {
            remote
        };

        keep(conflict, winner, self.strategy())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeChanges;

impl ConflictHandler for MergeChanges {
    fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::MergeChanges
    }

    fn resolve(&self, conflict: &Conflict, _ctx: &RunContext, _now: DateTime<Utc>) -> Result<Resolution> {
        let local = &conflict.local_change;
        let remote = &conflict.remote_change;

        let merged = RecordSnapshot::merge(&local.data, &remote.data);
        let timestamp = local.timestamp.max(remote.timestamp);
        let change = resolved_change(conflict, &merged, ChangeAction::Update, timestamp)?;

        Ok(Resolution::Resolved {
            conflict: conflict.clone(),
            change,
            strategy: self.strategy(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalPriority;

impl ConflictHandler for ExternalPriority {
    fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::ExternalPriority
    }

    fn resolve(&self, conflict: &Conflict, _ctx: &RunContext, _now: DateTime<Utc>) -> Result<Resolution> {
        keep(conflict, &conflict.remote_change, self.strategy())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPriority;

impl ConflictHandler for LocalPriority {
    fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::LocalPriority
    }

    fn resolve(&self, conflict: &Conflict, _ctx: &RunContext, _now: DateTime<Utc>) -> Result<Resolution> {
        keep(conflict, &conflict.local_change, self.strategy())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManualResolution;

impl ConflictHandler for ManualResolution {
    fn strategy(&self) -> ConflictStrategy {
        ConflictStrategy::ManualResolution
    }

    fn resolve(&self, conflict: &Conflict, ctx: &RunContext, now: DateTime<Utc>) -> Result<Resolution> {
        let task = ConflictResolutionTask::from_conflict(ctx.session_id, conflict, now);

        debug!(
            task_id = %task.id,
            severity = ?task.conflict_analysis.severity,
            "Deferred conflict to resolution task"
        );

        Ok(Resolution::Deferred {
            conflict: conflict.clone(),
            task,
            placeholder: conflict.local_change.clone(),
        })
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Strategy registry dispatching conflicts to their handlers
pub struct ConflictResolver {
    handlers: HashMap<ConflictStrategy, Arc<dyn ConflictHandler>>,
}

impl ConflictResolver {
    /// Create a resolver with a handler for every built-in strategy
    pub fn new() -> Self {
        let mut resolver = Self::empty();
        resolver.register(Arc::new(LastWriteWins));
        resolver.register(Arc::new(MergeChanges));
        resolver.register(Arc::new(ExternalPriority));
        resolver.register(Arc::new(LocalPriority));
        resolver.register(Arc::new(ManualResolution));
        resolver
    }

    /// Create a resolver without handlers
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any handler for the same strategy
    pub fn register(&mut self, handler: Arc<dyn ConflictHandler>) {
        self.handlers.insert(handler.strategy(), handler);
    }

    pub fn supports(&self, strategy: ConflictStrategy) -> bool {
        self.handlers.contains_key(&strategy)
    }

    /// Settle one conflict with the given strategy
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidStrategy` if no handler is registered
    pub fn resolve(
        &self,
        conflict: &Conflict,
        strategy: ConflictStrategy,
        ctx: &RunContext,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let handler = self
            .handlers
            .get(&strategy)
            .ok_or_else(|| SyncError::InvalidStrategy(strategy.as_str().to_string()))?;

        handler.resolve(conflict, ctx, now)
    }

    /// Settle every conflict with the run's conflict strategy
    ///
    /// # Errors
    ///
    /// Returns the first handler error
    #[instrument(skip(self, conflicts, ctx), fields(strategy = %ctx.conflict_strategy, count = conflicts.len()))]
    pub fn resolve_all(
        &self,
        conflicts: &[Conflict],
        ctx: &RunContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<Resolution>> {
        conflicts
            .iter()
            .map(|conflict| self.resolve(conflict, ctx.conflict_strategy, ctx, now))
            .collect()
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict_detector::ConflictDetector;
    use crate::conflict_task::TaskStatus;
    use crate::session::SyncSessionId;
    use crate::strategy::SyncStrategy;
    use bridge_traits::ResourceKind;
    use chrono::{Duration, TimeZone};
    use core_library::{TodoList, TodoListId};
    use tokio_util::sync::CancellationToken;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 2, 12, 0, 0).unwrap()
    }

    fn ctx(strategy: ConflictStrategy) -> RunContext {
        RunContext {
            session_id: SyncSessionId::new(),
            list: TodoList {
                id: TodoListId(1),
                name: "Home".to_string(),
                external_id: Some("remote-list".to_string()),
                sync_enabled: true,
                synced_at: None,
                created_at: t0(),
                updated_at: t0(),
            },
            sync_strategy: SyncStrategy::IncrementalSync,
            conflict_strategy: strategy,
            since: t0() - Duration::hours(24),
            started_at: t0(),
            remote_timeout: std::time::Duration::from_secs(5),
            cancel_token: CancellationToken::new(),
        }
    }

    fn change(
        origin: ChangeOrigin,
        local_id: Option<i64>,
        description: &str,
        completed: bool,
        at: DateTime<Utc>,
    ) -> Change {
        Change::new(
            ResourceKind::TodoItem,
            ChangeAction::Update,
            origin,
            RecordSnapshot {
                id: local_id,
                external_id: Some("ext-1".to_string()),
                description: Some(description.to_string()),
                completed: Some(completed),
                updated_at: Some(at),
                ..Default::default()
            },
            at,
        )
        .unwrap()
    }

    fn conflict(local: Change, remote: Change) -> Conflict {
        ConflictDetector::new()
            .detect_conflicts(&[local], &[remote])
            .pop()
            .unwrap()
    }

    fn resolve(strategy: ConflictStrategy, conflict: &Conflict) -> Resolution {
        ConflictResolver::new()
            .resolve(conflict, strategy, &ctx(strategy), t0())
            .unwrap()
    }

    #[test]
    fn test_last_write_wins_keeps_later_side() {
        let local = change(ChangeOrigin::Local, Some(1), "local", false, t0() + Duration::minutes(2));
        let remote = change(ChangeOrigin::Remote, Some(1), "remote", true, t0());

        let resolution = resolve(ConflictStrategy::LastWriteWins, &conflict(local, remote));
        let change = resolution.applicable_change().unwrap();
        assert_eq!(change.data.description.as_deref(), Some("local"));
        assert_eq!(change.origin, ChangeOrigin::Resolved);
    }

    #[test]
    fn test_last_write_wins_tie_goes_to_remote() {
        let local = change(ChangeOrigin::Local, Some(1), "local", false, t0());
        let remote = change(ChangeOrigin::Remote, Some(1), "remote", true, t0());

        let resolution = resolve(ConflictStrategy::LastWriteWins, &conflict(local, remote));
        assert_eq!(
            resolution.applicable_change().unwrap().data.description.as_deref(),
            Some("remote")
        );
    }

    #[test]
    fn test_merge_changes_completed_true_wins_and_identity_merged() {
        let local = change(ChangeOrigin::Local, Some(1), "local", true, t0() + Duration::minutes(1));
        let remote = change(ChangeOrigin::Remote, None, "remote", false, t0());

        let resolution = resolve(ConflictStrategy::MergeChanges, &conflict(local, remote));
        let change = resolution.applicable_change().unwrap();
        assert_eq!(change.data.completed, Some(true));
        assert_eq!(change.data.description.as_deref(), Some("remote"));
        assert_eq!(change.data.updated_at, Some(t0() + Duration::minutes(1)));
        assert_eq!(change.local_id, Some(1));
        assert_eq!(change.external_id.as_deref(), Some("ext-1"));
    }

    #[test]
    fn test_priority_strategies() {
        let local = change(ChangeOrigin::Local, Some(1), "local", false, t0() + Duration::hours(1));
        let remote = change(ChangeOrigin::Remote, Some(1), "remote", true, t0());
        let conflict = conflict(local, remote);

        let external = resolve(ConflictStrategy::ExternalPriority, &conflict);
        assert_eq!(
            external.applicable_change().unwrap().data.description.as_deref(),
            Some("remote")
        );

        let local = resolve(ConflictStrategy::LocalPriority, &conflict);
        assert_eq!(
            local.applicable_change().unwrap().data.description.as_deref(),
            Some("local")
        );
    }

    #[test]
    fn test_manual_resolution_defers_with_placeholder() {
        let local = change(ChangeOrigin::Local, Some(1), "local", false, t0());
        let remote = change(ChangeOrigin::Remote, Some(1), "remote", true, t0());
        let conflict = conflict(local.clone(), remote);

        let resolution = resolve(ConflictStrategy::ManualResolution, &conflict);
        assert!(resolution.is_deferred());
        assert!(resolution.applicable_change().is_none());

        match resolution {
            Resolution::Deferred {
                task, placeholder, ..
            } => {
                assert_eq!(placeholder, local);
                assert_eq!(task.status, TaskStatus::Pending);
                assert_eq!(task.local_id, Some(1));
                assert_eq!(task.external_id.as_deref(), Some("ext-1"));
            }
            Resolution::Resolved { .. } => panic!("expected deferred resolution"),
        }
    }

    #[test]
    fn test_one_resolution_per_conflict() {
        let conflicts = vec![
            conflict(
                change(ChangeOrigin::Local, Some(1), "a", false, t0()),
                change(ChangeOrigin::Remote, Some(1), "b", false, t0()),
            ),
            conflict(
                change(ChangeOrigin::Local, Some(1), "c", true, t0()),
                change(ChangeOrigin::Remote, Some(1), "d", false, t0()),
            ),
        ];

        let ctx = ctx(ConflictStrategy::MergeChanges);
        let resolutions = ConflictResolver::new()
            .resolve_all(&conflicts, &ctx, t0())
            .unwrap();
        assert_eq!(resolutions.len(), 2);
        assert_eq!(resolutions[1].conflict(), &conflicts[1]);
    }

    #[test]
    fn test_missing_handler_is_error() {
        let local = change(ChangeOrigin::Local, Some(1), "a", false, t0());
        let remote = change(ChangeOrigin::Remote, Some(1), "b", false, t0());
        let conflict = conflict(local, remote);

        let resolver = ConflictResolver::empty();
        assert!(!resolver.supports(ConflictStrategy::LastWriteWins));
        assert!(matches!(
            resolver.resolve(
                &conflict,
                ConflictStrategy::LastWriteWins,
                &ctx(ConflictStrategy::LastWriteWins),
                t0()
            ),
            Err(SyncError::InvalidStrategy(_))
        ));
    }
}
