//! # Conflict Resolution Tasks
//!
//! A persisted, independently resolvable record of one conflict the engine
//! did not settle inline.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending → Reviewing → Resolved
//!    │          │
//!    │          └─────→ Rejected
//!    ├────────────────→ Resolved / Rejected
//!    └────────────────→ AutoResolved
//! ```
//!
//! `Resolved`, `Rejected` and `AutoResolved` are terminal. The analysis is
//! computed once when the task is created and never recomputed.

use crate::change::{Change, ChangeAction, ChangeOrigin};
use crate::conflict_detector::{Conflict, ConflictType};
use crate::session::{round2, SyncSessionId};
use crate::snapshot::{RecordSnapshot, SnapshotField};
use crate::{Result, SyncError};
use bridge_traits::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Priority discount for tasks a rule can settle without a person
const AUTO_RESOLVABLE_DISCOUNT: f64 = 5.0;

/// Priority gained per hour a task waits
const AGE_WEIGHT_PER_HOUR: f64 = 0.5;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a conflict resolution task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictTaskId(Uuid);

impl ConflictTaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidTaskId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConflictTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    /// Picked up by a person
    Reviewing,
    Resolved,
    Rejected,
    AutoResolved,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Resolved | TaskStatus::Rejected | TaskStatus::AutoResolved
        )
    }

    pub fn requires_attention(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Reviewing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Reviewing => "reviewing",
            TaskStatus::Resolved => "resolved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::AutoResolved => "auto_resolved",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "reviewing" => Ok(TaskStatus::Reviewing),
            "resolved" => Ok(TaskStatus::Resolved),
            "rejected" => Ok(TaskStatus::Rejected),
            "auto_resolved" => Ok(TaskStatus::AutoResolved),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a task reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Automatic,
    Manual,
    Rejected,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Automatic => "automatic",
            ResolutionStrategy::Manual => "manual",
            ResolutionStrategy::Rejected => "rejected",
        }
    }
}

impl FromStr for ResolutionStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "automatic" => Ok(ResolutionStrategy::Automatic),
            "manual" => Ok(ResolutionStrategy::Manual),
            "rejected" => Ok(ResolutionStrategy::Rejected),
            _ => Err(SyncError::InvalidStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

// ============================================================================
// Analysis
// ============================================================================

/// Classification of a single differing field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChangeKind {
    /// Only the remote side has a value
    Creation,
    /// Only the local side has a value
    Deletion,
    TextModification,
    BooleanConflict,
    ValueConflict,
}

impl FieldChangeKind {
    fn classify(local: &Value, remote: &Value) -> Self {
        match (local, remote) {
            (Value::Null, r) if !r.is_null() => FieldChangeKind::Creation,
            (l, Value::Null) if !l.is_null() => FieldChangeKind::Deletion,
            (Value::String(_), Value::String(_)) => FieldChangeKind::TextModification,
            (Value::Bool(_), Value::Bool(_)) => FieldChangeKind::BooleanConflict,
            _ => FieldChangeKind::ValueConflict,
        }
    }
}

/// One row of [`ConflictResolutionTask::conflict_summary`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub field: SnapshotField,
    pub local: Value,
    pub remote: Value,
    pub kind: FieldChangeKind,
}

/// Analysis computed once when a task is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    pub fields_in_conflict: Vec<SnapshotField>,
    pub severity: Severity,
    pub auto_resolvable: bool,
    pub priority_score: f64,
    pub analyzed_at: DateTime<Utc>,
}

// ============================================================================
// Task Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolutionTask {
    pub id: ConflictTaskId,
    pub session_id: SyncSessionId,
    pub record_type: ResourceKind,
    /// Identity of the conflicting record, used to apply the resolution
    pub local_id: Option<i64>,
    pub external_id: Option<String>,
    pub conflict_type: ConflictType,
    pub status: TaskStatus,
    pub local_data: RecordSnapshot,
    pub remote_data: RecordSnapshot,
    pub resolution_data: Option<RecordSnapshot>,
    pub conflict_analysis: ConflictAnalysis,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConflictResolutionTask {
    /// Create a pending task and compute its analysis
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SyncSessionId,
        record_type: ResourceKind,
        local_id: Option<i64>,
        external_id: Option<String>,
        conflict_type: ConflictType,
        local_data: RecordSnapshot,
        remote_data: RecordSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let mut task = Self {
            id: ConflictTaskId::new(),
            session_id,
            record_type,
            local_id,
            external_id,
            conflict_type,
            status: TaskStatus::Pending,
            local_data,
            remote_data,
            resolution_data: None,
            conflict_analysis: ConflictAnalysis {
                fields_in_conflict: Vec::new(),
                severity: Severity::Low,
                auto_resolvable: false,
                priority_score: 0.0,
                analyzed_at: now,
            },
            resolved_at: None,
            resolved_by: None,
            resolution_strategy: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        task.conflict_analysis = task.analyze(now);
        task
    }

    /// Create a pending task for a detected conflict
    pub fn from_conflict(
        session_id: SyncSessionId,
        conflict: &Conflict,
        now: DateTime<Utc>,
    ) -> Self {
        let local = &conflict.local_change;
        let remote = &conflict.remote_change;

        Self::new(
            session_id,
            local.record_type,
            local.local_id.or(remote.local_id),
            remote.external_id.clone().or_else(|| local.external_id.clone()),
            conflict.conflict_type,
            local.data.clone(),
            remote.data.clone(),
            now,
        )
    }

    fn analyze(&self, now: DateTime<Utc>) -> ConflictAnalysis {
        ConflictAnalysis {
            fields_in_conflict: self.local_data.differing_fields(&self.remote_data),
            severity: self.severity(),
            auto_resolvable: self.auto_resolvable(),
            priority_score: self.priority_score(now),
            analyzed_at: now,
        }
    }

    /// Per-field differences between the two sides
    pub fn conflict_summary(&self) -> Vec<FieldSummary> {
        self.local_data
            .diff(&self.remote_data)
            .into_iter()
            .map(|diff| FieldSummary {
                kind: FieldChangeKind::classify(&diff.local_value, &diff.remote_value),
                field: diff.field,
                local: diff.local_value,
                remote: diff.remote_value,
            })
            .collect()
    }

    /// Whether every differing field has a deterministic rule
    ///
    /// A task with no differing fields is not auto-resolvable.
    pub fn auto_resolvable(&self) -> bool {
        let fields = self.local_data.differing_fields(&self.remote_data);
        !fields.is_empty() && fields.iter().all(SnapshotField::is_auto_resolvable)
    }

    pub fn severity(&self) -> Severity {
        let fields = self.local_data.differing_fields(&self.remote_data);

        if fields
            .iter()
            .any(|f| matches!(f, SnapshotField::Id | SnapshotField::ExternalId))
        {
            Severity::Critical
        } else if fields.iter().any(|f| {
            matches!(
                f,
                SnapshotField::Description | SnapshotField::Name | SnapshotField::Completed
            )
        }) {
            Severity::High
        } else if fields.len() > 3 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Triage priority; older and more destructive conflicts score higher
    pub fn priority_score(&self, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - self.created_at).num_milliseconds().max(0) as f64 / 3_600_000.0;

        let mut score = age_hours * AGE_WEIGHT_PER_HOUR + self.conflict_type.weight();
        if self.auto_resolvable() {
            score -= AUTO_RESOLVABLE_DISCOUNT;
        }

        round2(score.max(0.0))
    }

    pub fn requires_attention(&self) -> bool {
        self.status.requires_attention()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Age of the task such as `42s ago` or `3h ago`
    pub fn time_since_created(&self, now: DateTime<Utc>) -> String {
        let secs = (now - self.created_at).num_seconds().max(0);

        if secs < 60 {
            format!("{}s ago", secs)
        } else if secs < 3600 {
            format!("{}m ago", secs / 60)
        } else if secs < 86_400 {
            format!("{}h ago", secs / 3600)
        } else {
            format!("{}d ago", secs / 86_400)
        }
    }

    /// Move a pending task into review
    ///
    /// # Errors
    ///
    /// Returns an error unless the task is pending
    pub fn start_review(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.transition_error(TaskStatus::Reviewing));
        }

        self.status = TaskStatus::Reviewing;
        self.updated_at = now;
        Ok(())
    }

    /// Settle the task with the field rules if it is safe to do so
    ///
    /// Returns false without changing anything when the task is terminal or
    /// not auto-resolvable.
    pub fn attempt_auto_resolution(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() || !self.auto_resolvable() {
            debug!(task_id = %self.id, "Task is not auto-resolvable");
            return false;
        }

        self.resolution_data = Some(RecordSnapshot::merge(&self.local_data, &self.remote_data));
        self.status = TaskStatus::AutoResolved;
        self.resolution_strategy = Some(ResolutionStrategy::Automatic);
        self.resolved_at = Some(now);
        self.updated_at = now;

        info!(task_id = %self.id, "Auto-resolved conflict");
        true
    }

    /// Store a resolution supplied by a person
    ///
    /// The data is stored verbatim; field-level correctness is the caller's
    /// responsibility.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is already terminal
    pub fn manual_resolve(
        &mut self,
        resolution_data: RecordSnapshot,
        resolved_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_terminal() {
            return Err(self.transition_error(TaskStatus::Resolved));
        }

        info!(
            task_id = %self.id,
            resolved_by = resolved_by.as_deref().unwrap_or("system"),
            "Manual resolution"
        );

        self.resolution_data = Some(resolution_data);
        self.status = TaskStatus::Resolved;
        self.resolution_strategy = Some(ResolutionStrategy::Manual);
        self.resolved_by = resolved_by;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Dismiss the conflict without applying anything
    ///
    /// # Errors
    ///
    /// Returns an error if the task is already terminal
    pub fn reject(
        &mut self,
        reason: Option<String>,
        rejected_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_terminal() {
            return Err(self.transition_error(TaskStatus::Rejected));
        }

        info!(task_id = %self.id, reason = reason.as_deref().unwrap_or(""), "Rejecting conflict");

        self.status = TaskStatus::Rejected;
        self.rejection_reason = reason;
        self.resolved_by = rejected_by;
        self.resolution_strategy = Some(ResolutionStrategy::Rejected);
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// The change that applies this task's resolution on both sides
    ///
    /// `None` unless the task was resolved or auto-resolved. Identity missing
    /// from the resolution data is filled in from the task.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if the checksum cannot be computed
    pub fn resolution_change(&self, now: DateTime<Utc>) -> Result<Option<Change>> {
        if !matches!(self.status, TaskStatus::Resolved | TaskStatus::AutoResolved) {
            return Ok(None);
        }

        let Some(data) = &self.resolution_data else {
            return Ok(None);
        };

        let mut data = data.clone();
        data.id = data.id.or(self.local_id);
        data.external_id = data.external_id.or_else(|| self.external_id.clone());

        Change::new(
            self.record_type,
            ChangeAction::Update,
            ChangeOrigin::Resolved,
            data,
            now,
        )
        .map(Some)
    }

    fn transition_error(&self, to: TaskStatus) -> SyncError {
        SyncError::InvalidStateTransition {
            from: self.status.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                to.as_str()
            ),
        }
    }
}

// ============================================================================
// Collections
// ============================================================================

/// Aggregate counts over a set of tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: u64,
    pub pending: u64,
    pub resolved: u64,
    pub auto_resolved: u64,
    pub requiring_attention: u64,
    /// Share of settled tasks that settled automatically, as a percentage
    pub auto_resolution_rate: f64,
}

impl TaskStats {
    pub fn from_tasks(tasks: &[ConflictResolutionTask]) -> Self {
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count() as u64;

        let resolved = count(TaskStatus::Resolved);
        let auto_resolved = count(TaskStatus::AutoResolved);
        let settled = resolved + auto_resolved;

        Self {
            total: tasks.len() as u64,
            pending: count(TaskStatus::Pending),
            resolved,
            auto_resolved,
            requiring_attention: tasks.iter().filter(|t| t.requires_attention()).count() as u64,
            auto_resolution_rate: if settled == 0 {
                0.0
            } else {
                round2(auto_resolved as f64 / settled as f64 * 100.0)
            },
        }
    }
}

/// Tasks requiring attention ordered by descending priority score
pub fn priority_queue(
    tasks: Vec<ConflictResolutionTask>,
    now: DateTime<Utc>,
) -> Vec<ConflictResolutionTask> {
    let mut queue: Vec<(f64, ConflictResolutionTask)> = tasks
        .into_iter()
        .filter(ConflictResolutionTask::requires_attention)
        .map(|task| (task.priority_score(now), task))
        .collect();

    queue.sort_by(|a, b| b.0.total_cmp(&a.0));
    queue.into_iter().map(|(_, task)| task).collect()
}

// ============================================================================
// Tests
// ============================================================================
