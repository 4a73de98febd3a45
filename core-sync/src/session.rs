//! # Sync Session State Machine
//!
//! Tracks one synchronization run of a list with validated state transitions.
//!
//! ## State Machine
//!
//! ```text
//! Initiated → Running → Completed
//!     │         │  ↑
//!     │         ↓  │
//!     │       Paused
//!     │         │
//!     └────→ Failed / Cancelled
//! ```
//!
//! `Completed`, `Failed` and `Cancelled` are terminal. Sessions are persisted
//! so a run's outcome, counters and errors remain queryable afterwards.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncSession, SyncStrategy};
//!
//! let session = SyncSession::new(list.id, SyncStrategy::IncrementalSync, clock.now());
//! let mut session = session.start(clock.now())?;
//! session.record_counts(3, 2, 1)?;
//! let session = session.complete(result, clock.now())?;
//! ```

use crate::change_applier::SyncResult;
use crate::strategy::SyncStrategy;
use crate::{Result, SyncError};
use chrono::{DateTime, Duration, Utc};
use core_library::TodoListId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncSessionId(Uuid);

impl SyncSessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a session ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidSessionId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncSessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The current status of a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session has been created but detection has not begun
    Initiated,
    Running,
    Completed,
    Failed,
    /// Suspended by an external control signal
    Paused,
    Cancelled,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Initiated,
        SessionStatus::Running,
        SessionStatus::Completed,
        SessionStatus::Failed,
        SessionStatus::Paused,
        SessionStatus::Cancelled,
    ];

    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Check if this status represents an active state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Initiated | SessionStatus::Running | SessionStatus::Paused
        )
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Paused => "paused",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "initiated" => Ok(SessionStatus::Initiated),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "paused" => Ok(SessionStatus::Paused),
            "cancelled" => Ok(SessionStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Sync Session Entity
// ============================================================================

/// One synchronization run of a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: SyncSessionId,
    /// The list being synchronized
    pub owner_id: TodoListId,
    pub status: SessionStatus,
    pub strategy: SyncStrategy,
    pub started_at: DateTime<Utc>,
    /// Set on entry to a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    pub local_changes_count: u64,
    pub remote_changes_count: u64,
    pub conflicts_count: u64,
    pub sync_results: SyncResult,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncSession {
    /// Create a new session in initiated state
    pub fn new(owner_id: TodoListId, strategy: SyncStrategy, now: DateTime<Utc>) -> Self {
        Self {
            id: SyncSessionId::new(),
            owner_id,
            status: SessionStatus::Initiated,
            strategy,
            started_at: now,
            completed_at: None,
            local_changes_count: 0,
            remote_changes_count: 0,
            conflicts_count: 0,
            sync_results: SyncResult::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Begin detection
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in `Initiated` state
    pub fn start(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(SessionStatus::Running)?;
        self.status = SessionStatus::Running;
        self.local_changes_count = 0;
        self.remote_changes_count = 0;
        self.conflicts_count = 0;
        self.updated_at = now;
        Ok(self)
    }

    /// Record the sizes of the detected change-sets
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in `Running` state
    pub fn record_counts(&mut self, local: u64, remote: u64, conflicts: u64) -> Result<()> {
        if self.status != SessionStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "record_counts".to_string(),
                reason: "Session must be running to record change counts".to_string(),
            });
        }

        self.local_changes_count = local;
        self.remote_changes_count = remote;
        self.conflicts_count = conflicts;
        Ok(())
    }

    /// Mark the session as completed with the run's result
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in `Running` state
    pub fn complete(mut self, result: SyncResult, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(SessionStatus::Completed)?;
        self.status = SessionStatus::Completed;
        self.sync_results = result;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(self)
    }

    /// Mark the session as failed
    ///
    /// # Errors
    ///
    /// Returns an error if the session is already terminal
    pub fn fail(mut self, error_message: String, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(SessionStatus::Failed)?;
        self.status = SessionStatus::Failed;
        self.error_message = Some(error_message);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(self)
    }

    /// Suspend a running session
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in `Running` state
    pub fn pause(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(SessionStatus::Paused)?;
        self.status = SessionStatus::Paused;
        self.updated_at = now;
        Ok(self)
    }

    /// Resume a paused session
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not in `Paused` state
    pub fn resume(mut self, now: DateTime<Utc>) -> Result<Self> {
        if self.status != SessionStatus::Paused {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: SessionStatus::Running.as_str().to_string(),
                reason: "Only paused sessions can be resumed".to_string(),
            });
        }
        self.status = SessionStatus::Running;
        self.updated_at = now;
        Ok(self)
    }

    /// Cancel the session
    ///
    /// # Errors
    ///
    /// Returns an error if the session is already terminal
    pub fn cancel(mut self, now: DateTime<Utc>) -> Result<Self> {
        self.validate_transition(SessionStatus::Cancelled)?;
        self.status = SessionStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(self)
    }

    /// Time from start to completion, or to `now` while still active
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.completed_at.unwrap_or(now) - self.started_at
    }

    /// Human-readable duration such as `42s`, `3m 5s` or `2h 10m`
    pub fn duration_in_words(&self, now: DateTime<Utc>) -> String {
        let secs = self.duration(now).num_seconds();
        if secs < 0 {
            return "N/A".to_string();
        }

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        }
    }

    /// Percentage of detected changes that applied without error
    pub fn success_rate(&self) -> f64 {
        let total = self.local_changes_count + self.remote_changes_count;
        if total == 0 {
            return 0.0;
        }

        let errors = self.sync_results.errors.len() as f64;
        let total = total as f64;
        round2((total - errors).max(0.0) / total * 100.0)
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflicts_count > 0
    }

    pub fn has_errors(&self) -> bool {
        !self.sync_results.errors.is_empty()
    }

    /// Completed with no per-change errors
    pub fn completed_successfully(&self) -> bool {
        self.status == SessionStatus::Completed && !self.has_errors()
    }

    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            id: self.id,
            status: self.status,
            strategy: self.strategy,
            duration: self.duration_in_words(now),
            success_rate: self.success_rate(),
            changes: ChangeCounts {
                local: self.local_changes_count,
                remote: self.remote_changes_count,
                conflicts: self.conflicts_count,
            },
            errors: self.sync_results.errors.len(),
            started_at: self.started_at.format(TIMESTAMP_FORMAT).to_string(),
            completed_at: self
                .completed_at
                .map(|at| at.format(TIMESTAMP_FORMAT).to_string()),
        }
    }

    /// Validate a state transition
    fn validate_transition(&self, to: SessionStatus) -> Result<()> {
        let valid = match (self.status, to) {
            // From Initiated
            (SessionStatus::Initiated, SessionStatus::Running) => true,
            (SessionStatus::Initiated, SessionStatus::Failed) => true,
            (SessionStatus::Initiated, SessionStatus::Cancelled) => true,

            // From Running
            (SessionStatus::Running, SessionStatus::Completed) => true,
            (SessionStatus::Running, SessionStatus::Failed) => true,
            (SessionStatus::Running, SessionStatus::Paused) => true,
            (SessionStatus::Running, SessionStatus::Cancelled) => true,

            // From Paused
            (SessionStatus::Paused, SessionStatus::Failed) => true,
            (SessionStatus::Paused, SessionStatus::Cancelled) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

/// Change counters of a session summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub local: u64,
    pub remote: u64,
    pub conflicts: u64,
}

/// Display-oriented rollup of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SyncSessionId,
    pub status: SessionStatus,
    pub strategy: SyncStrategy,
    pub duration: String,
    pub success_rate: f64,
    pub changes: ChangeCounts,
    pub errors: usize,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Statistics across the sessions of a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub completed: u64,
    pub failed: u64,
    pub running: u64,
    /// Mean duration of completed sessions in seconds
    pub average_duration_secs: f64,
    /// Share of completed sessions that had no errors, as a percentage
    pub overall_success_rate: f64,
    /// Start of the most recent session
    pub last_sync: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub fn from_sessions(sessions: &[SyncSession]) -> Self {
        let count = |status: SessionStatus| {
            sessions.iter().filter(|s| s.status == status).count() as u64
        };

        let completed: Vec<&SyncSession> = sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .collect();

        let durations: Vec<f64> = completed
            .iter()
            .filter_map(|s| s.completed_at.map(|end| end - s.started_at))
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .collect();

        let average_duration_secs = if durations.is_empty() {
            0.0
        } else {
            round2(durations.iter().sum::<f64>() / durations.len() as f64)
        };

        let overall_success_rate = if completed.is_empty() {
            0.0
        } else {
            let successful = completed
                .iter()
                .filter(|s| s.completed_successfully())
                .count();
            round2(successful as f64 / completed.len() as f64 * 100.0)
        };

        Self {
            total_sessions: sessions.len() as u64,
            completed: completed.len() as u64,
            failed: count(SessionStatus::Failed),
            running: count(SessionStatus::Running),
            average_duration_secs,
            overall_success_rate,
            last_sync: sessions.iter().map(|s| s.started_at).max(),
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Tests
// ============================================================================
