//! # Sync Session and Conflict Task Repositories
//!
//! Provides database persistence for sync sessions and conflict resolution
//! tasks.
//!
//! ## Overview
//!
//! - Sessions are written when created and on every status transition
//! - Tasks are written before any change of a run is applied, so unresolved
//!   conflicts stay queryable even if the run fails afterwards
//! - Deleting a session removes its tasks (`ON DELETE CASCADE`)

use crate::change_applier::SyncResult;
use crate::conflict_task::{ConflictAnalysis, ConflictResolutionTask, ConflictTaskId};
use crate::session::{SyncSession, SyncSessionId};
use crate::snapshot::RecordSnapshot;
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::ResourceKind;
use core_library::models::{from_millis, to_millis};
use core_library::TodoListId;
use sqlx::{FromRow, SqlitePool};
use tracing::warn;

fn db_error(e: sqlx::Error) -> SyncError {
    SyncError::Database(e.to_string())
}

// ============================================================================
// Session Repository
// ============================================================================

/// Repository trait for sync session persistence
#[async_trait]
pub trait SyncSessionRepository: Send + Sync {
    /// Insert a new session
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, session: &SyncSession) -> Result<()>;

    /// Persist the current state of a session
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session doesn't exist
    async fn update(&self, session: &SyncSession) -> Result<()>;

    /// Find a session by ID
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_id(&self, id: &SyncSessionId) -> Result<Option<SyncSession>>;

    /// Session history of a list (most recent first)
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn get_history(&self, owner_id: TodoListId, limit: u32) -> Result<Vec<SyncSession>>;

    /// The most recently started session of a list
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_latest(&self, owner_id: TodoListId) -> Result<Option<SyncSession>>;

    /// The most recent session that completed without errors
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_last_successful(&self, owner_id: TodoListId) -> Result<Option<SyncSession>>;

    /// Sessions of a list that are initiated, running or paused
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_active(&self, owner_id: TodoListId) -> Result<Vec<SyncSession>>;

    /// Delete a session together with its tasks
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn delete(&self, id: &SyncSessionId) -> Result<bool>;
}

/// SQLite implementation of SyncSessionRepository
pub struct SqliteSyncSessionRepository {
    pool: SqlitePool,
}

impl SqliteSyncSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = r#"
    id, list_id, status, strategy, started_at, completed_at,
    local_changes_count, remote_changes_count, conflicts_count,
    sync_results, error_message, created_at, updated_at
"#;

#[derive(Debug, FromRow)]
struct SyncSessionRow {
    id: String,
    list_id: i64,
    status: String,
    strategy: String,
    started_at: i64,
    completed_at: Option<i64>,
    local_changes_count: i64,
    remote_changes_count: i64,
    conflicts_count: i64,
    sync_results: String,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SyncSessionRow> for SyncSession {
    type Error = SyncError;

    fn try_from(row: SyncSessionRow) -> Result<Self> {
        let sync_results: SyncResult = if row.sync_results.trim() == "{}" {
            SyncResult::default()
        } else {
            serde_json::from_str(&row.sync_results)?
        };

        Ok(SyncSession {
            id: SyncSessionId::from_string(&row.id)?,
            owner_id: TodoListId(row.list_id),
            status: row.status.parse()?,
            strategy: row.strategy.parse()?,
            started_at: from_millis(row.started_at),
            completed_at: row.completed_at.map(from_millis),
            local_changes_count: row.local_changes_count.max(0) as u64,
            remote_changes_count: row.remote_changes_count.max(0) as u64,
            conflicts_count: row.conflicts_count.max(0) as u64,
            sync_results,
            error_message: row.error_message,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

impl SqliteSyncSessionRepository {
    async fn fetch_many(&self, sql: &str, owner_id: TodoListId) -> Result<Vec<SyncSession>> {
        let rows = sqlx::query_as::<_, SyncSessionRow>(sql)
            .bind(owner_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter()
            .map(SyncSession::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

#[async_trait]
impl SyncSessionRepository for SqliteSyncSessionRepository {
    async fn insert(&self, session: &SyncSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_sessions (
                id, list_id, status, strategy, started_at, completed_at,
                local_changes_count, remote_changes_count, conflicts_count,
                sync_results, error_message, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.as_str())
        .bind(session.owner_id.0)
        .bind(session.status.as_str())
        .bind(session.strategy.as_str())
        .bind(to_millis(session.started_at))
        .bind(session.completed_at.map(to_millis))
        .bind(session.local_changes_count as i64)
        .bind(session.remote_changes_count as i64)
        .bind(session.conflicts_count as i64)
        .bind(serde_json::to_string(&session.sync_results)?)
        .bind(&session.error_message)
        .bind(to_millis(session.created_at))
        .bind(to_millis(session.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update(&self, session: &SyncSession) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_sessions SET
                status = ?,
                completed_at = ?,
                local_changes_count = ?,
                remote_changes_count = ?,
                conflicts_count = ?,
                sync_results = ?,
                error_message = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(session.status.as_str())
        .bind(session.completed_at.map(to_millis))
        .bind(session.local_changes_count as i64)
        .bind(session.remote_changes_count as i64)
        .bind(session.conflicts_count as i64)
        .bind(serde_json::to_string(&session.sync_results)?)
        .bind(&session.error_message)
        .bind(to_millis(session.updated_at))
        .bind(session.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(SyncError::SessionNotFound {
                session_id: session.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncSessionId) -> Result<Option<SyncSession>> {
        let sql = format!("SELECT {} FROM sync_sessions WHERE id = ?", SESSION_COLUMNS);
        let row = sqlx::query_as::<_, SyncSessionRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(SyncSession::try_from).transpose()
    }

    async fn get_history(&self, owner_id: TodoListId, limit: u32) -> Result<Vec<SyncSession>> {
        let sql = format!(
            r#"
            SELECT {} FROM sync_sessions
            WHERE list_id = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT {}
            "#,
            SESSION_COLUMNS, limit
        );
        self.fetch_many(&sql, owner_id).await
    }

    async fn find_latest(&self, owner_id: TodoListId) -> Result<Option<SyncSession>> {
        Ok(self.get_history(owner_id, 1).await?.into_iter().next())
    }

    async fn find_last_successful(&self, owner_id: TodoListId) -> Result<Option<SyncSession>> {
        let sql = format!(
            r#"
            SELECT {} FROM sync_sessions
            WHERE list_id = ?
              AND status = 'completed'
              AND error_message IS NULL
              AND COALESCE(json_array_length(sync_results, '$.errors'), 0) = 0
            ORDER BY completed_at DESC, rowid DESC
            LIMIT 1
            "#,
            SESSION_COLUMNS
        );
        Ok(self.fetch_many(&sql, owner_id).await?.into_iter().next())
    }

    async fn find_active(&self, owner_id: TodoListId) -> Result<Vec<SyncSession>> {
        let sql = format!(
            r#"
            SELECT {} FROM sync_sessions
            WHERE list_id = ? AND status IN ('initiated', 'running', 'paused')
            ORDER BY started_at DESC, rowid DESC
            "#,
            SESSION_COLUMNS
        );
        self.fetch_many(&sql, owner_id).await
    }

    async fn delete(&self, id: &SyncSessionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_sessions WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Conflict Task Repository
// ============================================================================

/// Repository trait for conflict resolution task persistence
#[async_trait]
pub trait ConflictTaskRepository: Send + Sync {
    /// Insert a new task
    ///
    /// # Errors
    ///
    /// Returns an error if the owning session doesn't exist or the database
    /// operation fails
    async fn insert(&self, task: &ConflictResolutionTask) -> Result<()>;

    /// Persist the resolution state of a task
    ///
    /// A settled task is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if the task doesn't exist, or
    /// `InvalidStateTransition` if it is already resolved, auto-resolved or
    /// rejected
    async fn update(&self, task: &ConflictResolutionTask) -> Result<()>;

    /// Find a task by ID
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_id(&self, id: &ConflictTaskId) -> Result<Option<ConflictResolutionTask>>;

    /// Tasks created by one session, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_session(&self, session_id: &SyncSessionId)
        -> Result<Vec<ConflictResolutionTask>>;

    /// Every task of a list across its sessions, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_owner(&self, owner_id: TodoListId) -> Result<Vec<ConflictResolutionTask>>;

    /// Pending and reviewing tasks of a list, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_requiring_attention(
        &self,
        owner_id: TodoListId,
    ) -> Result<Vec<ConflictResolutionTask>>;
}

/// SQLite implementation of ConflictTaskRepository
pub struct SqliteConflictTaskRepository {
    pool: SqlitePool,
}

impl SqliteConflictTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const TASK_COLUMNS: &str = r#"
    t.id, t.sync_session_id, t.record_type, t.local_id, t.external_id,
    t.conflict_type, t.status, t.local_data, t.remote_data, t.resolution_data,
    t.conflict_analysis, t.resolved_at, t.resolved_by, t.resolution_strategy,
    t.rejection_reason, t.created_at, t.updated_at
"#;

#[derive(Debug, FromRow)]
struct ConflictTaskRow {
    id: String,
    sync_session_id: String,
    record_type: String,
    local_id: Option<i64>,
    external_id: Option<String>,
    conflict_type: String,
    status: String,
    local_data: String,
    remote_data: String,
    resolution_data: Option<String>,
    conflict_analysis: String,
    resolved_at: Option<i64>,
    resolved_by: Option<String>,
    resolution_strategy: Option<String>,
    rejection_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn parse_record_type(value: &str) -> Result<ResourceKind> {
    match value {
        "todo_list" => Ok(ResourceKind::TodoList),
        "todo_item" => Ok(ResourceKind::TodoItem),
        other => Err(SyncError::Database(format!("Invalid record_type: {}", other))),
    }
}

impl TryFrom<ConflictTaskRow> for ConflictResolutionTask {
    type Error = SyncError;

    fn try_from(row: ConflictTaskRow) -> Result<Self> {
        let resolution_data: Option<RecordSnapshot> = row
            .resolution_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let conflict_analysis: ConflictAnalysis = serde_json::from_str(&row.conflict_analysis)?;

        Ok(ConflictResolutionTask {
            id: ConflictTaskId::from_string(&row.id)?,
            session_id: SyncSessionId::from_string(&row.sync_session_id)?,
            record_type: parse_record_type(&row.record_type)?,
            local_id: row.local_id,
            external_id: row.external_id,
            conflict_type: row.conflict_type.parse()?,
            status: row.status.parse()?,
            local_data: serde_json::from_str(&row.local_data)?,
            remote_data: serde_json::from_str(&row.remote_data)?,
            resolution_data,
            conflict_analysis,
            resolved_at: row.resolved_at.map(from_millis),
            resolved_by: row.resolved_by,
            resolution_strategy: row
                .resolution_strategy
                .as_deref()
                .map(str::parse)
                .transpose()?,
            rejection_reason: row.rejection_reason,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

impl SqliteConflictTaskRepository {
    async fn fetch_for_owner(
        &self,
        filter: &str,
        owner_id: TodoListId,
    ) -> Result<Vec<ConflictResolutionTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM conflict_resolution_tasks t
            JOIN sync_sessions s ON s.id = t.sync_session_id
            WHERE s.list_id = ? {}
            ORDER BY t.created_at ASC, t.rowid ASC
            "#,
            TASK_COLUMNS, filter
        );

        let rows = sqlx::query_as::<_, ConflictTaskRow>(&sql)
            .bind(owner_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter()
            .map(ConflictResolutionTask::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

#[async_trait]
impl ConflictTaskRepository for SqliteConflictTaskRepository {
    async fn insert(&self, task: &ConflictResolutionTask) -> Result<()> {
        let resolution_data = task
            .resolution_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO conflict_resolution_tasks (
                id, sync_session_id, record_type, local_id, external_id,
                conflict_type, status, local_data, remote_data, resolution_data,
                conflict_analysis, resolved_at, resolved_by, resolution_strategy,
                rejection_reason, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.as_str())
        .bind(task.session_id.as_str())
        .bind(task.record_type.as_str())
        .bind(task.local_id)
        .bind(&task.external_id)
        .bind(task.conflict_type.as_str())
        .bind(task.status.as_str())
        .bind(serde_json::to_string(&task.local_data)?)
        .bind(serde_json::to_string(&task.remote_data)?)
        .bind(resolution_data)
        .bind(serde_json::to_string(&task.conflict_analysis)?)
        .bind(task.resolved_at.map(to_millis))
        .bind(&task.resolved_by)
        .bind(task.resolution_strategy.map(|s| s.as_str()))
        .bind(&task.rejection_reason)
        .bind(to_millis(task.created_at))
        .bind(to_millis(task.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update(&self, task: &ConflictResolutionTask) -> Result<()> {
        let resolution_data = task
            .resolution_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE conflict_resolution_tasks SET
                status = ?,
                resolution_data = ?,
                resolved_at = ?,
                resolved_by = ?,
                resolution_strategy = ?,
                rejection_reason = ?,
                updated_at = ?
            WHERE id = ?
              AND status NOT IN ('resolved', 'auto_resolved', 'rejected')
            "#,
        )
        .bind(task.status.as_str())
        .bind(resolution_data)
        .bind(task.resolved_at.map(to_millis))
        .bind(&task.resolved_by)
        .bind(task.resolution_strategy.map(|s| s.as_str()))
        .bind(&task.rejection_reason)
        .bind(to_millis(task.updated_at))
        .bind(task.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            // Missing, or settled since it was read
            return match self.find_by_id(&task.id).await? {
                Some(stored) => {
                    warn!(task_id = %task.id, stored = %stored.status, "Task already settled");
                    Err(SyncError::InvalidStateTransition {
                        from: stored.status.as_str().to_string(),
                        to: task.status.as_str().to_string(),
                        reason: "Task was already settled".to_string(),
                    })
                }
                None => Err(SyncError::TaskNotFound {
                    task_id: task.id.to_string(),
                }),
            };
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &ConflictTaskId) -> Result<Option<ConflictResolutionTask>> {
        let sql = format!(
            "SELECT {} FROM conflict_resolution_tasks t WHERE t.id = ?",
            TASK_COLUMNS
        );
        let row = sqlx::query_as::<_, ConflictTaskRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(ConflictResolutionTask::try_from).transpose()
    }

    async fn find_by_session(
        &self,
        session_id: &SyncSessionId,
    ) -> Result<Vec<ConflictResolutionTask>> {
        let sql = format!(
            r#"
            SELECT {} FROM conflict_resolution_tasks t
            WHERE t.sync_session_id = ?
            ORDER BY t.created_at ASC, t.rowid ASC
            "#,
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<_, ConflictTaskRow>(&sql)
            .bind(session_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter()
            .map(ConflictResolutionTask::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn find_by_owner(&self, owner_id: TodoListId) -> Result<Vec<ConflictResolutionTask>> {
        self.fetch_for_owner("", owner_id).await
    }

    async fn find_requiring_attention(
        &self,
        owner_id: TodoListId,
    ) -> Result<Vec<ConflictResolutionTask>> {
        self.fetch_for_owner("AND t.status IN ('pending', 'reviewing')", owner_id)
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
