//! Todo list repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{from_millis, to_millis, NewTodoList, TodoList, TodoListId, TodoListUpdate};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, FromRow, SqlitePool};
use std::sync::Arc;

/// List repository interface for data access operations
#[async_trait]
pub trait TodoListRepository: Send + Sync {
    /// Find a list by its ID
    ///
    /// # Returns
    /// - `Ok(Some(list))` if found
    /// - `Ok(None)` if not found
    async fn find_by_id(&self, id: TodoListId) -> Result<Option<TodoList>>;

    /// Insert a new list
    ///
    /// # Errors
    /// Returns error if validation fails or the external id is already taken
    async fn insert(&self, list: &NewTodoList) -> Result<TodoList>;

    /// Apply a partial update and return the stored list
    ///
    /// A name change bumps `updated_at`; `mark_synced` stamps `synced_at`
    /// with the same instant.
    ///
    /// # Errors
    /// Returns `NotFound` if the list does not exist
    async fn update(&self, id: TodoListId, update: &TodoListUpdate) -> Result<TodoList>;

    /// Enable or disable sync for a list
    ///
    /// Enabling without an `external_id` keeps the current remote identifier
    /// or generates one.
    ///
    /// # Errors
    /// Returns `NotFound` if the list does not exist
    async fn set_sync_enabled(
        &self,
        id: TodoListId,
        enabled: bool,
        external_id: Option<String>,
    ) -> Result<TodoList>;

    /// Stamp `synced_at` without touching `updated_at`
    ///
    /// # Errors
    /// Returns `NotFound` if the list does not exist
    async fn mark_synced(&self, id: TodoListId, at: DateTime<Utc>) -> Result<()>;

    /// Lists with sync enabled whose local state is newer than their last sync
    async fn find_needing_sync(&self) -> Result<Vec<TodoList>>;

    /// Delete a list together with its items, sessions and tasks
    ///
    /// # Returns
    /// - `Ok(true)` if the list was deleted
    /// - `Ok(false)` if the list was not found
    async fn delete(&self, id: TodoListId) -> Result<bool>;
}

#[derive(FromRow)]
struct TodoListRow {
    id: i64,
    name: String,
    external_id: Option<String>,
    sync_enabled: bool,
    synced_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl From<TodoListRow> for TodoList {
    fn from(row: TodoListRow) -> Self {
        Self {
            id: TodoListId(row.id),
            name: row.name,
            external_id: row.external_id,
            sync_enabled: row.sync_enabled,
            synced_at: row.synced_at.map(from_millis),
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

/// SQLite implementation of TodoListRepository
pub struct SqliteTodoListRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteTodoListRepository {
    /// Create a new repository stamping rows with the system clock
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn require(&self, id: TodoListId) -> Result<TodoList> {
        self.find_by_id(id).await?.ok_or_else(|| LibraryError::NotFound {
            entity_type: "TodoList".to_string(),
            id: id.to_string(),
        })
    }
}

fn invalid(message: String) -> LibraryError {
    LibraryError::InvalidInput {
        field: "TodoList".to_string(),
        message,
    }
}

#[async_trait]
impl TodoListRepository for SqliteTodoListRepository {
    async fn find_by_id(&self, id: TodoListId) -> Result<Option<TodoList>> {
        let row = query_as::<_, TodoListRow>("SELECT * FROM todo_lists WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(TodoList::from))
    }

    async fn insert(&self, list: &NewTodoList) -> Result<TodoList> {
        list.validate().map_err(invalid)?;

        let now = to_millis(self.clock.now());
        let result = query(
            r#"
            INSERT INTO todo_lists (name, external_id, sync_enabled, synced_at, created_at, updated_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(&list.name)
        .bind(&list.external_id)
        .bind(list.sync_enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.require(TodoListId(result.last_insert_rowid())).await
    }

    async fn update(&self, id: TodoListId, update: &TodoListUpdate) -> Result<TodoList> {
        update.validate().map_err(invalid)?;

        let now = to_millis(self.clock.now());
        let result = query(
            r#"
            UPDATE todo_lists
            SET name = COALESCE(?, name),
                updated_at = CASE WHEN ? IS NULL THEN updated_at ELSE ? END,
                synced_at = CASE WHEN ? THEN ? ELSE synced_at END
            WHERE id = ?
            "#,
        )
        .bind(&update.name)
        .bind(&update.name)
        .bind(now)
        .bind(update.mark_synced)
        .bind(now)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "TodoList".to_string(),
                id: id.to_string(),
            });
        }

        self.require(id).await
    }

    async fn set_sync_enabled(
        &self,
        id: TodoListId,
        enabled: bool,
        external_id: Option<String>,
    ) -> Result<TodoList> {
        let mut list = self.require(id).await?;
        let now = self.clock.now();

        if enabled {
            list.enable_sync(external_id, now);
        } else {
            list.disable_sync(now);
        }

        query(
            r#"
            UPDATE todo_lists
            SET sync_enabled = ?, external_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(list.sync_enabled)
        .bind(&list.external_id)
        .bind(to_millis(list.updated_at))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(list)
    }

    async fn mark_synced(&self, id: TodoListId, at: DateTime<Utc>) -> Result<()> {
        let result = query("UPDATE todo_lists SET synced_at = ? WHERE id = ?")
            .bind(to_millis(at))
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "TodoList".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_needing_sync(&self) -> Result<Vec<TodoList>> {
        let rows = query_as::<_, TodoListRow>(
            r#"
            SELECT * FROM todo_lists
            WHERE sync_enabled = 1 AND (synced_at IS NULL OR synced_at < updated_at)
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TodoList::from).collect())
    }

    async fn delete(&self, id: TodoListId) -> Result<bool> {
        let result = query("DELETE FROM todo_lists WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use bridge_traits::time::ManualClock;
    use chrono::{Duration, TimeZone};

    async fn setup() -> (SqliteTodoListRepository, Arc<ManualClock>) {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        (
            SqliteTodoListRepository::with_clock(pool, clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn test_insert_and_find_list() {
        let (repo, clock) = setup().await;

        let list = repo
            .insert(&NewTodoList::new("Groceries").synced_with("remote-1"))
            .await
            .unwrap();

        let found = repo.find_by_id(list.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Groceries");
        assert_eq!(found.external_id.as_deref(), Some("remote-1"));
        assert!(found.sync_enabled);
        assert!(found.synced_at.is_none());
        assert_eq!(found.created_at, clock.now());
        assert!(found.needs_sync());
    }

    #[tokio::test]
    async fn test_insert_rejects_empty_name() {
        let (repo, _) = setup().await;
        let result = repo.insert(&NewTodoList::new("")).await;
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_update_with_mark_synced_clears_needs_sync() {
        let (repo, clock) = setup().await;
        let list = repo
            .insert(&NewTodoList::new("Chores").synced_with("remote-2"))
            .await
            .unwrap();

        clock.advance(Duration::minutes(5));
        let updated = repo
            .update(
                list.id,
                &TodoListUpdate {
                    name: Some("House chores".to_string()),
                    mark_synced: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "House chores");
        assert_eq!(updated.updated_at, clock.now());
        assert_eq!(updated.synced_at, Some(clock.now()));
        assert!(!updated.needs_sync());
    }

    #[tokio::test]
    async fn test_update_missing_list() {
        let (repo, _) = setup().await;
        let result = repo
            .update(TodoListId(999), &TodoListUpdate::default())
            .await;
        assert!(matches!(result, Err(LibraryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_set_sync_enabled_generates_external_id() {
        let (repo, _) = setup().await;
        let list = repo.insert(&NewTodoList::new("Work")).await.unwrap();
        assert!(!list.sync_enabled);

        let enabled = repo.set_sync_enabled(list.id, true, None).await.unwrap();
        assert!(enabled.sync_enabled);
        let external_id = enabled.external_id.clone().unwrap();
        assert!(external_id.starts_with(&format!("todolist_{}_", list.id)));

        let disabled = repo.set_sync_enabled(list.id, false, None).await.unwrap();
        assert!(!disabled.sync_enabled);

        let stored = repo.find_by_id(list.id).await.unwrap().unwrap();
        assert_eq!(stored.external_id, Some(external_id));
        assert!(!stored.sync_enabled);
    }

    #[tokio::test]
    async fn test_find_needing_sync() {
        let (repo, clock) = setup().await;

        let pending = repo
            .insert(&NewTodoList::new("Pending").synced_with("r-1"))
            .await
            .unwrap();
        let synced = repo
            .insert(&NewTodoList::new("Synced").synced_with("r-2"))
            .await
            .unwrap();
        repo.insert(&NewTodoList::new("Local only")).await.unwrap();

        clock.advance(Duration::seconds(1));
        repo.mark_synced(synced.id, clock.now()).await.unwrap();

        let lists = repo.find_needing_sync().await.unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].id, pending.id);
    }

    #[tokio::test]
    async fn test_delete_list() {
        let (repo, _) = setup().await;
        let list = repo.insert(&NewTodoList::new("Temp")).await.unwrap();

        assert!(repo.delete(list.id).await.unwrap());
        assert!(!repo.delete(list.id).await.unwrap());
        assert!(repo.find_by_id(list.id).await.unwrap().is_none());
    }
}
