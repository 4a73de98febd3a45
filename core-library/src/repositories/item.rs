//! Todo item repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{
    from_millis, to_millis, NewTodoItem, TodoItem, TodoItemId, TodoItemUpdate, TodoListId,
};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, FromRow, SqlitePool};
use std::sync::Arc;

/// Item repository interface for data access operations
#[async_trait]
pub trait TodoItemRepository: Send + Sync {
    /// Find an item by its ID
    async fn find_by_id(&self, id: TodoItemId) -> Result<Option<TodoItem>>;

    /// Find the item of a list mapped to a remote identifier
    async fn find_by_external_id(
        &self,
        list_id: TodoListId,
        external_id: &str,
    ) -> Result<Option<TodoItem>>;

    /// All items of a list ordered by ID
    async fn find_by_list(&self, list_id: TodoListId) -> Result<Vec<TodoItem>>;

    /// Items of a list whose `updated_at` is strictly after `since`
    async fn find_modified_since(
        &self,
        list_id: TodoListId,
        since: DateTime<Utc>,
    ) -> Result<Vec<TodoItem>>;

    /// Items of a list that changed after their last sync
    async fn find_needing_sync(&self, list_id: TodoListId) -> Result<Vec<TodoItem>>;

    /// Insert a new item
    ///
    /// # Errors
    /// Returns error if:
    /// - Validation fails
    /// - The list does not exist
    /// - The external id is already mapped within the list
    async fn insert(&self, item: &NewTodoItem) -> Result<TodoItem>;

    /// Apply a partial update and return the stored item
    ///
    /// Field changes bump `updated_at`; `mark_synced` stamps `synced_at`
    /// with the same instant.
    ///
    /// # Errors
    /// Returns `NotFound` if the item does not exist
    async fn update(&self, id: TodoItemId, update: &TodoItemUpdate) -> Result<TodoItem>;

    /// Record the identifier the remote system assigned and stamp `synced_at`
    ///
    /// # Errors
    /// Returns `NotFound` if the item does not exist
    async fn assign_external_id(&self, id: TodoItemId, external_id: &str) -> Result<()>;

    /// Stamp `synced_at` without touching `updated_at`
    ///
    /// # Errors
    /// Returns `NotFound` if the item does not exist
    async fn mark_synced(&self, id: TodoItemId, at: DateTime<Utc>) -> Result<()>;

    /// Delete an item by ID
    ///
    /// # Returns
    /// - `Ok(true)` if the item was deleted
    /// - `Ok(false)` if the item was not found
    async fn delete(&self, id: TodoItemId) -> Result<bool>;

    /// Count the items of a list
    async fn count_by_list(&self, list_id: TodoListId) -> Result<i64>;
}

#[derive(FromRow)]
struct TodoItemRow {
    id: i64,
    list_id: i64,
    description: String,
    completed: bool,
    external_id: Option<String>,
    synced_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl From<TodoItemRow> for TodoItem {
    fn from(row: TodoItemRow) -> Self {
        Self {
            id: TodoItemId(row.id),
            list_id: TodoListId(row.list_id),
            description: row.description,
            completed: row.completed,
            external_id: row.external_id,
            synced_at: row.synced_at.map(from_millis),
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

/// SQLite implementation of TodoItemRepository
pub struct SqliteTodoItemRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteTodoItemRepository {
    /// Create a new repository stamping rows with the system clock
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn require(&self, id: TodoItemId) -> Result<TodoItem> {
        self.find_by_id(id).await?.ok_or_else(|| not_found(id))
    }
}

fn not_found(id: TodoItemId) -> LibraryError {
    LibraryError::NotFound {
        entity_type: "TodoItem".to_string(),
        id: id.to_string(),
    }
}

fn invalid(message: String) -> LibraryError {
    LibraryError::InvalidInput {
        field: "TodoItem".to_string(),
        message,
    }
}

#[async_trait]
impl TodoItemRepository for SqliteTodoItemRepository {
    async fn find_by_id(&self, id: TodoItemId) -> Result<Option<TodoItem>> {
        let row = query_as::<_, TodoItemRow>("SELECT * FROM todo_items WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(TodoItem::from))
    }

    async fn find_by_external_id(
        &self,
        list_id: TodoListId,
        external_id: &str,
    ) -> Result<Option<TodoItem>> {
        let row = query_as::<_, TodoItemRow>(
            "SELECT * FROM todo_items WHERE list_id = ? AND external_id = ?",
        )
        .bind(list_id.0)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TodoItem::from))
    }

    async fn find_by_list(&self, list_id: TodoListId) -> Result<Vec<TodoItem>> {
        let rows =
            query_as::<_, TodoItemRow>("SELECT * FROM todo_items WHERE list_id = ? ORDER BY id")
                .bind(list_id.0)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(TodoItem::from).collect())
    }

    async fn find_modified_since(
        &self,
        list_id: TodoListId,
        since: DateTime<Utc>,
    ) -> Result<Vec<TodoItem>> {
        let rows = query_as::<_, TodoItemRow>(
            r#"
            SELECT * FROM todo_items
            WHERE list_id = ? AND updated_at > ?
            ORDER BY updated_at, id
            "#,
        )
        .bind(list_id.0)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TodoItem::from).collect())
    }

    async fn find_needing_sync(&self, list_id: TodoListId) -> Result<Vec<TodoItem>> {
        let rows = query_as::<_, TodoItemRow>(
            r#"
            SELECT * FROM todo_items
            WHERE list_id = ? AND (synced_at IS NULL OR synced_at < updated_at)
            ORDER BY id
            "#,
        )
        .bind(list_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TodoItem::from).collect())
    }

    async fn insert(&self, item: &NewTodoItem) -> Result<TodoItem> {
        item.validate().map_err(invalid)?;

        let now = to_millis(self.clock.now());
        let synced_at = item.synced.then_some(now);

        let result = query(
            r#"
            INSERT INTO todo_items (
                list_id, description, completed, external_id, synced_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.list_id.0)
        .bind(&item.description)
        .bind(item.completed)
        .bind(&item.external_id)
        .bind(synced_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.require(TodoItemId(result.last_insert_rowid())).await
    }

    async fn update(&self, id: TodoItemId, update: &TodoItemUpdate) -> Result<TodoItem> {
        update.validate().map_err(invalid)?;

        let now = to_millis(self.clock.now());
        let touches_fields = update.description.is_some() || update.completed.is_some();

        let result = query(
            r#"
            UPDATE todo_items
            SET description = COALESCE(?, description),
                completed = COALESCE(?, completed),
                updated_at = CASE WHEN ? THEN ? ELSE updated_at END,
                synced_at = CASE WHEN ? THEN ? ELSE synced_at END
            WHERE id = ?
            "#,
        )
        .bind(&update.description)
        .bind(update.completed)
        .bind(touches_fields)
        .bind(now)
        .bind(update.mark_synced)
        .bind(now)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }

        self.require(id).await
    }

    async fn assign_external_id(&self, id: TodoItemId, external_id: &str) -> Result<()> {
        let result = query("UPDATE todo_items SET external_id = ?, synced_at = ? WHERE id = ?")
            .bind(external_id)
            .bind(to_millis(self.clock.now()))
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }

        Ok(())
    }

    async fn mark_synced(&self, id: TodoItemId, at: DateTime<Utc>) -> Result<()> {
        let result = query("UPDATE todo_items SET synced_at = ? WHERE id = ?")
            .bind(to_millis(at))
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }

        Ok(())
    }

    async fn delete(&self, id: TodoItemId) -> Result<bool> {
        let result = query("DELETE FROM todo_items WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_by_list(&self, list_id: TodoListId) -> Result<i64> {
        let count: (i64,) = query_as("SELECT COUNT(*) FROM todo_items WHERE list_id = ?")
            .bind(list_id.0)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::NewTodoList;
    use crate::repositories::{SqliteTodoListRepository, TodoListRepository};
    use bridge_traits::time::ManualClock;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        items: SqliteTodoItemRepository,
        list_id: TodoListId,
        clock: Arc<ManualClock>,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let lists = SqliteTodoListRepository::with_clock(pool.clone(), clock.clone());
        let list = lists
            .insert(&NewTodoList::new("Groceries").synced_with("remote-list"))
            .await
            .unwrap();

        Fixture {
            items: SqliteTodoItemRepository::with_clock(pool, clock.clone()),
            list_id: list.id,
            clock,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_item() {
        let f = setup().await;

        let item = f
            .items
            .insert(&NewTodoItem::new(f.list_id, "Buy milk"))
            .await
            .unwrap();

        let found = f.items.find_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(found.description, "Buy milk");
        assert!(!found.completed);
        assert!(found.external_id.is_none());
        assert!(found.needs_sync());
        assert_eq!(f.items.count_by_list(f.list_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_remote_item_is_synced() {
        let f = setup().await;

        let item = f
            .items
            .insert(
                &NewTodoItem::new(f.list_id, "From remote")
                    .completed(true)
                    .from_remote("ext-1"),
            )
            .await
            .unwrap();

        assert_eq!(item.synced_at, Some(f.clock.now()));
        assert!(!item.needs_sync());

        let by_external = f
            .items
            .find_by_external_id(f.list_id, "ext-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_external.id, item.id);
        assert!(by_external.completed);
    }

    #[tokio::test]
    async fn test_duplicate_external_id_rejected() {
        let f = setup().await;
        let item = NewTodoItem::new(f.list_id, "Once").from_remote("ext-dup");

        f.items.insert(&item).await.unwrap();
        let second = f.items.insert(&item).await;
        assert!(matches!(second, Err(LibraryError::Database(_))));
    }

    #[tokio::test]
    async fn test_insert_requires_existing_list() {
        let f = setup().await;
        let result = f
            .items
            .insert(&NewTodoItem::new(TodoListId(404), "Orphan"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_fields_and_mark_synced() {
        let f = setup().await;
        let item = f
            .items
            .insert(&NewTodoItem::new(f.list_id, "Walk dog"))
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(1));
        let updated = f
            .items
            .update(
                item.id,
                &TodoItemUpdate {
                    completed: Some(true),
                    mark_synced: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(updated.completed);
        assert_eq!(updated.description, "Walk dog");
        assert_eq!(updated.updated_at, f.clock.now());
        assert_eq!(updated.synced_at, Some(f.clock.now()));
        assert!(!updated.needs_sync());
    }

    #[tokio::test]
    async fn test_mark_synced_only_keeps_updated_at() {
        let f = setup().await;
        let item = f
            .items
            .insert(&NewTodoItem::new(f.list_id, "Call mom"))
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(1));
        let updated = f
            .items
            .update(
                item.id,
                &TodoItemUpdate {
                    mark_synced: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.updated_at, item.updated_at);
        assert!(updated.synced_at.unwrap() > updated.updated_at);
    }

    #[tokio::test]
    async fn test_find_modified_since_is_strict() {
        let f = setup().await;
        let since = f.clock.now();

        f.items
            .insert(&NewTodoItem::new(f.list_id, "At watermark"))
            .await
            .unwrap();
        f.clock.advance(Duration::milliseconds(1));
        let later = f
            .items
            .insert(&NewTodoItem::new(f.list_id, "After watermark"))
            .await
            .unwrap();

        let modified = f.items.find_modified_since(f.list_id, since).await.unwrap();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].id, later.id);
    }

    #[tokio::test]
    async fn test_assign_external_id() {
        let f = setup().await;
        let item = f
            .items
            .insert(&NewTodoItem::new(f.list_id, "Push me"))
            .await
            .unwrap();
        assert_eq!(f.items.find_needing_sync(f.list_id).await.unwrap().len(), 1);

        f.items.assign_external_id(item.id, "ext-9").await.unwrap();

        let stored = f.items.find_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(stored.external_id.as_deref(), Some("ext-9"));
        assert!(f.items.find_needing_sync(f.list_id).await.unwrap().is_empty());

        let missing = f.items.assign_external_id(TodoItemId(999), "ext").await;
        assert!(matches!(missing, Err(LibraryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_item() {
        let f = setup().await;
        let item = f
            .items
            .insert(&NewTodoItem::new(f.list_id, "Temp"))
            .await
            .unwrap();

        assert!(f.items.delete(item.id).await.unwrap());
        assert!(!f.items.delete(item.id).await.unwrap());
        assert!(f.items.find_by_list(f.list_id).await.unwrap().is_empty());
    }
}
