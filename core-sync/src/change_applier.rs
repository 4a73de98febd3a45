//! # Change Application
//!
//! Writes detected and resolved changes to the side that has not seen them.
//!
//! - Remote changes not covered by a conflict are written to the local store
//! - Local changes not covered by a conflict are pushed to the remote API
//! - Resolved changes are written to both sides
//!
//! Deferred resolutions are skipped entirely. Each change is applied on its
//! own: a failure is recorded in [`SyncResult::errors`] and the batch moves
//! on, except for authentication failures which abort the batch.
//! Cancellation is honoured between changes, never inside one.

use crate::change::{Change, ChangeAction};
use crate::conflict_resolver::Resolution;
use crate::context::RunContext;
use crate::{Result, SyncError};
use bridge_traits::time::Clock;
use bridge_traits::{RemoteSyncApi, ResourceKind};
use core_library::repositories::{TodoItemRepository, TodoListRepository};
use core_library::{NewTodoItem, TodoItem, TodoItemId, TodoItemUpdate, TodoListUpdate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Counts and per-change errors of one application pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Local changes pushed to the remote
    pub local_applied: u64,
    /// Remote changes written to the local store
    pub remote_applied: u64,
    /// Conflicts whose resolution was applied on both sides
    pub conflicts_resolved: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn total_applied(&self) -> u64 {
        self.local_applied + self.remote_applied + self.conflicts_resolved
    }

    pub(crate) fn record_error(&mut self, origin: &str, error: SyncError) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }

        warn!(origin, error = %error, "Change failed, continuing with batch");
        self.errors.push(format!("{} change error: {}", origin, error));
        Ok(())
    }
}

/// Applies changes to the local store and the remote system
pub struct ChangeApplier {
    lists: Arc<dyn TodoListRepository>,
    items: Arc<dyn TodoItemRepository>,
    remote: Arc<dyn RemoteSyncApi>,
    clock: Arc<dyn Clock>,
}

impl ChangeApplier {
    pub fn new(
        lists: Arc<dyn TodoListRepository>,
        items: Arc<dyn TodoItemRepository>,
        remote: Arc<dyn RemoteSyncApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            lists,
            items,
            remote,
            clock,
        }
    }

    /// Apply one run's change-sets and resolutions
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Authentication` if the remote rejects the
    /// credentials and `SyncError::Cancelled` once the run's token is
    /// cancelled; every other failure is recorded in the result
    #[instrument(
        skip(self, ctx, local, remote, resolutions),
        fields(owner_id = %ctx.owner_id(), local = local.len(), remote = remote.len())
    )]
    pub async fn apply_changes(
        &self,
        ctx: &RunContext,
        local: &[Change],
        remote: &[Change],
        resolutions: &[Resolution],
    ) -> Result<SyncResult> {
        let mut result = SyncResult::default();
        let covered = |change: &Change| {
            resolutions
                .iter()
                .any(|resolution| resolution.conflict().covers(change))
        };

        for change in remote.iter().filter(|c| !covered(c)) {
            ctx.check_cancelled()?;
            match self.apply_locally(ctx, change).await {
                Ok(()) => result.remote_applied += 1,
                Err(e) => result.record_error("remote", e)?,
            }
        }

        for change in local.iter().filter(|c| !covered(c)) {
            ctx.check_cancelled()?;
            match self.push_remote(ctx, change).await {
                Ok(()) => result.local_applied += 1,
                Err(e) => result.record_error("local", e)?,
            }
        }

        for change in resolutions.iter().filter_map(Resolution::applicable_change) {
            ctx.check_cancelled()?;
            match self.apply_resolved(ctx, change).await {
                Ok(()) => result.conflicts_resolved += 1,
                Err(e) => result.record_error("resolved", e)?,
            }
        }

        info!(
            local_applied = result.local_applied,
            remote_applied = result.remote_applied,
            conflicts_resolved = result.conflicts_resolved,
            errors = result.errors.len(),
            "Changes applied"
        );

        Ok(result)
    }

    /// Write a resolved change to both sides
    ///
    /// Idempotent: the local record is upserted by local id or external id,
    /// and the remote record is updated once an external id is known.
    ///
    /// # Errors
    ///
    /// Returns an error if either side rejects the change
    pub async fn apply_resolved(&self, ctx: &RunContext, change: &Change) -> Result<()> {
        debug!(change = %change.describe(), "Applying resolved change");

        match change.record_type {
            ResourceKind::TodoItem => {
                if change.action == ChangeAction::Delete {
                    if let Some(item) = self.find_local_item(ctx, change).await? {
                        self.items.delete(item.id).await?;
                    }
                    return self.delete_remote(ctx, change).await;
                }

                let item = self.upsert_local_item(ctx, change).await?;
                self.push_item(ctx, change, &item).await
            }
            ResourceKind::TodoList => {
                self.apply_list_locally(ctx, change).await?;
                self.push_list(ctx, change).await
            }
        }
    }

    // ------------------------------------------------------------------------
    // Remote → local
    // ------------------------------------------------------------------------

    async fn apply_locally(&self, ctx: &RunContext, change: &Change) -> Result<()> {
        match (change.record_type, change.action) {
            (ResourceKind::TodoItem, ChangeAction::Delete) => {
                if let Some(item) = self.find_local_item(ctx, change).await? {
                    self.items.delete(item.id).await?;
                }
                Ok(())
            }
            (ResourceKind::TodoItem, _) => self.upsert_local_item(ctx, change).await.map(|_| ()),
            (ResourceKind::TodoList, _) => self.apply_list_locally(ctx, change).await,
        }
    }

    async fn find_local_item(&self, ctx: &RunContext, change: &Change) -> Result<Option<TodoItem>> {
        if let Some(id) = change.local_id {
            if let Some(item) = self.items.find_by_id(TodoItemId(id)).await? {
                return Ok(Some(item));
            }
        }

        match &change.external_id {
            Some(external_id) => Ok(self
                .items
                .find_by_external_id(ctx.owner_id(), external_id)
                .await?),
            None => Ok(None),
        }
    }

    /// Update the mapped item, or insert it when nothing maps to the change
    async fn upsert_local_item(&self, ctx: &RunContext, change: &Change) -> Result<TodoItem> {
        if let Some(existing) = self.find_local_item(ctx, change).await? {
            let update = TodoItemUpdate {
                description: change.data.description.clone(),
                completed: change.data.completed,
                mark_synced: true,
            };
            return Ok(self.items.update(existing.id, &update).await?);
        }

        let description = change
            .data
            .description
            .clone()
            .ok_or_else(|| SyncError::InvalidInput {
                field: "description".to_string(),
                message: format!("{} carries no description", change.describe()),
            })?;

        let mut new_item = NewTodoItem::new(ctx.owner_id(), description)
            .completed(change.data.completed.unwrap_or(false));
        if let Some(external_id) = &change.external_id {
            new_item = new_item.from_remote(external_id.clone());
        }

        Ok(self.items.insert(&new_item).await?)
    }

    async fn apply_list_locally(&self, ctx: &RunContext, change: &Change) -> Result<()> {
        let update = TodoListUpdate {
            name: change.data.name.clone(),
            mark_synced: true,
        };
        self.lists.update(ctx.owner_id(), &update).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Local → remote
    // ------------------------------------------------------------------------

    async fn push_remote(&self, ctx: &RunContext, change: &Change) -> Result<()> {
        match (change.record_type, change.action) {
            (_, ChangeAction::Delete) => self.delete_remote(ctx, change).await,
            (ResourceKind::TodoItem, _) => {
                let id = change.local_id.ok_or_else(|| SyncError::InvalidInput {
                    field: "local_id".to_string(),
                    message: format!("{} has no local record", change.describe()),
                })?;
                let item = self
                    .items
                    .find_by_id(TodoItemId(id))
                    .await?
                    .ok_or_else(|| SyncError::InvalidInput {
                        field: "local_id".to_string(),
                        message: format!("{} no longer exists", change.describe()),
                    })?;
                self.push_item(ctx, change, &item).await
            }
            (ResourceKind::TodoList, _) => self.push_list(ctx, change).await,
        }
    }

    /// Update the remote item if it is linked, otherwise create and link it
    async fn push_item(&self, ctx: &RunContext, change: &Change, item: &TodoItem) -> Result<()> {
        let external_id = item.external_id.clone().or_else(|| change.external_id.clone());

        match external_id {
            Some(external_id) => {
                let data = change.data.to_resource_data(None);
                ctx.call_remote(
                    self.remote
                        .update_resource(ResourceKind::TodoItem, &external_id, &data),
                )
                .await?;
                self.items.mark_synced(item.id, self.clock.now()).await?;
            }
            None => {
                let parent_id = ctx.remote_list_id().map(str::to_string);
                let data = change.data.to_resource_data(parent_id);
                let created = ctx
                    .call_remote(self.remote.create_resource(ResourceKind::TodoItem, &data))
                    .await?;

                debug!(item_id = %item.id, external_id = %created.id, "Linked item to remote");
                self.items.assign_external_id(item.id, &created.id).await?;
            }
        }

        Ok(())
    }

    async fn push_list(&self, ctx: &RunContext, change: &Change) -> Result<()> {
        let data = change.data.to_resource_data(None);

        match ctx.remote_list_id() {
            Some(external_id) => {
                ctx.call_remote(
                    self.remote
                        .update_resource(ResourceKind::TodoList, external_id, &data),
                )
                .await?;
            }
            None => {
                let created = ctx
                    .call_remote(self.remote.create_resource(ResourceKind::TodoList, &data))
                    .await?;
                self.lists
                    .set_sync_enabled(ctx.owner_id(), true, Some(created.id))
                    .await?;
            }
        }

        self.lists.mark_synced(ctx.owner_id(), self.clock.now()).await?;
        Ok(())
    }

    async fn delete_remote(&self, ctx: &RunContext, change: &Change) -> Result<()> {
        let Some(external_id) = &change.external_id else {
            debug!(change = %change.describe(), "Never pushed, nothing to delete remotely");
            return Ok(());
        };

        ctx.call_remote(self.remote.delete_resource(change.record_type, external_id))
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
