//! Immutable per-run state threaded through the sync phases.

use crate::session::SyncSessionId;
use crate::strategy::{ConflictStrategy, SyncStrategy};
use crate::{Result, SyncError};
use bridge_traits::BridgeError;
use chrono::{DateTime, Utc};
use core_library::{TodoList, TodoListId};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a phase needs to know about the run it belongs to
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: SyncSessionId,
    /// The list as loaded when the run started
    pub list: TodoList,
    pub sync_strategy: SyncStrategy,
    pub conflict_strategy: ConflictStrategy,
    /// Local records modified strictly after this instant count as changed
    pub since: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    /// Bound applied to every individual remote call
    pub remote_timeout: Duration,
    pub cancel_token: CancellationToken,
}

impl RunContext {
    pub fn owner_id(&self) -> TodoListId {
        self.list.id
    }

    /// Remote identifier of the list, if it was ever linked
    pub fn remote_list_id(&self) -> Option<&str> {
        self.list.external_id.as_deref()
    }

    /// # Errors
    ///
    /// Returns `SyncError::Cancelled` once the run's token is cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Await a remote call bounded by the run's remote timeout
    ///
    /// # Errors
    ///
    /// Returns the call's error converted to `SyncError`, or a retryable
    /// remote timeout when the bound elapses
    pub async fn call_remote<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = bridge_traits::Result<T>>,
    {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Remote(BridgeError::Timeout(
                self.remote_timeout.as_secs(),
            ))),
        }
    }
}
