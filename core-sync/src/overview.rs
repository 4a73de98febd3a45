//! Sync status rollup of a single list.

use crate::session::{SessionStatus, SessionSummary, SyncSession};
use chrono::{DateTime, Utc};
use core_library::{TodoList, TodoListId};
use serde::{Deserialize, Serialize};

/// Where a list stands with respect to the remote system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Disabled,
    NeverSynced,
    NoSessions,
    Synced,
    NeedsSync,
    Syncing,
    SyncFailed,
    Unknown,
}

impl SyncState {
    /// Derive the state from the list, its latest session and the number of
    /// items changed since their last sync
    pub fn derive(list: &TodoList, latest: Option<&SyncSession>, pending_items: u64) -> Self {
        if !list.sync_enabled {
            return SyncState::Disabled;
        }
        if list.synced_at.is_none() {
            return SyncState::NeverSynced;
        }

        let Some(latest) = latest else {
            return SyncState::NoSessions;
        };

        match latest.status {
            SessionStatus::Completed if list.needs_sync() || pending_items > 0 => {
                SyncState::NeedsSync
            }
            SessionStatus::Completed => SyncState::Synced,
            SessionStatus::Initiated | SessionStatus::Running => SyncState::Syncing,
            SessionStatus::Failed => SyncState::SyncFailed,
            SessionStatus::Paused | SessionStatus::Cancelled => SyncState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Disabled => "disabled",
            SyncState::NeverSynced => "never_synced",
            SyncState::NoSessions => "no_sessions",
            SyncState::Synced => "synced",
            SyncState::NeedsSync => "needs_sync",
            SyncState::Syncing => "syncing",
            SyncState::SyncFailed => "sync_failed",
            SyncState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOverview {
    pub owner_id: TodoListId,
    pub state: SyncState,
    pub synced_at: Option<DateTime<Utc>>,
    /// Items changed since their last sync
    pub pending_items: u64,
    pub last_session: Option<SessionSummary>,
    pub tasks_requiring_attention: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_applier::SyncResult;
    use crate::strategy::SyncStrategy;
    use chrono::Duration;

    fn list(sync_enabled: bool, synced_at: Option<DateTime<Utc>>) -> TodoList {
        let now = Utc::now();
        TodoList {
            id: TodoListId(1),
            name: "Inbox".to_string(),
            external_id: Some("remote-1".to_string()),
            sync_enabled,
            synced_at,
            created_at: now - Duration::hours(1),
            updated_at: now - Duration::hours(1),
        }
    }

    #[test]
    fn test_state_precedence() {
        let now = Utc::now();
        let session = SyncSession::new(TodoListId(1), SyncStrategy::IncrementalSync, now);

        assert_eq!(
            SyncState::derive(&list(false, Some(now)), Some(&session), 0),
            SyncState::Disabled
        );
        assert_eq!(
            SyncState::derive(&list(true, None), Some(&session), 0),
            SyncState::NeverSynced
        );
        assert_eq!(SyncState::derive(&list(true, Some(now)), None, 0), SyncState::NoSessions);
        assert_eq!(
            SyncState::derive(&list(true, Some(now)), Some(&session), 0),
            SyncState::Syncing
        );
    }

    #[test]
    fn test_completed_session_states() {
        let now = Utc::now();
        let session = SyncSession::new(TodoListId(1), SyncStrategy::IncrementalSync, now)
            .start(now)
            .unwrap()
            .complete(SyncResult::default(), now)
            .unwrap();

        let synced = list(true, Some(now));
        assert_eq!(SyncState::derive(&synced, Some(&session), 0), SyncState::Synced);
        assert_eq!(SyncState::derive(&synced, Some(&session), 2), SyncState::NeedsSync);

        let stale = list(true, Some(now - Duration::hours(2)));
        assert_eq!(SyncState::derive(&stale, Some(&session), 0), SyncState::NeedsSync);
    }

    #[test]
    fn test_failed_and_cancelled_sessions() {
        let now = Utc::now();
        let failed = SyncSession::new(TodoListId(1), SyncStrategy::IncrementalSync, now)
            .fail("boom".to_string(), now)
            .unwrap();
        let cancelled = SyncSession::new(TodoListId(1), SyncStrategy::IncrementalSync, now)
            .cancel(now)
            .unwrap();

        let list = list(true, Some(now));
        assert_eq!(SyncState::derive(&list, Some(&failed), 0), SyncState::SyncFailed);
        assert_eq!(SyncState::derive(&list, Some(&cancelled), 0), SyncState::Unknown);
        assert_eq!(SyncState::SyncFailed.to_string(), "sync_failed");
    }
}
