use bridge_traits::BridgeError;
use core_library::LibraryError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("Conflict resolution task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("Todo list {owner_id} not found")]
    OwnerNotFound { owner_id: i64 },

    #[error("Sync is disabled for todo list {owner_id}")]
    SyncDisabled { owner_id: i64 },

    #[error("Sync already in progress for todo list {owner_id}")]
    SyncInProgress { owner_id: i64 },

    #[error("Remote authentication failed: {0}")]
    Authentication(String),

    #[error("Remote error: {0}")]
    Remote(BridgeError),

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    #[error("Invalid task ID: {0}")]
    InvalidTaskId(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Whether running the sync again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Failures that must never be retried automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Authentication(_)
                | SyncError::SyncDisabled { .. }
                | SyncError::OwnerNotFound { .. }
        )
    }

    /// Minimum wait requested by the remote system before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Remote(e) => e.retry_after_secs().map(Duration::from_secs),
            _ => None,
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Authentication(message) => SyncError::Authentication(message),
            other => SyncError::Remote(other),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_authentication_maps_to_fatal() {
        let error = SyncError::from(BridgeError::Authentication("token expired".into()));
        assert!(matches!(error, SyncError::Authentication(_)));
        assert!(error.is_fatal());
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_rate_limit_is_retryable_with_hint() {
        let error = SyncError::from(BridgeError::RateLimited {
            retry_after_secs: Some(45),
        });
        assert!(error.is_retryable());
        assert!(!error.is_fatal());
        assert_eq!(error.retry_after(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_local_errors_not_retryable() {
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(SyncError::Timeout(600).is_retryable());
        assert!(SyncError::SyncDisabled { owner_id: 1 }.is_fatal());
        assert!(!SyncError::InvalidStatus("bogus".into()).is_retryable());
    }
}
