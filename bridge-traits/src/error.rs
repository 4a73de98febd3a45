use thiserror::Error;

/// Errors raised by host-provided bridges, most notably the remote
/// system-of-record client.
///
/// The variants are distinguishable so callers can decide whether a failure
/// is fatal, retryable, or local to a single record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Remote resource not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    #[error("Remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),
}

impl BridgeError {
    /// Authentication failures must never be retried automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Authentication(_))
    }

    /// Whether the failure is transient and worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::RateLimited { .. }
                | BridgeError::Server { .. }
                | BridgeError::Network(_)
                | BridgeError::Timeout(_)
        )
    }

    /// Server-specified wait hint, in seconds, for rate-limited requests.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            BridgeError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }

    /// Map an HTTP status code to the matching error variant.
    ///
    /// Hosts implementing [`RemoteSyncApi`](crate::remote::RemoteSyncApi)
    /// over HTTP can use this to keep classification consistent.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => BridgeError::Authentication(message),
            404 => BridgeError::NotFound {
                kind: "resource".to_string(),
                id: message,
            },
            429 => BridgeError::RateLimited { retry_after_secs },
            500..=599 => BridgeError::Server { status, message },
            _ => BridgeError::Rejected { status, message },
        }
    }
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(", retry after {}s", secs))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(BridgeError::Authentication("expired".into()).is_fatal());
        assert!(!BridgeError::Authentication("expired".into()).is_retryable());

        assert!(BridgeError::RateLimited {
            retry_after_secs: Some(30)
        }
        .is_retryable());
        assert!(BridgeError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(BridgeError::Network("reset".into()).is_retryable());
        assert!(BridgeError::Timeout(10).is_retryable());

        assert!(!BridgeError::NotFound {
            kind: "todo_item".into(),
            id: "42".into()
        }
        .is_retryable());
        assert!(!BridgeError::OperationFailed("bad".into()).is_fatal());
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            BridgeError::from_status(401, "unauthorized", None),
            BridgeError::Authentication(_)
        ));
        assert_eq!(
            BridgeError::from_status(429, "slow down", Some(60)).retry_after_secs(),
            Some(60)
        );
        assert!(matches!(
            BridgeError::from_status(502, "bad gateway", None),
            BridgeError::Server { status: 502, .. }
        ));
        assert!(matches!(
            BridgeError::from_status(422, "invalid", None),
            BridgeError::Rejected { status: 422, .. }
        ));
    }

    #[test]
    fn test_rate_limit_display() {
        let err = BridgeError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 30s");

        let err = BridgeError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "Rate limit exceeded");
    }
}
