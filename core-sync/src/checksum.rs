//! Content checksums used to decide whether two versions of a record differ.

use crate::snapshot::RecordSnapshot;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 digest of a snapshot's canonical JSON form
///
/// Struct field order is fixed, so the serialization (and therefore the
/// digest) is deterministic for equal snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeChecksum(String);

impl ChangeChecksum {
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if the snapshot cannot be encoded
    pub fn compute(snapshot: &RecordSnapshot) -> Result<Self> {
        let canonical = serde_json::to_vec(snapshot)?;

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
