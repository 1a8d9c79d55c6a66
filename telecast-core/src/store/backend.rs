//! Storage backend seam
//!
//! The reconcile loop only needs three byte-level operations per entity kind.
//! Keeping them behind a trait lets a transactional store replace the shared
//! directory without touching merge or history logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{StoreError, StoreResult};

/// One persisted snapshot, as seen by a directory scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    /// Entity id
    pub id: String,
    /// Last write time
    pub modified: DateTime<Utc>,
}

/// Byte-level snapshot storage shared by every collector in the fleet
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Read a snapshot; `Ok(None)` when it does not exist
    async fn read(&self, kind: &str, id: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace a snapshot
    async fn write(&self, kind: &str, id: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Every snapshot of a kind with its modification time
    async fn list(&self, kind: &str) -> StoreResult<Vec<SnapshotMeta>>;
}

/// Reject ids that cannot safely name a file
pub fn check_entity_id(id: &str) -> StoreResult<()> {
    let bad = id.is_empty()
        || id.starts_with('.')
        || id.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
        || id.contains("..");
    if bad {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ids_pass() {
        for id in ["100", "pointcast:10042", "gw-eui-70b3d5", "srv_a.1"] {
            assert!(check_entity_id(id).is_ok(), "{id}");
        }
    }

    #[test]
    fn path_like_ids_fail() {
        for id in ["", "../etc", "a/b", "a\\b", ".hidden", "x..y"] {
            assert_eq!(check_entity_id(id), Err(StoreError::InvalidId(id.into())));
        }
    }
}
