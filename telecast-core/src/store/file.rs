//! Directory-backed snapshot storage
//!
//! Layout: `<root>/<kind>/<id>.json`. Writes go to a uniquely named temporary
//! file in the same directory and are renamed into place, so a reader sees
//! either the previous or the next snapshot. Independent processes may still
//! overwrite each other's merges; the reconcile loop's verify step and the
//! additive merge absorb that.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use super::backend::{check_entity_id, SnapshotBackend, SnapshotMeta};
use crate::errors::{StoreError, StoreResult};

const SNAPSHOT_EXT: &str = "json";

/// Snapshot files under one shared root directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Store snapshots under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one snapshot file
    pub fn path_for(&self, kind: &str, id: &str) -> StoreResult<PathBuf> {
        check_entity_id(kind)?;
        check_entity_id(id)?;
        Ok(self.root.join(kind).join(format!("{id}.{SNAPSHOT_EXT}")))
    }
}

/// Replace `path` with `bytes` through a hidden temporary sibling and a rename.
///
/// Concurrent readers see the old contents or the new ones, never a prefix.
/// The temporary file is removed when the rename fails.
pub(crate) async fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot");
    let nonce: u64 = rand::thread_rng().gen();
    let tmp = dir.join(format!(".{name}.{nonce:016x}.tmp"));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    async fn read(&self, kind: &str, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(kind, id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!("{}: {e}", path.display()))),
        }
    }

    async fn write(&self, kind: &str, id: &str, bytes: &[u8]) -> StoreResult<()> {
        let path = self.path_for(kind, id)?;
        replace_file(&path, bytes)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", path.display())))
    }

    async fn list(&self, kind: &str) -> StoreResult<Vec<SnapshotMeta>> {
        check_entity_id(kind)?;
        let dir = self.root.join(kind);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", dir.display()))),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            found.push(SnapshotMeta {
                id: id.to_string(),
                modified: DateTime::<Utc>::from(modified),
            });
        }

        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}
