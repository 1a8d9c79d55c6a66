//! In-memory snapshot storage for tests and single-process runs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::backend::{check_entity_id, SnapshotBackend, SnapshotMeta};
use crate::errors::{StoreError, StoreResult};
use crate::time::{SharedClock, SystemClock};

type Key = (String, String);
type Table = HashMap<Key, (Vec<u8>, DateTime<Utc>)>;

/// Snapshots held in a map, stamped by a clock instead of file mtimes
#[derive(Clone)]
pub struct MemoryBackend {
    snapshots: Arc<Mutex<Table>>,
    clock: SharedClock,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryBackend {
    /// Empty backend timestamping writes with `clock`
    pub fn new(clock: SharedClock) -> Self {
        Self {
            snapshots: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Number of stored snapshots across all kinds
    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|map| map.len()).unwrap_or(0)
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Table>> {
        self.snapshots
            .lock()
            .map_err(|_| StoreError::Io("memory backend lock poisoned".into()))
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn read(&self, kind: &str, id: &str) -> StoreResult<Option<Vec<u8>>> {
        check_entity_id(id)?;
        let map = self.lock()?;
        Ok(map
            .get(&(kind.to_string(), id.to_string()))
            .map(|(bytes, _)| bytes.clone()))
    }

    async fn write(&self, kind: &str, id: &str, bytes: &[u8]) -> StoreResult<()> {
        check_entity_id(id)?;
        let now = self.clock.now();
        let mut map = self.lock()?;
        map.insert((kind.to_string(), id.to_string()), (bytes.to_vec(), now));
        Ok(())
    }

    async fn list(&self, kind: &str) -> StoreResult<Vec<SnapshotMeta>> {
        let map = self.lock()?;
        let mut found: Vec<SnapshotMeta> = map
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|((_, id), (_, modified))| SnapshotMeta {
                id: id.clone(),
                modified: *modified,
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedClock;
    use chrono::TimeZone;

    #[tokio::test]
    async fn list_reports_clock_time() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let backend = MemoryBackend::new(Arc::new(FixedClock::new(at)));
        backend.write("gateway", "gw1", b"{}").await.unwrap();
        backend.write("device", "1", b"{}").await.unwrap();

        let listed = backend.list("gateway").await.unwrap();
        assert_eq!(
            listed,
            vec![SnapshotMeta {
                id: "gw1".into(),
                modified: at
            }]
        );
        assert_eq!(backend.len(), 2);
    }
}
