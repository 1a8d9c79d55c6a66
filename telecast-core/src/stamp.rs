//! Stamp Protocol: Metadata Compression for Constrained Devices
//!
//! ## Overview
//!
//! Location and capture time change slowly but cost airtime on every upload.
//! A device sends them once, tagged with a stamp id (a **Set**), then sends
//! only the stamp id on later uploads (an **Apply**). The collector keeps the
//! last Set per device in memory and mirrors it to `<dir>/<device>.json`, the
//! durable copy every collector in the fleet can read.
//!
//! ## State Machine
//!
//! ```text
//!               Set(version, stamp, lat/lon/alt, date/time)
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ 1. mark cache entry invalid                                  │
//!   │ 2. write stamp file                                          │
//!   │ 3. on success: cache entry = file contents, valid            │
//!   │ 4. strip stamp fields, message continues                     │
//!   └──────────────────────────────────────────────────────────────┘
//!
//!               Apply(stamp)
//!   ┌─────────────────────┐  miss   ┌──────────────┐
//!   │ cache valid, id ==  │───────→ │ reload file  │
//!   └─────────────────────┘         └──────────────┘
//!        │ hit                        │ id ==   │ id !=       │ nothing usable
//!        ↓                            ↓         ↓             ↓
//!     Applied                      Applied   Degraded     Unstampable
//! ```
//!
//! The cache is invalidated *before* the write so that a failed or torn write
//! never leaves a valid entry describing metadata the file does not hold.
//!
//! ## Degraded Path
//!
//! A present cache whose stamp id disagrees with the message still yields a
//! record: the last-known coordinates are substituted and the capture time is
//! replaced with the current wall-clock time. The outcome is reported as
//! [`StampOutcome::Degraded`] so callers can flag the record as approximated.
//!
//! ## Versions
//!
//! Only version 1 exists. Every version-dependent step dispatches on the
//! version so old stamp files stay interpretable once a version 2 appears.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telecast_schemas::TelecastMessage;

use crate::errors::StampError;
use crate::store::{check_entity_id, replace_file};

/// The single stamp format currently defined
pub const STAMP_VERSION_1: u32 = 1;

/// Durable stamp contents, one file per device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StampFile {
    /// Stamp format version
    pub version: u32,
    /// Stamp id
    pub stamp: u32,
    /// Latitude at the time of the Set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f32>,
    /// Longitude at the time of the Set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f32>,
    /// Altitude at the time of the Set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<i32>,
    /// `YYMMDD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at_date: Option<u32>,
    /// `HHMMSS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at_time: Option<u32>,
}

impl StampFile {
    /// Capture the metadata carried by a Set message
    pub fn capture(version: u32, stamp: u32, msg: &TelecastMessage) -> Result<Self, StampError> {
        match version {
            STAMP_VERSION_1 => Ok(Self {
                version,
                stamp,
                latitude: msg.latitude,
                longitude: msg.longitude,
                altitude: msg.altitude,
                captured_at_date: msg.captured_at_date,
                captured_at_time: msg.captured_at_time,
            }),
            v => Err(StampError::UnsupportedVersion(v)),
        }
    }

    /// Write location and capture time into an Apply message
    pub fn substitute(&self, msg: &mut TelecastMessage) -> Result<(), StampError> {
        match self.version {
            STAMP_VERSION_1 => {
                self.substitute_location(msg)?;
                msg.captured_at = None;
                msg.captured_at_date = self.captured_at_date;
                msg.captured_at_time = self.captured_at_time;
                Ok(())
            }
            v => Err(StampError::UnsupportedVersion(v)),
        }
    }

    /// Write only the location into a message
    pub fn substitute_location(&self, msg: &mut TelecastMessage) -> Result<(), StampError> {
        match self.version {
            STAMP_VERSION_1 => {
                msg.latitude = self.latitude;
                msg.longitude = self.longitude;
                msg.altitude = self.altitude;
                Ok(())
            }
            v => Err(StampError::UnsupportedVersion(v)),
        }
    }
}

/// In-process view of one device's stamp
#[derive(Debug, Clone, PartialEq)]
pub struct StampCacheEntry {
    /// Last stamp contents known for the device
    pub file: StampFile,
    /// Whether `file` matches what is on disk
    pub valid: bool,
}

/// What the stamp step did to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampOutcome {
    /// No stamp fields; message untouched
    Unstamped,
    /// Set processed; `persisted` is false when the file write failed or the
    /// version is unknown
    Set {
        /// Stamp id that was set
        stamp: u32,
        /// Whether the cache now holds it
        persisted: bool,
    },
    /// Apply matched; metadata substituted exactly
    Applied {
        /// Stamp id applied
        stamp: u32,
    },
    /// Apply mismatched a present cache; location substituted, time is now
    Degraded {
        /// Stamp id the message asked for
        requested: u32,
        /// Stamp id the cache holds
        cached: u32,
    },
}

/// Per-device stamp cache backed by one JSON file per device
///
/// Owned by the consumer task; not shared.
#[derive(Debug)]
pub struct StampCache {
    dir: PathBuf,
    entries: HashMap<String, StampCacheEntry>,
}

impl StampCache {
    /// Create a cache over `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: HashMap::new(),
        }
    }

    /// Directory holding stamp files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached entry for a device
    pub fn entry(&self, device: &str) -> Option<&StampCacheEntry> {
        self.entries.get(device)
    }

    /// Run the stamp protocol on one message
    ///
    /// On success the stamp fields have been removed from `msg`.
    pub async fn process(
        &mut self,
        device: &str,
        msg: &mut TelecastMessage,
        now: DateTime<Utc>,
    ) -> Result<StampOutcome, StampError> {
        match (msg.stamp_version, msg.stamp) {
            (Some(version), Some(stamp)) => Ok(self.set(device, version, stamp, msg).await),
            (None, Some(stamp)) => self.apply(device, stamp, msg, now).await,
            _ => Ok(StampOutcome::Unstamped),
        }
    }

    async fn set(
        &mut self,
        device: &str,
        version: u32,
        stamp: u32,
        msg: &mut TelecastMessage,
    ) -> StampOutcome {
        if let Some(entry) = self.entries.get_mut(device) {
            entry.valid = false;
        }

        let persisted = match StampFile::capture(version, stamp, msg) {
            Ok(file) => match self.write(device, &file).await {
                Ok(()) => {
                    self.entries
                        .insert(device.to_string(), StampCacheEntry { file, valid: true });
                    true
                }
                Err(e) => {
                    log::warn!("stamp set failed device={device} stamp={stamp}: {e}");
                    false
                }
            },
            Err(e) => {
                log::warn!("stamp set ignored device={device} stamp={stamp}: {e}");
                false
            }
        };

        msg.strip_stamp();
        StampOutcome::Set { stamp, persisted }
    }

    async fn apply(
        &mut self,
        device: &str,
        stamp: u32,
        msg: &mut TelecastMessage,
        now: DateTime<Utc>,
    ) -> Result<StampOutcome, StampError> {
        let hit = matches!(
            self.entries.get(device),
            Some(entry) if entry.valid && entry.file.stamp == stamp
        );

        if !hit {
            match self.read(device).await {
                Ok(Some(file)) => {
                    self.entries
                        .insert(device.to_string(), StampCacheEntry { file, valid: true });
                }
                Ok(None) => {}
                Err(e) => log::warn!("stamp file unusable device={device}: {e}"),
            }
        }

        let unstampable = || StampError::Unstampable {
            device: device.to_string(),
            stamp,
        };

        let entry = match self.entries.get(device) {
            Some(entry) if entry.valid => entry,
            _ => return Err(unstampable()),
        };

        if entry.file.stamp == stamp {
            entry.file.substitute(msg).map_err(|_| unstampable())?;
            msg.strip_stamp();
            return Ok(StampOutcome::Applied { stamp });
        }

        // Known-stale cache: keep the coordinates, fabricate the time.
        entry.file.substitute_location(msg).map_err(|_| unstampable())?;
        msg.captured_at = Some(now.to_rfc3339());
        msg.captured_at_date = None;
        msg.captured_at_time = None;
        msg.captured_at_offset = None;
        msg.strip_stamp();

        log::info!(
            "stamp mismatch device={device} requested={stamp} cached={}; approximating",
            entry.file.stamp
        );
        Ok(StampOutcome::Degraded {
            requested: stamp,
            cached: entry.file.stamp,
        })
    }

    fn path_for(&self, device: &str) -> Result<PathBuf, StampError> {
        check_entity_id(device).map_err(|e| StampError::Io(e.to_string()))?;
        Ok(self.dir.join(format!("{device}.json")))
    }

    async fn write(&self, device: &str, file: &StampFile) -> Result<(), StampError> {
        let path = self.path_for(device)?;
        let body = serde_json::to_vec(file).map_err(|e| StampError::Io(e.to_string()))?;
        replace_file(&path, &body)
            .await
            .map_err(|e| StampError::Io(format!("{}: {e}", path.display())))
    }

    async fn read(&self, device: &str) -> Result<Option<StampFile>, StampError> {
        let path = self.path_for(device)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StampError::Io(format!("{}: {e}", path.display()))),
        };

        let file: StampFile =
            serde_json::from_slice(&bytes).map_err(|e| StampError::Corrupt(e.to_string()))?;
        match file.version {
            STAMP_VERSION_1 => Ok(Some(file)),
            v => Err(StampError::UnsupportedVersion(v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn set_message() -> TelecastMessage {
        TelecastMessage {
            device_id: Some(100),
            stamp_version: Some(1),
            stamp: Some(42),
            latitude: Some(37.5),
            longitude: Some(140.9),
            altitude: Some(12),
            captured_at_date: Some(170405),
            captured_at_time: Some(190807),
            cpm0: Some(30),
            ..Default::default()
        }
    }

    fn apply_message(stamp: u32) -> TelecastMessage {
        TelecastMessage {
            device_id: Some(100),
            stamp: Some(stamp),
            cpm0: Some(33),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn set_then_apply_substitutes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = StampCache::new(dir.path());

        let mut set = set_message();
        let outcome = cache.process("100", &mut set, now()).await.unwrap();
        assert_eq!(outcome, StampOutcome::Set { stamp: 42, persisted: true });
        assert_eq!((set.stamp, set.stamp_version), (None, None));
        assert!(cache.entry("100").unwrap().valid);

        let mut apply = apply_message(42);
        let outcome = cache.process("100", &mut apply, now()).await.unwrap();
        assert_eq!(outcome, StampOutcome::Applied { stamp: 42 });
        assert_eq!(apply.latitude, Some(37.5));
        assert_eq!(apply.longitude, Some(140.9));
        assert_eq!(
            apply.resolved_captured_at().unwrap().unwrap().to_rfc3339(),
            "2017-04-05T19:08:07+00:00"
        );
        assert_eq!(apply.stamp, None);
    }

    #[tokio::test]
    async fn apply_reloads_from_file_in_new_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = StampCache::new(dir.path());
        writer.process("100", &mut set_message(), now()).await.unwrap();

        let mut reader = StampCache::new(dir.path());
        let mut apply = apply_message(42);
        let outcome = reader.process("100", &mut apply, now()).await.unwrap();
        assert_eq!(outcome, StampOutcome::Applied { stamp: 42 });
        assert_eq!(apply.latitude, Some(37.5));
    }

    #[tokio::test]
    async fn mismatch_degrades_to_current_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = StampCache::new(dir.path());
        cache.process("100", &mut set_message(), now()).await.unwrap();

        let mut apply = apply_message(99);
        let outcome = cache.process("100", &mut apply, now()).await.unwrap();
        assert_eq!(outcome, StampOutcome::Degraded { requested: 99, cached: 42 });
        assert_eq!(apply.latitude, Some(37.5));
        assert_eq!(apply.resolved_captured_at().unwrap(), Some(now()));
    }

    #[tokio::test]
    async fn apply_without_any_stamp_is_unstampable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = StampCache::new(dir.path());

        let err = cache
            .process("100", &mut apply_message(42), now())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StampError::Unstampable {
                device: "100".into(),
                stamp: 42
            }
        );
    }

    #[tokio::test]
    async fn failed_write_leaves_entry_invalid() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the stamp directory should be.
        let blocked = dir.path().join("stamp");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let mut cache = StampCache::new(&blocked);
        let mut set = set_message();
        let outcome = cache.process("100", &mut set, now()).await.unwrap();
        assert_eq!(outcome, StampOutcome::Set { stamp: 42, persisted: false });
        assert!(cache.entry("100").is_none());
        assert_eq!(set.stamp, None);
    }

    #[tokio::test]
    async fn unknown_version_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = StampCache::new(dir.path());
        cache.process("100", &mut set_message(), now()).await.unwrap();

        let mut future = set_message();
        future.stamp_version = Some(7);
        future.stamp = Some(43);
        let outcome = cache.process("100", &mut future, now()).await.unwrap();
        assert_eq!(outcome, StampOutcome::Set { stamp: 43, persisted: false });
        assert!(!cache.entry("100").unwrap().valid);
        let raw = std::fs::read_to_string(dir.path().join("100.json")).unwrap();
        assert!(raw.contains("\"Stamp\":42"));
    }

    #[tokio::test]
    async fn stamp_file_uses_pascal_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = StampCache::new(dir.path());
        cache.process("100", &mut set_message(), now()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("100.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["Version"], 1);
        assert_eq!(json["Stamp"], 42);
        assert_eq!(json["CapturedAtDate"], 170405);
        assert_eq!(json["CapturedAtTime"], 190807);
        assert_eq!(json["Altitude"], 12);
    }

    #[tokio::test]
    async fn set_leaves_only_the_stamp_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = StampCache::new(dir.path());
        cache.process("100", &mut set_message(), now()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["100.json".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn readers_never_see_a_partial_stamp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("100.json");
        let mut cache = StampCache::new(dir.path());
        cache.process("100", &mut set_message(), now()).await.unwrap();

        let reader = tokio::spawn(async move {
            for _ in 0..500 {
                let raw = tokio::fs::read(&path).await.unwrap();
                serde_json::from_slice::<StampFile>(&raw).unwrap();
                tokio::task::yield_now().await;
            }
        });

        for stamp in 1..=200 {
            let mut set = set_message();
            set.stamp = Some(stamp);
            cache.process("100", &mut set, now()).await.unwrap();
        }
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn future_version_file_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("100.json"),
            r#"{"Version":2,"Stamp":42,"Latitude":1.0}"#,
        )
        .unwrap();

        let mut cache = StampCache::new(dir.path());
        assert!(matches!(
            cache.process("100", &mut apply_message(42), now()).await,
            Err(StampError::Unstampable { .. })
        ));
    }
}
