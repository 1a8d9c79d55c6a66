//! Lock-Free Reconciliation Store
//!
//! ## Overview
//!
//! Every collector in the fleet keeps the same per-entity snapshot files up
//! to date: a device heard through two load-balanced collectors is reconciled
//! by both. There is no shared lock service, so each write follows an
//! optimistic cycle and relies on the merge being additive and idempotent:
//!
//! ```text
//!  jitter ──→ read ──→ merge ──→ push history ──→ write ──→ sleep ──→ verify
//!               ↑                                                      │
//!               └─────────────── file empty or unparsable ─────────────┘
//! ```
//!
//! A snapshot that fails to parse is treated as empty rather than as an
//! error; the usual cause is two writers interleaving, and the next merge
//! rebuilds it.
//!
//! ## One Engine, Four Kinds
//!
//! The merge, history and verify logic is written once, generic over an
//! [`EntityKind`] that names the record type, the directory, and which
//! categories keep history:
//!
//! | Kind              | Directory | Record           | History categories            |
//! |-------------------|-----------|------------------|-------------------------------|
//! | [`DeviceKind`]    | `device`  | `SensorRecord`   | location, geiger, pms, opc    |
//! | [`AggregateKind`] | `value`   | `SensorRecord`   | location, geiger, pms, opc    |
//! | [`GatewayKind`]   | `gateway` | [`GatewayStatus`]| location                      |
//! | [`ServerKind`]    | `server`  | [`ServerStatus`] | none                          |
//!
//! ## Snapshot File
//!
//! ```json
//! {
//!   "current": { "device_id": 100, "loc": { "lat": 37.5, "lon": 140.9 } },
//!   "location_history": [ { "entity_id": "100", "changed_at": "…", "loc": { … } } ],
//!   "geiger_history": [],
//!   "pms_history": [],
//!   "opc_history": [],
//!   "origin": { "transport": "device-udp:10.0.0.5", "address": "10.0.0.5" },
//!   "updated_at": "…"
//! }
//! ```

mod backend;
mod file;
mod kinds;
mod lanes;
mod memory;
pub(crate) mod merge;

pub use backend::{check_entity_id, SnapshotBackend, SnapshotMeta};
pub use file::FileBackend;
pub(crate) use file::replace_file;
pub use kinds::{
    AggregateKind, DeviceKind, GatewayKind, GatewayStatus, ServerKind, ServerStatus,
};
pub use memory::MemoryBackend;
pub use merge::Overlay;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::buffer::HistoryRing;
use crate::constants::{RECONCILE_JITTER_MAX_MS, RECONCILE_MAX_ATTEMPTS, RECONCILE_VERIFY_DELAY_MS};
use crate::errors::{StoreError, StoreResult};
use crate::time::SharedClock;
use lanes::WriteLanes;

/// State category that keeps a history ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Position
    Location,
    /// Geiger tube counts
    Geiger,
    /// Particulate family A
    Pms,
    /// Particulate family B
    Opc,
}

impl Category {
    /// All categories, in snapshot order
    pub const ALL: [Category; 4] = [
        Category::Location,
        Category::Geiger,
        Category::Pms,
        Category::Opc,
    ];
}

/// A record type the store can merge partial updates into
pub trait Mergeable:
    Clone + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Copy every field present in `update` over `self`
    fn overlay(&mut self, update: &Self);

    /// A copy holding only the fields of `category`
    fn project(&self, category: Category) -> Self;
}

/// Describes one kind of reconciled entity
pub trait EntityKind: Send + Sync + 'static {
    /// Record type of the `current` block
    type Current: Mergeable;

    /// Directory name and log label
    const NAME: &'static str;

    /// Categories whose changes are kept in history
    const CATEGORIES: &'static [Category];

    /// Shape an update before merging
    fn prepare(update: Self::Current) -> Self::Current {
        update
    }
}

/// One past state of a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Mergeable")]
pub struct HistoryEntry<T> {
    /// Entity the change belongs to
    pub entity_id: String,
    /// When the change was merged
    pub changed_at: DateTime<Utc>,
    /// The category's fields after the change
    #[serde(flatten)]
    pub values: T,
}

/// Where the most recent update came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportOrigin {
    /// Transport label, e.g. `device-udp:10.0.0.5`
    pub transport: String,
    /// Peer address part of the label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Location label supplied by the gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Gateway-supplied latitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f32>,
    /// Gateway-supplied longitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f32>,
}

impl TransportOrigin {
    /// Origin from a transport label; the address is the part after the first `:`
    pub fn from_transport(transport: &str) -> Self {
        let address = transport
            .split_once(':')
            .map(|(_, addr)| addr.to_string())
            .filter(|addr| !addr.is_empty());
        Self {
            transport: transport.to_string(),
            address,
            ..Default::default()
        }
    }
}

/// Persisted state of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Mergeable")]
pub struct EntitySnapshot<T> {
    /// Latest known value of every field
    #[serde(default)]
    pub current: T,
    /// Location changes, newest first
    #[serde(default)]
    pub location_history: HistoryRing<HistoryEntry<T>>,
    /// Geiger changes, newest first
    #[serde(default)]
    pub geiger_history: HistoryRing<HistoryEntry<T>>,
    /// PMS changes, newest first
    #[serde(default)]
    pub pms_history: HistoryRing<HistoryEntry<T>>,
    /// OPC changes, newest first
    #[serde(default)]
    pub opc_history: HistoryRing<HistoryEntry<T>>,
    /// Transport of the latest update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<TransportOrigin>,
    /// When the snapshot was last merged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T: Mergeable> Default for EntitySnapshot<T> {
    fn default() -> Self {
        Self {
            current: T::default(),
            location_history: HistoryRing::new(),
            geiger_history: HistoryRing::new(),
            pms_history: HistoryRing::new(),
            opc_history: HistoryRing::new(),
            origin: None,
            updated_at: None,
        }
    }
}

impl<T: Mergeable> EntitySnapshot<T> {
    /// History ring for one category
    pub fn history(&self, category: Category) -> &HistoryRing<HistoryEntry<T>> {
        match category {
            Category::Location => &self.location_history,
            Category::Geiger => &self.geiger_history,
            Category::Pms => &self.pms_history,
            Category::Opc => &self.opc_history,
        }
    }

    fn history_mut(&mut self, category: Category) -> &mut HistoryRing<HistoryEntry<T>> {
        match category {
            Category::Location => &mut self.location_history,
            Category::Geiger => &mut self.geiger_history,
            Category::Pms => &mut self.pms_history,
            Category::Opc => &mut self.opc_history,
        }
    }

    /// Merge an update and record history for every tracked category it changed
    ///
    /// Returns the categories that changed.
    pub fn merge(
        &mut self,
        entity_id: &str,
        update: &T,
        tracked: &[Category],
        at: DateTime<Utc>,
    ) -> Vec<Category> {
        let before: Vec<T> = tracked.iter().map(|c| self.current.project(*c)).collect();
        self.current.overlay(update);

        let mut changed = Vec::new();
        for (&category, previous) in tracked.iter().zip(before) {
            let now = self.current.project(category);
            if now != previous {
                self.history_mut(category).push(HistoryEntry {
                    entity_id: entity_id.to_string(),
                    changed_at: at,
                    values: now,
                });
                changed.push(category);
            }
        }

        self.updated_at = Some(at);
        changed
    }
}

/// Timing of the optimistic write cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Upper bound of the random pre-read delay
    pub jitter_max: StdDuration,
    /// Pause between write and verification read
    pub verify_delay: StdDuration,
    /// Cycles before giving up
    pub max_attempts: u32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            jitter_max: StdDuration::from_millis(RECONCILE_JITTER_MAX_MS),
            verify_delay: StdDuration::from_millis(RECONCILE_VERIFY_DELAY_MS),
            max_attempts: RECONCILE_MAX_ATTEMPTS,
        }
    }
}

impl ReconcilePolicy {
    /// No delays; for tests and in-memory stores
    pub fn immediate() -> Self {
        Self {
            jitter_max: StdDuration::ZERO,
            verify_delay: StdDuration::ZERO,
            ..Default::default()
        }
    }
}

/// Read-merge-write-verify engine for one entity kind
///
/// Clones share one set of write lanes, so [`Reconciler::reconcile_in_order`]
/// orders updates across every clone.
pub struct Reconciler<K: EntityKind> {
    backend: Arc<dyn SnapshotBackend>,
    clock: SharedClock,
    policy: ReconcilePolicy,
    lanes: WriteLanes,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EntityKind> Clone for Reconciler<K> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            policy: self.policy,
            lanes: self.lanes.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: EntityKind> Reconciler<K> {
    /// Reconciler over a shared backend
    pub fn new(backend: Arc<dyn SnapshotBackend>, clock: SharedClock, policy: ReconcilePolicy) -> Self {
        Self {
            backend,
            clock,
            policy,
            lanes: WriteLanes::default(),
            _kind: PhantomData,
        }
    }

    /// Kind name, also the storage directory
    pub fn kind(&self) -> &'static str {
        K::NAME
    }

    /// Merge a partial update into the entity's snapshot
    ///
    /// Returns the snapshot as written and verified. Gives up with
    /// [`StoreError::Unconverged`] after `max_attempts` failed cycles.
    pub async fn reconcile(
        &self,
        id: &str,
        update: K::Current,
        origin: Option<TransportOrigin>,
    ) -> StoreResult<EntitySnapshot<K::Current>> {
        check_entity_id(id)?;
        let update = K::prepare(update);
        self.jitter().await;

        for attempt in 1..=self.policy.max_attempts {
            let mut snapshot = match self.load(id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::warn!("{} {id} read failed (attempt {attempt}): {e}", K::NAME);
                    continue;
                }
            };
            snapshot.merge(id, &update, K::CATEGORIES, self.clock.now());
            if let Some(origin) = &origin {
                snapshot.origin = Some(origin.clone());
            }

            let body = serde_json::to_vec_pretty(&snapshot)
                .map_err(|e| StoreError::Serialize(e.to_string()))?;

            if let Err(e) = self.backend.write(K::NAME, id, &body).await {
                log::warn!("{} {id} write failed (attempt {attempt}): {e}", K::NAME);
                continue;
            }

            if !self.policy.verify_delay.is_zero() {
                tokio::time::sleep(self.policy.verify_delay).await;
            }

            if self.verify(id).await {
                return Ok(snapshot);
            }
            log::warn!("{} {id} failed verification (attempt {attempt}), re-merging", K::NAME);
        }

        Err(StoreError::Unconverged {
            kind: K::NAME,
            id: id.to_string(),
            attempts: self.policy.max_attempts,
        })
    }

    /// [`Reconciler::reconcile`], queued behind every earlier call for `id`
    ///
    /// The place in line is taken when this is called, not when the returned
    /// future is first polled, so futures spawned in call order apply their
    /// updates in call order.
    pub fn reconcile_in_order(
        &self,
        id: String,
        update: K::Current,
        origin: Option<TransportOrigin>,
    ) -> impl Future<Output = StoreResult<EntitySnapshot<K::Current>>> + Send + 'static {
        let store = self.clone();
        let mut ticket = self.lanes.ticket(&id);
        async move {
            ticket.wait().await;
            store.reconcile(&id, update, origin).await
        }
    }

    /// Current snapshot, or the default when absent or unparsable
    pub async fn load(&self, id: &str) -> StoreResult<EntitySnapshot<K::Current>> {
        let Some(bytes) = self.backend.read(K::NAME, id).await? else {
            return Ok(EntitySnapshot::default());
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                log::warn!("{} {id} snapshot unreadable, starting fresh: {e}", K::NAME);
                Ok(EntitySnapshot::default())
            }
        }
    }

    /// Ids and modification times of every snapshot of this kind
    pub async fn scan(&self) -> StoreResult<Vec<SnapshotMeta>> {
        self.backend.list(K::NAME).await
    }

    async fn verify(&self, id: &str) -> bool {
        match self.backend.read(K::NAME, id).await {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                serde_json::from_slice::<EntitySnapshot<K::Current>>(&bytes).is_ok()
            }
            _ => false,
        }
    }

    async fn jitter(&self) {
        let max = self.policy.jitter_max.as_millis() as u64;
        if max == 0 {
            return;
        }
        let delay = rand::thread_rng().gen_range(0..=max);
        tokio::time::sleep(StdDuration::from_millis(delay)).await;
    }
}
