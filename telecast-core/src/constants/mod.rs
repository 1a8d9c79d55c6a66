//! Constants for Telecast Core
//!
//! Centralized defaults for every tunable in the pipeline. The collector's
//! configuration file overrides most of them; these are the values a fleet
//! runs with when the file says nothing.
//!
//! ## Organization
//!
//! - **Intake**: queue capacities and the dedup window
//! - **Store**: history depth and the reconcile retry budget
//! - **Time**: staleness thresholds and periodic task intervals

/// Intake queue and dedup parameters.
pub mod intake;

/// Reconciliation store parameters.
pub mod store;

/// Staleness thresholds and task intervals.
pub mod time;

pub use intake::{
    BROKER_QUEUE_CAPACITY, DEDUP_RING_CAPACITY, DEDUP_WINDOW_SECS, EXPORT_FAILURE_ALERT_THRESHOLD,
    EXPORT_TIMEOUT_SECS, HTTP_QUEUE_CAPACITY,
};
pub use store::{
    HISTORY_DEPTH, RECONCILE_JITTER_MAX_MS, RECONCILE_MAX_ATTEMPTS, RECONCILE_VERIFY_DELAY_MS,
};
pub use time::{
    DEVICE_STALE_AFTER_MINS, HEARTBEAT_INTERVAL_SECS, PEER_STALE_AFTER_MINS,
    STALENESS_SCAN_INTERVAL_SECS,
};
