//! Staleness Thresholds and Task Intervals

/// Minutes without a reading before a device is reported unseen.
pub const DEVICE_STALE_AFTER_MINS: i64 = 90;

/// Minutes without a heartbeat before a gateway or peer server is reported.
pub const PEER_STALE_AFTER_MINS: i64 = 10;

/// Seconds between snapshot directory scans.
pub const STALENESS_SCAN_INTERVAL_SECS: u64 = 60;

/// Seconds between server heartbeat reconciles.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;
