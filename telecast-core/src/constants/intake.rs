//! Intake Queue and Dedup Parameters

// ===== QUEUE CAPACITIES =====

/// Intake queue capacity when the collector fronts an HTTP load balancer.
///
/// HTTP uploads arrive in bursts behind the balancer and each handler is
/// cheap to park, so the queue is sized generously.
pub const HTTP_QUEUE_CAPACITY: usize = 100;

/// Intake queue capacity when the collector drains a broker subscription.
///
/// The broker already buffers; a deep local queue would only hide a stuck
/// consumer for longer.
pub const BROKER_QUEUE_CAPACITY: usize = 25;

// ===== DEDUP =====

/// Number of recent checksums remembered.
pub const DEDUP_RING_CAPACITY: usize = 25;

/// Seconds within which a repeated checksum is the same transmission.
pub const DEDUP_WINDOW_SECS: i64 = 60;

// ===== EXPORT =====

/// Hard deadline on one outbound export call.
pub const EXPORT_TIMEOUT_SECS: u64 = 10;

/// Consecutive export failures that raise one alert.
pub const EXPORT_FAILURE_ALERT_THRESHOLD: u32 = 5;
