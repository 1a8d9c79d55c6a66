//! Reconciliation Store Parameters

/// Slots per category history ring, newest first.
pub const HISTORY_DEPTH: usize = 5;

/// Upper bound of the random pre-read delay.
///
/// Spreads concurrent writers for one entity across a window long enough
/// that most never overlap a read-modify-write cycle.
pub const RECONCILE_JITTER_MAX_MS: u64 = 250;

/// Pause between writing a snapshot and re-reading it for verification.
pub const RECONCILE_VERIFY_DELAY_MS: u64 = 50;

/// Read-merge-write-verify cycles before giving up on one update.
pub const RECONCILE_MAX_ATTEMPTS: u32 = 8;
