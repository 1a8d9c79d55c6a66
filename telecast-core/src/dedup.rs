//! Duplicate Suppression Across Redundant Paths
//!
//! ## Overview
//!
//! One transmission can reach the fleet several times: through two gateways,
//! through different mesh relays, or replayed by a device that never saw its
//! acknowledgement. Every copy hashes to the same checksum once relay hops are
//! cleared (see `TelecastMessage::dedup_checksum`), so a short recency cache
//! of checksums is enough to drop the repeats.
//!
//! ```text
//! checksum ──→ scan ring ──┬─ hit, age < window ──→ Duplicate (debug log only)
//!                          └─ miss or stale    ──→ insert at front, Fresh
//! ```
//!
//! The ring is owned by the single consumer task and needs no lock.

use chrono::{DateTime, Duration, Utc};
use heapless::Vec as BoundedVec;

use crate::constants::{DEDUP_RING_CAPACITY, DEDUP_WINDOW_SECS};

/// One remembered checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupEntry {
    /// CRC32 of the relay-stripped message
    pub checksum: u32,
    /// When it was first accepted
    pub seen_at: DateTime<Utc>,
}

/// Verdict for one checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// First sighting within the window; now remembered
    Fresh,
    /// Seen within the window
    Duplicate {
        /// How long ago the first copy arrived
        age: Duration,
    },
}

/// Fixed-capacity recency cache, newest first
#[derive(Debug, Clone)]
pub struct DedupRing<const N: usize = DEDUP_RING_CAPACITY> {
    entries: BoundedVec<DedupEntry, N>,
    window: Duration,
}

impl Default for DedupRing {
    fn default() -> Self {
        Self::new(Duration::seconds(DEDUP_WINDOW_SECS))
    }
}

impl<const N: usize> DedupRing<N> {
    /// Create an empty ring with the given dedup window
    pub fn new(window: Duration) -> Self {
        Self {
            entries: BoundedVec::new(),
            window,
        }
    }

    /// Check a checksum and remember it if fresh
    pub fn check(&mut self, checksum: u32, now: DateTime<Utc>) -> DedupVerdict {
        let hit = self
            .entries
            .iter()
            .find(|e| e.checksum == checksum && now - e.seen_at < self.window);

        if let Some(entry) = hit {
            return DedupVerdict::Duplicate {
                age: now - entry.seen_at,
            };
        }

        if N > 0 {
            if self.entries.is_full() {
                self.entries.pop();
            }
            // Cannot fail: a slot was freed above.
            let _ = self.entries.insert(
                0,
                DedupEntry {
                    checksum,
                    seen_at: now,
                },
            );
        }
        DedupVerdict::Fresh
    }

    /// Entries, newest first
    pub fn entries(&self) -> &[DedupEntry] {
        &self.entries
    }

    /// Number of remembered checksums
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is remembered yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn repeat_within_window_is_duplicate() {
        let mut ring: DedupRing = DedupRing::default();
        assert_eq!(ring.check(0xDEADBEEF, t0()), DedupVerdict::Fresh);
        assert_eq!(
            ring.check(0xDEADBEEF, t0() + Duration::seconds(59)),
            DedupVerdict::Duplicate {
                age: Duration::seconds(59)
            }
        );
    }

    #[test]
    fn repeat_after_window_is_fresh() {
        let mut ring: DedupRing = DedupRing::default();
        ring.check(7, t0());
        assert_eq!(ring.check(7, t0() + Duration::seconds(60)), DedupVerdict::Fresh);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.entries()[0].seen_at, t0() + Duration::seconds(60));
    }

    #[test]
    fn oldest_falls_off_full_ring() {
        let mut ring: DedupRing<3> = DedupRing::new(Duration::seconds(60));
        for checksum in 1..=4 {
            ring.check(checksum, t0());
        }
        let held: Vec<u32> = ring.entries().iter().map(|e| e.checksum).collect();
        assert_eq!(held, vec![4, 3, 2]);

        // Evicted before its window expired; counts as fresh again.
        assert_eq!(ring.check(1, t0()), DedupVerdict::Fresh);
    }

    #[test]
    fn duplicates_are_not_reinserted() {
        let mut ring: DedupRing = DedupRing::default();
        ring.check(5, t0());
        ring.check(5, t0() + Duration::seconds(1));
        ring.check(5, t0() + Duration::seconds(2));
        assert_eq!(ring.len(), 1);
    }
}
