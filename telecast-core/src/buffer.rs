//! Fixed-Size History Ring
//!
//! ## Overview
//!
//! Snapshots keep the last few changes of each tracked category. The ring is
//! stored newest first, because that is the order readers want and the order
//! the JSON files have always used:
//!
//! ```text
//! push(F) onto [E, D, C, B, A]  (full, N = 5)
//!
//!   before: ┌───┬───┬───┬───┬───┐      after: ┌───┬───┬───┬───┬───┐
//!           │ E │ D │ C │ B │ A │             │ F │ E │ D │ C │ B │
//!           └───┴───┴───┴───┴───┘             └───┴───┴───┴───┴───┘
//!                               ↑ dropped
//! ```
//!
//! ## Why `heapless::Vec`?
//!
//! The capacity is a property of the snapshot format, not of runtime load, so
//! it belongs in the type. A ring read from a file written by a build with a
//! deeper history is truncated on load rather than rejected; snapshot files
//! must stay readable across fleet upgrades.

use heapless::Vec as BoundedVec;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::HISTORY_DEPTH;

/// Bounded newest-first list of past values
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRing<T, const N: usize = HISTORY_DEPTH> {
    entries: BoundedVec<T, N>,
}

impl<T, const N: usize> HistoryRing<T, N> {
    /// Create an empty ring
    pub const fn new() -> Self {
        Self {
            entries: BoundedVec::new(),
        }
    }

    /// Insert at the front, discarding the oldest entry when full
    pub fn push(&mut self, value: T) {
        if N == 0 {
            return;
        }
        if self.entries.is_full() {
            self.entries.pop();
        }
        // Cannot fail: a slot was freed above.
        let _ = self.entries.insert(0, value);
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&T> {
        self.entries.first()
    }

    /// Entries, newest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Build from entries already in newest-first order, keeping the first `N`
    pub fn from_newest_first<I: IntoIterator<Item = T>>(items: I) -> Self {
        let mut entries = BoundedVec::new();
        for item in items.into_iter().take(N) {
            let _ = entries.push(item);
        }
        Self { entries }
    }
}

impl<T, const N: usize> Default for HistoryRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize, const N: usize> Serialize for HistoryRing<T, N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de, T: Deserialize<'de>, const N: usize> Deserialize<'de> for HistoryRing<T, N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(Self::from_newest_first(items))
    }
}
