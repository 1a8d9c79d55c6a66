//! Staleness tracking with one-shot alerts
//!
//! Each tracker watches one population (devices, gateways, peer servers). It
//! is fed from two directions: live `observe` calls from the pipeline, and
//! periodic `refresh` calls with snapshot modification times, which is how a
//! collector learns about entities another instance heard.
//!
//! ```text
//!            seen within threshold                  threshold elapsed
//!  (new) ──────────────────────────→ recent ─────────────────────────→ notified
//!                                      ↑          Unseen alert (once)    │
//!                                      └─────────────────────────────────┘
//!                                           seen again: Returned alert
//! ```
//!
//! An entity that has not been seen recently since the tracker started never
//! alerts; a restart must not page for every long-dead device on disk.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::store::SnapshotMeta;

/// Last-seen state of one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenRecord {
    /// Most recent sighting
    pub last_seen: DateTime<Utc>,
    /// Seen within the threshold at least once while tracked
    pub ever_recently_seen: bool,
    /// An unseen alert is outstanding for the current absence
    pub notified: bool,
}

/// Transition worth telling someone about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StalenessAlert {
    /// Crossed the threshold
    Unseen {
        /// Population label, e.g. `device`
        label: String,
        /// Entity id
        id: String,
        /// Time since last sighting
        away: Duration,
    },
    /// Seen again after an unseen alert
    Returned {
        /// Population label
        label: String,
        /// Entity id
        id: String,
        /// Length of the absence
        away: Duration,
    },
}

impl fmt::Display for StalenessAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StalenessAlert::Unseen { label, id, away } => {
                write!(f, "{label} {id} has not been seen for {}", format_span(*away))
            }
            StalenessAlert::Returned { label, id, away } => {
                write!(f, "{label} {id} is back after {}", format_span(*away))
            }
        }
    }
}

/// Render a duration as `1h 5m`, `12m` or `40s`
pub fn format_span(span: Duration) -> String {
    let secs = span.num_seconds().max(0);
    let (hours, mins) = (secs / 3600, (secs % 3600) / 60);
    match (hours, mins) {
        (0, 0) => format!("{secs}s"),
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

/// Last-seen table for one population
#[derive(Debug, Clone)]
pub struct StalenessTracker {
    label: String,
    threshold: Duration,
    records: HashMap<String, SeenRecord>,
}

impl StalenessTracker {
    /// Track a population, alerting after `threshold` without a sighting
    pub fn new(label: impl Into<String>, threshold: Duration) -> Self {
        Self {
            label: label.into(),
            threshold,
            records: HashMap::new(),
        }
    }

    /// Population label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Record for one entity
    pub fn record(&self, id: &str) -> Option<&SeenRecord> {
        self.records.get(id)
    }

    /// Number of tracked entities
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Note a sighting at `seen_at`
    ///
    /// Returns a [`StalenessAlert::Returned`] if the entity was flagged unseen.
    pub fn observe(&mut self, id: &str, seen_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<StalenessAlert> {
        let recent = now - seen_at < self.threshold;
        let Some(record) = self.records.get_mut(id) else {
            self.records.insert(
                id.to_string(),
                SeenRecord {
                    last_seen: seen_at,
                    ever_recently_seen: recent,
                    notified: false,
                },
            );
            return None;
        };

        if seen_at <= record.last_seen {
            return None;
        }

        let away = seen_at - record.last_seen;
        record.last_seen = seen_at;
        record.ever_recently_seen |= recent;

        if record.notified {
            record.notified = false;
            return Some(StalenessAlert::Returned {
                label: self.label.clone(),
                id: id.to_string(),
                away,
            });
        }
        None
    }

    /// Fold in a directory scan
    pub fn refresh(&mut self, scanned: &[SnapshotMeta], now: DateTime<Utc>) -> Vec<StalenessAlert> {
        scanned
            .iter()
            .filter_map(|meta| self.observe(&meta.id, meta.modified, now))
            .collect()
    }

    /// Flag entities whose absence crossed the threshold, once per absence
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<StalenessAlert> {
        let mut alerts = Vec::new();
        for (id, record) in self.records.iter_mut() {
            let away = now - record.last_seen;
            if record.notified || !record.ever_recently_seen || away < self.threshold {
                continue;
            }
            record.notified = true;
            alerts.push(StalenessAlert::Unseen {
                label: self.label.clone(),
                id: id.clone(),
                away,
            });
        }
        alerts.sort_by(|a, b| alert_id(a).cmp(alert_id(b)));
        alerts
    }
}

fn alert_id(alert: &StalenessAlert) -> &str {
    match alert {
        StalenessAlert::Unseen { id, .. } | StalenessAlert::Returned { id, .. } => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(mins: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::minutes(mins)
    }

    fn tracker() -> StalenessTracker {
        StalenessTracker::new("device", Duration::minutes(90))
    }

    #[test]
    fn one_alert_per_absence() {
        let mut tracker = tracker();
        tracker.observe("100", t(0), t(0));

        assert!(tracker.sweep(t(89)).is_empty());
        let alerts = tracker.sweep(t(90));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].to_string(), "device 100 has not been seen for 1h 30m");
        assert!(tracker.sweep(t(200)).is_empty());
    }

    #[test]
    fn return_reports_absence_once() {
        let mut tracker = tracker();
        tracker.observe("100", t(0), t(0));
        tracker.sweep(t(120));

        let back = tracker.observe("100", t(125), t(125)).unwrap();
        assert_eq!(
            back,
            StalenessAlert::Returned {
                label: "device".into(),
                id: "100".into(),
                away: Duration::minutes(125)
            }
        );
        assert!(tracker.observe("100", t(126), t(126)).is_none());
        assert!(!tracker.record("100").unwrap().notified);
    }

    #[test]
    fn seen_without_alert_stays_quiet() {
        let mut tracker = tracker();
        tracker.observe("100", t(0), t(0));
        assert!(tracker.observe("100", t(30), t(30)).is_none());
    }

    #[test]
    fn long_dead_entities_never_alert() {
        let mut tracker = tracker();
        let scanned = vec![SnapshotMeta {
            id: "ancient".into(),
            modified: t(0),
        }];
        assert!(tracker.refresh(&scanned, t(10_000)).is_empty());
        assert!(tracker.sweep(t(10_000)).is_empty());
    }

    #[test]
    fn scan_feeds_sightings() {
        let mut tracker = tracker();
        let scanned = vec![SnapshotMeta {
            id: "peer-heard".into(),
            modified: t(0),
        }];
        tracker.refresh(&scanned, t(1));
        assert_eq!(tracker.sweep(t(91)).len(), 1);
    }

    #[test]
    fn stale_sighting_is_ignored() {
        let mut tracker = tracker();
        tracker.observe("100", t(50), t(50));
        tracker.observe("100", t(10), t(50));
        assert_eq!(tracker.record("100").unwrap().last_seen, t(50));
    }

    #[test]
    fn span_formatting() {
        assert_eq!(format_span(Duration::seconds(40)), "40s");
        assert_eq!(format_span(Duration::minutes(12)), "12m");
        assert_eq!(format_span(Duration::hours(2)), "2h");
        assert_eq!(format_span(Duration::minutes(65)), "1h 5m");
    }
}
