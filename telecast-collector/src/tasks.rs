//! Periodic work outside the request path
//!
//! | Task | Cadence | Does |
//! |------|---------|------|
//! | staleness scan | `staleness.scan_interval_secs` | folds snapshot modification times into a tracker, sweeps it, delivers alerts |
//! | heartbeat | `server.heartbeat_secs` | reconciles this instance's `ServerStatus` with current counters |
//! | breaker watch | on trip | fails the runner so the process restarts |
//!
//! Scans are what let one instance alert on devices another instance heard:
//! every collector writes into the same snapshot directories.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use telecast_core::pipeline::SharedTracker;
use telecast_core::store::{EntityKind, ServerKind, ServerStatus};
use telecast_core::{
    AlertSink, Clock, IntakeQueue, PipelineStats, Reconciler, SharedClock, StalenessAlert,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One scan of `reconciler`'s directory folded into `tracker`
///
/// Returns the returned-after-absence alerts from the scan followed by the
/// unseen alerts from the sweep. A failed scan still sweeps, so live
/// observations keep alerting while the disk is unreadable.
pub async fn scan_once<K: EntityKind>(
    reconciler: &Reconciler<K>,
    tracker: &SharedTracker,
    now: DateTime<Utc>,
) -> Vec<StalenessAlert> {
    let scanned = match reconciler.scan().await {
        Ok(scanned) => scanned,
        Err(e) => {
            log::warn!("{} scan failed: {e}", reconciler.kind());
            Vec::new()
        }
    };

    match tracker.lock() {
        Ok(mut table) => {
            let mut alerts = table.refresh(&scanned, now);
            alerts.extend(table.sweep(now));
            alerts
        }
        Err(_) => {
            log::error!("{} staleness table poisoned", reconciler.kind());
            Vec::new()
        }
    }
}

async fn deliver(alerts: &Arc<dyn AlertSink>, alert: &StalenessAlert) {
    log::info!("{alert}");
    if let Err(e) = alerts.alert(&alert.to_string()).await {
        log::warn!("alert delivery failed: {e}");
    }
}

/// Scan on a fixed cadence until shutdown
pub async fn staleness_scan<K: EntityKind>(
    reconciler: Reconciler<K>,
    tracker: SharedTracker,
    alerts: Arc<dyn AlertSink>,
    clock: SharedClock,
    every: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("{} staleness scan every {every:?}", reconciler.kind());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for alert in scan_once(&reconciler, &tracker, clock.now()).await {
                    deliver(&alerts, &alert).await;
                }
            }
        }
    }
    Ok(())
}

/// Writes this instance's server snapshot
pub struct Heartbeat {
    reconciler: Reconciler<ServerKind>,
    instance_id: String,
    started_at: DateTime<Utc>,
    pipeline: Arc<PipelineStats>,
    queue: IntakeQueue,
}

impl Heartbeat {
    /// Heartbeat for `instance_id`, started now
    pub fn new(
        reconciler: Reconciler<ServerKind>,
        instance_id: impl Into<String>,
        started_at: DateTime<Utc>,
        pipeline: Arc<PipelineStats>,
        queue: IntakeQueue,
    ) -> Self {
        Self {
            reconciler,
            instance_id: instance_id.into(),
            started_at,
            pipeline,
            queue,
        }
    }

    /// Status to reconcile at `now`
    pub fn status(&self, now: DateTime<Utc>) -> ServerStatus {
        ServerStatus {
            instance_id: Some(self.instance_id.clone()),
            started_at: Some(self.started_at),
            last_heartbeat: Some(now),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            pipeline: Some(self.pipeline.counters()),
            queue: Some(self.queue.counters()),
        }
    }

    /// Reconcile one heartbeat
    pub async fn beat(&self, now: DateTime<Utc>) -> Result<(), telecast_core::StoreError> {
        self.reconciler
            .reconcile(&self.instance_id, self.status(now), None)
            .await
            .map(|_| ())
    }
}

/// Heartbeat on a fixed cadence until shutdown; failures are logged
pub async fn heartbeat(
    heartbeat: Heartbeat,
    clock: SharedClock,
    every: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = heartbeat.beat(clock.now()).await {
                    log::warn!("heartbeat for {} failed: {e}", heartbeat.instance_id);
                }
            }
        }
    }
    Ok(())
}

/// Fail as soon as the intake breaker trips
pub async fn watch_breaker(queue: IntakeQueue, shutdown: CancellationToken) -> anyhow::Result<()> {
    let fault = queue.breaker().fault();
    tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        _ = fault.cancelled() => {
            let counters = queue.counters();
            Err(anyhow::anyhow!(
                "intake queue saturated at capacity {} (high water {}, {} rejected)",
                counters.capacity,
                counters.high_water,
                counters.rejected
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use telecast_core::store::{MemoryBackend, ReconcilePolicy, SnapshotBackend};
    use telecast_core::time::FixedClock;
    use telecast_core::{intake_channel, GatewayHints, IncomingRequest, StalenessTracker};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn heartbeat_writes_counters() {
        let clock = FixedClock::new(t0());
        let backend: Arc<dyn SnapshotBackend> = Arc::new(MemoryBackend::new(Arc::new(clock.clone())));
        let reconciler =
            Reconciler::<ServerKind>::new(backend, Arc::new(clock.clone()), ReconcilePolicy::immediate());
        let (queue, _rx) = intake_channel(10);

        let beat = Heartbeat::new(
            reconciler.clone(),
            "collector-a",
            t0(),
            Arc::new(PipelineStats::default()),
            queue,
        );
        clock.advance(chrono::Duration::seconds(60));
        beat.beat(clock.now()).await.unwrap();

        let snapshot = reconciler.load("collector-a").await.unwrap();
        assert_eq!(snapshot.current.instance_id.as_deref(), Some("collector-a"));
        assert_eq!(snapshot.current.started_at, Some(t0()));
        assert_eq!(
            snapshot.current.last_heartbeat,
            Some(t0() + chrono::Duration::seconds(60))
        );
        assert_eq!(snapshot.current.queue.map(|q| q.capacity), Some(10));
    }

    #[tokio::test]
    async fn peer_going_quiet_is_reported_once() {
        let clock = FixedClock::new(t0());
        let backend: Arc<dyn SnapshotBackend> = Arc::new(MemoryBackend::new(Arc::new(clock.clone())));
        let servers =
            Reconciler::<ServerKind>::new(backend, Arc::new(clock.clone()), ReconcilePolicy::immediate());
        servers
            .reconcile("peer-b", ServerStatus::default(), None)
            .await
            .unwrap();

        let tracker: SharedTracker = Arc::new(Mutex::new(StalenessTracker::new(
            "server",
            chrono::Duration::minutes(10),
        )));
        assert!(scan_once(&servers, &tracker, clock.now()).await.is_empty());

        clock.advance(chrono::Duration::minutes(11));
        let alerts = scan_once(&servers, &tracker, clock.now()).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].to_string(), "server peer-b has not been seen for 11m");
        assert!(scan_once(&servers, &tracker, clock.now()).await.is_empty());
    }

    #[tokio::test]
    async fn breaker_trip_fails_the_watch() {
        let (queue, _rx) = intake_channel(1);
        let watch = tokio::spawn(watch_breaker(queue.clone(), CancellationToken::new()));

        let request = IncomingRequest {
            payload: vec![0x08, 0x01],
            transport: "device-udp:192.0.2.1".into(),
            received_at: t0(),
            hints: GatewayHints::default(),
            sequence: 0,
        };
        queue.enqueue(request).await.unwrap();

        let err = watch.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("capacity 1"));
    }

    #[tokio::test]
    async fn watch_ends_quietly_on_shutdown() {
        let (queue, _rx) = intake_channel(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(watch_breaker(queue, shutdown).await.is_ok());
    }
}
