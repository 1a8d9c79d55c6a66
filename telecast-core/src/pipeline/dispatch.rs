//! Fire-and-forget fan-out of accepted outcomes

use std::sync::Arc;

use telecast_schemas::SensorRecord;
use tokio_util::task::TaskTracker;

use super::{PipelineStats, SharedTracker};
use crate::normalizer::Outcome;
use crate::request::IncomingRequest;
use crate::sink::{AlertSink, CommandMessage, CommandSink, ExportChannel};
use crate::staleness::StalenessAlert;
use crate::store::{
    AggregateKind, DeviceKind, EntityKind, GatewayKind, GatewayStatus, Reconciler, TransportOrigin,
};
use crate::time::SharedClock;

/// Spawns store writes, exports and command deliveries for each outcome
pub struct Dispatcher {
    pub(super) devices: Reconciler<DeviceKind>,
    pub(super) values: Reconciler<AggregateKind>,
    pub(super) gateways: Reconciler<GatewayKind>,
    pub(super) exports: Arc<[ExportChannel]>,
    pub(super) commands: Arc<dyn CommandSink>,
    pub(super) alerts: Arc<dyn AlertSink>,
    pub(super) device_seen: SharedTracker,
    pub(super) gateway_seen: SharedTracker,
    pub(super) clock: SharedClock,
    pub(super) stats: Arc<PipelineStats>,
    pub(super) tasks: TaskTracker,
}

impl Dispatcher {
    /// Pipeline counters
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Device staleness table
    pub fn device_tracker(&self) -> &SharedTracker {
        &self.device_seen
    }

    /// Gateway staleness table
    pub fn gateway_tracker(&self) -> &SharedTracker {
        &self.gateway_seen
    }

    /// Alert sink shared with periodic tasks
    pub fn alerts(&self) -> &Arc<dyn AlertSink> {
        &self.alerts
    }

    /// Dispatches still running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Fan out every outcome of one request
    pub fn dispatch(&self, request: &IncomingRequest, outcomes: &[Outcome]) {
        for outcome in outcomes {
            match outcome {
                Outcome::Accepted(record) => self.accept(request, record),
                Outcome::Command(command) => self.command(command.clone()),
                Outcome::Duplicate { .. } | Outcome::Rejected { .. } => {}
            }
        }
    }

    fn accept(&self, request: &IncomingRequest, record: &SensorRecord) {
        let Some(device) = record.entity_id() else {
            return;
        };

        let now = self.clock.now();
        if let Some(alert) = observe(&self.device_seen, &device, request.received_at, now) {
            self.notify(alert);
        }

        let mut origin = TransportOrigin::from_transport(&request.transport);
        origin.location = request.hints.location.clone();
        origin.lat = request.hints.lat;
        origin.lon = request.hints.lon;

        self.reconcile(&self.devices, device.clone(), record.clone(), Some(origin.clone()));
        self.reconcile(&self.values, device, record.clone(), Some(origin));

        for index in 0..self.exports.len() {
            let exports = Arc::clone(&self.exports);
            let stats = Arc::clone(&self.stats);
            let record = record.clone();
            self.tasks.spawn(async move {
                if exports[index].send(&record).await.is_err() {
                    PipelineStats::bump(&stats.export_failures);
                }
            });
        }

        if let Some(gateway) = request.hints.id.clone() {
            if let Some(alert) = observe(&self.gateway_seen, &gateway, request.received_at, now) {
                self.notify(alert);
            }
            let status = GatewayStatus {
                lat: request.hints.lat,
                lon: request.hints.lon,
                alt: request.hints.alt,
                location: request.hints.location.clone(),
                snr: request.hints.snr,
                last_transport: Some(request.transport.clone()),
                last_seen: Some(request.received_at),
            };
            let origin = TransportOrigin::from_transport(&request.transport);
            self.reconcile(&self.gateways, gateway, status, Some(origin));
        }
    }

    fn reconcile<K: EntityKind>(
        &self,
        store: &Reconciler<K>,
        id: String,
        update: K::Current,
        origin: Option<TransportOrigin>,
    ) {
        let kind = store.kind();
        // Queued now, so writes to one entity land in dispatch order.
        let write = store.reconcile_in_order(id, update, origin);
        let stats = Arc::clone(&self.stats);
        self.tasks.spawn(async move {
            if let Err(e) = write.await {
                PipelineStats::bump(&stats.store_failures);
                log::error!("{kind} reconcile failed: {e}");
            }
        });
    }

    fn command(&self, command: CommandMessage) {
        let sink = Arc::clone(&self.commands);
        self.tasks.spawn(async move {
            if let Err(e) = sink.deliver(&command).await {
                log::warn!("command delivery failed: {e}");
            }
        });
    }

    /// Send an alert without waiting for it
    pub fn notify(&self, alert: StalenessAlert) {
        log::info!("{alert}");
        let sink = Arc::clone(&self.alerts);
        self.tasks.spawn(async move {
            if let Err(e) = sink.alert(&alert.to_string()).await {
                log::warn!("alert delivery failed: {e}");
            }
        });
    }

    /// Wait until nothing is in flight; new work may still be dispatched after
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Wait for in-flight work and stop tracking
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

fn observe(
    tracker: &SharedTracker,
    id: &str,
    seen_at: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
) -> Option<StalenessAlert> {
    match tracker.lock() {
        Ok(mut table) => table.observe(id, seen_at, now),
        Err(_) => {
            log::error!("staleness table poisoned; sighting of {id} lost");
            None
        }
    }
}
