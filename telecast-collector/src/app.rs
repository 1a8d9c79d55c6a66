//! Wiring: configuration in, runnable process set out
//!
//! ```text
//!  udp ─┐                                           ┌─ device / value / gateway snapshots
//!  tcp ─┼─→ IntakeQueue ─→ Pipeline consumer ─→ Dispatcher ─┼─ export channel
//! http ─┤      │                                    └─ command sink
//! mqtt ─┘      └─ breaker watch (fails the runner)
//!
//!  staleness scans (device, gateway, server) ─→ alert sink
//!  heartbeat ─→ server snapshot
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use telecast_connectors::alert::WebhookAlertSink;
use telecast_connectors::export::HttpExportSink;
use telecast_connectors::mqtt::MqttListener;
use telecast_connectors::stream::StreamListener;
use telecast_connectors::udp::UdpListener;
use telecast_connectors::web::{HttpListener, WebState};
use telecast_connectors::{Intake, Listener};
use telecast_core::pipeline::SharedTracker;
use telecast_core::sink::{LogAlertSink, LogCommandSink};
use telecast_core::store::{
    DeviceKind, FileBackend, GatewayKind, ServerKind, SnapshotBackend,
};
use telecast_core::{
    intake_channel, AlertSink, Clock, CommandSink, ExportChannel, Pipeline, PipelineStats,
    Reconciler, SharedClock, StalenessTracker,
};
use tokio_util::sync::CancellationToken;

use crate::config::CollectorConfig;
use crate::runner::Runner;
use crate::tasks::{self, Heartbeat};

/// A fully wired collector, ready to run
pub struct Collector {
    runner: Runner,
    bound: Vec<(String, SocketAddr)>,
}

impl Collector {
    /// Addresses the socket listeners actually bound, by listener name
    pub fn bound(&self) -> &[(String, SocketAddr)] {
        &self.bound
    }

    /// Run until shutdown or a fatal fault
    pub async fn run(self) -> anyhow::Result<()> {
        self.runner.run().await
    }
}

/// Build every collaborator and bind every configured listener
pub async fn assemble(
    config: &CollectorConfig,
    clock: SharedClock,
    shutdown: CancellationToken,
) -> anyhow::Result<Collector> {
    config.validate()?;
    let data_dir = &config.store.data_dir;
    let policy = config.store.policy();
    let backend: Arc<dyn SnapshotBackend> = Arc::new(FileBackend::new(data_dir.clone()));
    let stats = Arc::new(PipelineStats::default());

    let (alerts, commands): (Arc<dyn AlertSink>, Arc<dyn CommandSink>) =
        match &config.alerts.webhook_url {
            Some(url) => {
                let webhook = Arc::new(
                    WebhookAlertSink::new(url.clone(), Duration::from_secs(config.alerts.timeout_secs))
                        .context("alert webhook")?,
                );
                let alerts: Arc<dyn AlertSink> = webhook.clone();
                let commands: Arc<dyn CommandSink> = if config.alerts.commands {
                    webhook
                } else {
                    Arc::new(LogCommandSink)
                };
                (alerts, commands)
            }
            None => (Arc::new(LogAlertSink), Arc::new(LogCommandSink)),
        };

    let mut builder = Pipeline::builder()
        .data_dir(data_dir.clone())
        .backend(Arc::clone(&backend))
        .clock(Arc::clone(&clock))
        .reconcile_policy(policy)
        .dedup_window(chrono::Duration::seconds(config.dedup.window_secs))
        .device_stale_after(config.staleness.device_after())
        .gateway_stale_after(config.staleness.peer_after())
        .command_sink(commands)
        .alert_sink(Arc::clone(&alerts))
        .stats(Arc::clone(&stats));

    if let Some(export) = &config.export {
        let sink = HttpExportSink::new(export.http_config()).context("export sink")?;
        log::info!("exporting records to {}", export.url);
        builder = builder.export(
            ExportChannel::new(Arc::new(sink), Arc::clone(&alerts))
                .timeout(Duration::from_secs(export.timeout_secs))
                .alert_after(export.failure_alert_threshold),
        );
    }

    let pipeline = builder.build();
    let device_tracker = Arc::clone(pipeline.dispatcher().device_tracker());
    let gateway_tracker = Arc::clone(pipeline.dispatcher().gateway_tracker());
    let server_tracker: SharedTracker = Arc::new(Mutex::new(StalenessTracker::new(
        "server",
        config.staleness.peer_after(),
    )));

    let capacity = config.intake.capacity();
    let (queue, receiver) = intake_channel(capacity);
    log::info!("intake queue capacity {capacity} ({:?} mode)", config.intake.mode);

    let mut listeners: Vec<Box<dyn Listener>> = Vec::new();
    let mut bound = Vec::new();
    let intake = || Intake::new(queue.clone(), Arc::clone(&clock));

    if let Some(udp) = &config.udp {
        let listener = UdpListener::bind(udp.clone(), intake()).await?;
        bound.push(("udp".to_string(), listener.local_addr()?));
        listeners.push(Box::new(listener));
    }
    if let Some(tcp) = &config.tcp {
        let listener = StreamListener::bind(tcp.clone(), intake()).await?;
        bound.push(("tcp".to_string(), listener.local_addr()?));
        listeners.push(Box::new(listener));
    }
    if let Some(http) = &config.http {
        let state = WebState::new(intake()).with_pipeline(Arc::clone(&stats));
        let listener = HttpListener::bind(http.clone(), state).await?;
        bound.push(("http".to_string(), listener.local_addr()?));
        listeners.push(Box::new(listener));
    }
    if let Some(mqtt) = &config.mqtt {
        listeners.push(Box::new(MqttListener::new(mqtt.clone(), intake())?));
    }
    if listeners.is_empty() {
        log::warn!("no listeners configured; only periodic tasks will run");
    }

    let scan_every = Duration::from_secs(config.staleness.scan_interval_secs);
    let devices = Reconciler::<DeviceKind>::new(Arc::clone(&backend), Arc::clone(&clock), policy);
    let gateways = Reconciler::<GatewayKind>::new(Arc::clone(&backend), Arc::clone(&clock), policy);
    let servers = Reconciler::<ServerKind>::new(Arc::clone(&backend), Arc::clone(&clock), policy);
    let heartbeat = Heartbeat::new(
        servers.clone(),
        config.server.instance_id.clone(),
        clock.now(),
        Arc::clone(&stats),
        queue.clone(),
    );

    let mut runner = Runner::new().with_cancellation_token(shutdown);

    for listener in listeners {
        let name = format!("listener:{}", listener.name());
        runner = runner.with_process(name, move |token| async move {
            listener.run(token).await.map_err(anyhow::Error::from)
        });
    }

    runner = runner
        .with_process("pipeline", move |token| async move {
            pipeline.run(receiver, token).await;
            Ok(())
        })
        .with_process("breaker-watch", {
            let queue = queue.clone();
            move |token| tasks::watch_breaker(queue, token)
        })
        .with_process("device-scan", {
            let (alerts, clock) = (Arc::clone(&alerts), Arc::clone(&clock));
            move |token| tasks::staleness_scan(devices, device_tracker, alerts, clock, scan_every, token)
        })
        .with_process("gateway-scan", {
            let (alerts, clock) = (Arc::clone(&alerts), Arc::clone(&clock));
            move |token| tasks::staleness_scan(gateways, gateway_tracker, alerts, clock, scan_every, token)
        })
        .with_process("server-scan", {
            let (alerts, clock) = (Arc::clone(&alerts), Arc::clone(&clock));
            move |token| tasks::staleness_scan(servers, server_tracker, alerts, clock, scan_every, token)
        })
        .with_process("heartbeat", {
            let clock = Arc::clone(&clock);
            let every = Duration::from_secs(config.server.heartbeat_secs);
            move |token| tasks::heartbeat(heartbeat, clock, every, token)
        });

    log::info!(
        "collector {} assembled with {} processes, data in {}",
        config.server.instance_id,
        runner.len(),
        data_dir.display()
    );
    Ok(Collector { runner, bound })
}
