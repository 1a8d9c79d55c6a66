//! Pipeline builder

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tokio_util::task::TaskTracker;

use super::{Dispatcher, Pipeline, PipelineStats};
use crate::constants::{DEDUP_WINDOW_SECS, DEVICE_STALE_AFTER_MINS, PEER_STALE_AFTER_MINS};
use crate::normalizer::Normalizer;
use crate::sink::{AlertSink, CommandSink, ExportChannel, LogAlertSink, LogCommandSink};
use crate::staleness::StalenessTracker;
use crate::store::{FileBackend, ReconcilePolicy, Reconciler, SnapshotBackend};
use crate::time::{SharedClock, SystemClock};

/// Directory under the data root holding stamp files
pub const STAMP_DIR: &str = "stamp";

/// Builder for [`Pipeline`]
///
/// ## Example
///
/// ```rust,no_run
/// use telecast_core::pipeline::Pipeline;
///
/// let pipeline = Pipeline::builder()
///     .data_dir("/var/lib/telecast")
///     .build();
/// ```
pub struct PipelineBuilder {
    data_dir: PathBuf,
    backend: Option<Arc<dyn SnapshotBackend>>,
    clock: SharedClock,
    policy: ReconcilePolicy,
    dedup_window: Duration,
    device_stale_after: Duration,
    gateway_stale_after: Duration,
    exports: Vec<ExportChannel>,
    commands: Arc<dyn CommandSink>,
    alerts: Arc<dyn AlertSink>,
    stats: Arc<PipelineStats>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Builder with every default
    pub fn new() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backend: None,
            clock: Arc::new(SystemClock),
            policy: ReconcilePolicy::default(),
            dedup_window: Duration::seconds(DEDUP_WINDOW_SECS),
            device_stale_after: Duration::minutes(DEVICE_STALE_AFTER_MINS),
            gateway_stale_after: Duration::minutes(PEER_STALE_AFTER_MINS),
            exports: Vec::new(),
            commands: Arc::new(LogCommandSink),
            alerts: Arc::new(LogAlertSink),
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Root for stamp files and, unless a backend is given, snapshots
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Snapshot storage
    pub fn backend(mut self, backend: Arc<dyn SnapshotBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Time source
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Reconcile timing
    pub fn reconcile_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Dedup window
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Device staleness threshold
    pub fn device_stale_after(mut self, threshold: Duration) -> Self {
        self.device_stale_after = threshold;
        self
    }

    /// Gateway staleness threshold
    pub fn gateway_stale_after(mut self, threshold: Duration) -> Self {
        self.gateway_stale_after = threshold;
        self
    }

    /// Add an export channel
    pub fn export(mut self, channel: ExportChannel) -> Self {
        self.exports.push(channel);
        self
    }

    /// Command-path sink
    pub fn command_sink(mut self, sink: Arc<dyn CommandSink>) -> Self {
        self.commands = sink;
        self
    }

    /// Operator alert sink
    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = sink;
        self
    }

    /// Share counters with the caller
    pub fn stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Assemble the pipeline
    pub fn build(self) -> Pipeline {
        let backend: Arc<dyn SnapshotBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(FileBackend::new(self.data_dir.clone())),
        };

        let normalizer = Normalizer::new(
            self.data_dir.join(STAMP_DIR),
            self.dedup_window,
            Arc::clone(&self.clock),
            Arc::clone(&self.stats),
        );

        let dispatcher = Dispatcher {
            devices: Reconciler::new(Arc::clone(&backend), Arc::clone(&self.clock), self.policy),
            values: Reconciler::new(Arc::clone(&backend), Arc::clone(&self.clock), self.policy),
            gateways: Reconciler::new(backend, Arc::clone(&self.clock), self.policy),
            exports: self.exports.into(),
            commands: self.commands,
            alerts: self.alerts,
            device_seen: Arc::new(Mutex::new(StalenessTracker::new(
                "device",
                self.device_stale_after,
            ))),
            gateway_seen: Arc::new(Mutex::new(StalenessTracker::new(
                "gateway",
                self.gateway_stale_after,
            ))),
            clock: self.clock,
            stats: self.stats,
            tasks: TaskTracker::new(),
        };

        Pipeline::from_parts(normalizer, dispatcher)
    }
}
