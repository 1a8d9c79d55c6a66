//! Collector pipeline: the single consumer and everything it drives
//!
//! ## Overview
//!
//! ```text
//!   IntakeReceiver ──→ Pipeline::handle ──→ Normalizer ──→ Dispatcher
//!   (FIFO, one task)                         (serial)       │ fire-and-forget tasks
//!                                                           ├─→ device / value reconcile
//!                                                           ├─→ gateway reconcile
//!                                                           ├─→ export channels
//!                                                           └─→ command sink
//! ```
//!
//! Normalization is serial. Store writes and exports are spawned onto a
//! [`TaskTracker`](tokio_util::task::TaskTracker) so a contended snapshot or
//! a slow collaborator never stalls intake; shutdown waits for them.
//!
//! ## Lifecycle
//!
//! The dedup ring, stamp cache and staleness tables are fields of the
//! pipeline, built once by [`PipelineBuilder`] and dropped when
//! [`Pipeline::run`] returns.

mod builder;
mod dispatch;

pub use builder::PipelineBuilder;
pub use dispatch::Dispatcher;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::normalizer::{Normalizer, Outcome};
use crate::queue::IntakeReceiver;
use crate::request::IncomingRequest;
use crate::staleness::StalenessTracker;

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Requests taken off the queue
    pub requests: AtomicU64,
    /// Sub-messages seen
    pub messages: AtomicU64,
    /// Records accepted on the sensor path
    pub accepted: AtomicU64,
    /// Dropped as duplicates
    pub duplicates: AtomicU64,
    /// Framing, decode or identification failures
    pub malformed: AtomicU64,
    /// Apply messages with no usable stamp
    pub unstampable: AtomicU64,
    /// Records built from a mismatched stamp
    pub degraded: AtomicU64,
    /// Messages routed to the command path
    pub commands: AtomicU64,
    /// Failed export calls
    pub export_failures: AtomicU64,
    /// Reconciles that did not converge
    pub store_failures: AtomicU64,
}

impl PipelineStats {
    /// Increment one counter
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn counters(&self) -> PipelineCounters {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineCounters {
            requests: get(&self.requests),
            messages: get(&self.messages),
            accepted: get(&self.accepted),
            duplicates: get(&self.duplicates),
            malformed: get(&self.malformed),
            unstampable: get(&self.unstampable),
            degraded: get(&self.degraded),
            commands: get(&self.commands),
            export_failures: get(&self.export_failures),
            store_failures: get(&self.store_failures),
        }
    }
}

/// Serializable copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCounters {
    /// Requests taken off the queue
    pub requests: u64,
    /// Sub-messages seen
    pub messages: u64,
    /// Records accepted
    pub accepted: u64,
    /// Duplicates dropped
    pub duplicates: u64,
    /// Malformed drops
    pub malformed: u64,
    /// Unstampable drops
    pub unstampable: u64,
    /// Approximated records
    pub degraded: u64,
    /// Command-path messages
    pub commands: u64,
    /// Failed exports
    pub export_failures: u64,
    /// Unconverged reconciles
    pub store_failures: u64,
}

/// Shared handle to a staleness table
pub type SharedTracker = Arc<Mutex<StalenessTracker>>;

/// The consumer-side pipeline
pub struct Pipeline {
    normalizer: Normalizer,
    dispatcher: Dispatcher,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub(crate) fn from_parts(normalizer: Normalizer, dispatcher: Dispatcher) -> Self {
        Self {
            normalizer,
            dispatcher,
        }
    }

    /// Dispatcher, for trackers and stats
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Normalize one request and dispatch its outcomes
    pub async fn handle(&mut self, request: &IncomingRequest) -> Vec<Outcome> {
        let outcomes = self.normalizer.process(request).await;
        self.dispatcher.dispatch(request, &outcomes);
        outcomes
    }

    /// Wait for every dispatched store write, export and command
    pub async fn flush(&self) {
        self.dispatcher.wait_idle().await;
    }

    /// Drain the queue until `shutdown` fires or every producer is gone
    ///
    /// On shutdown the queue is closed, requests already queued are still
    /// processed, and in-flight dispatches are awaited.
    pub async fn run(mut self, mut intake: IntakeReceiver, shutdown: CancellationToken) {
        log::info!("pipeline consumer started");
        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = intake.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };
            self.handle(&request).await;
        }

        intake.close();
        let mut drained = 0usize;
        while let Some(request) = intake.recv().await {
            self.handle(&request).await;
            drained += 1;
        }

        self.dispatcher.shutdown().await;
        log::info!(
            "pipeline consumer stopped ({drained} drained at shutdown, {:?})",
            self.dispatcher.stats().counters()
        );
    }
}
