//! Telecast Collector Core
//!
//! ## Overview
//!
//! Everything between "bytes arrived on some transport" and "a snapshot file
//! was reconciled": the intake queue, the normalizer with its dedup ring and
//! stamp cache, the generic reconciliation store, and staleness tracking.
//!
//! ```text
//!  listeners ──→ IntakeQueue ──→ Pipeline (one consumer)
//!                                  │
//!                                  ├─ Normalizer: split, decode, dedup, stamp, route
//!                                  └─ Dispatcher: reconcile device/value/gateway,
//!                                                 export, command, staleness
//! ```
//!
//! ## Design Philosophy
//!
//! 1. **Serial where order matters**: one consumer task normalizes every
//!    request, so bulk sub-messages and stamp updates apply in arrival order.
//! 2. **Concurrent where it does not**: store writes and exports are spawned
//!    and never hold up intake.
//! 3. **No cross-process locks**: fleet members share snapshot files through
//!    an optimistic, additive, verified write cycle.
//! 4. **Fail loudly on saturation**: a full intake queue trips a breaker that
//!    ends the process for its supervisor to restart.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use telecast_core::pipeline::Pipeline;
//! use telecast_core::queue::intake_channel;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let (queue, intake) = intake_channel(100);
//! let pipeline = Pipeline::builder().data_dir("/var/lib/telecast").build();
//! let shutdown = CancellationToken::new();
//!
//! // hand `queue` clones to listeners, then:
//! pipeline.run(intake, shutdown).await;
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod constants;
pub mod dedup;
pub mod errors;
pub mod normalizer;
pub mod pipeline;
pub mod queue;
pub mod request;
pub mod sink;
pub mod stamp;
pub mod staleness;
pub mod store;
pub mod time;

pub use errors::{IntakeError, SinkError, StampError, StoreError};
pub use normalizer::{Normalizer, Outcome, RejectReason};
pub use pipeline::{Pipeline, PipelineCounters, PipelineStats};
pub use queue::{intake_channel, IntakeMode, IntakeQueue, IntakeReceiver, QueueCounters};
pub use request::{GatewayHints, IncomingRequest};
pub use sink::{AlertSink, CommandMessage, CommandSink, ExportChannel, ExportSink};
pub use staleness::{StalenessAlert, StalenessTracker};
pub use store::{EntitySnapshot, Reconciler};
pub use time::{Clock, SharedClock, SystemClock};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
