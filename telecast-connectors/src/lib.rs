//! Transport Listeners and Outbound Collaborators for Telecast Collectors
//!
//! ## Overview
//!
//! Devices reach a collector over whatever link they happen to have. Each
//! listener here owns one transport, turns every logical transmission into an
//! [`IncomingRequest`](telecast_core::IncomingRequest) and pushes it into the
//! shared intake queue. Nothing else is shared between listeners.
//!
//! ```text
//!  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐
//!  │   UDP    │ │   TCP    │ │   HTTP   │ │   MQTT   │
//!  │ datagram │ │ stream   │ │ upload   │ │ broker   │
//!  └────┬─────┘ └────┬─────┘ └────┬─────┘ └────┬─────┘
//!       └────────────┴─────┬──────┴────────────┘
//!                          ▼
//!                   Intake::submit ──→ IntakeQueue ──→ consumer
//! ```
//!
//! ## Protocol Selection Guide
//!
//! ### UDP
//!
//! **When to use:** cellular modems and satellite links that send one short
//! burst and go back to sleep.
//!
//! - One datagram is one transmission
//! - No acknowledgement; a full queue blocks the receive loop
//! - Transport label `device-udp:<peer ip>`
//!
//! ### TCP
//!
//! **When to use:** devices that cannot fit a payload in one datagram.
//!
//! - The device writes its payload and half-closes; everything read until
//!   EOF is one transmission
//! - Reads are bounded in size and time
//! - Transport label `device-tcp:<peer ip>`
//!
//! ### HTTP
//!
//! **When to use:** gateways, LoRa network-server webhooks, phones.
//!
//! - Raw body or a JSON envelope with a base64 payload and gateway metadata
//! - Client identified by the `X-Telecast-Client` header
//! - Answers 503 once the intake breaker is open, so senders retry elsewhere
//! - Transport label `device-http:<client>`
//!
//! ### MQTT
//!
//! **When to use:** the broker-integrated deployment, where a message broker
//! fronts the devices.
//!
//! - Subscribes to one topic filter; every publish is one transmission
//! - Reconnects with a fixed delay until shutdown
//! - Transport label `broker:<topic>`
//!
//! ## Outbound Collaborators
//!
//! | Type | Trait | Wire |
//! |------|-------|------|
//! | [`export::HttpExportSink`] | `ExportSink` | JSON record POST, bearer/basic/API-key auth |
//! | [`alert::WebhookAlertSink`] | `AlertSink`, `CommandSink` | `{"text": ...}` POST |
//!
//! Both use a blocking `ureq` agent on Tokio's blocking pool; the pipeline
//! wraps every call in its own deadline.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telecast_connectors::{udp::{UdpConfig, UdpListener}, Intake, Listener};
//! use telecast_core::{intake_channel, SystemClock};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (queue, _consumer) = intake_channel(100);
//! let intake = Intake::new(queue, Arc::new(SystemClock));
//!
//! let udp = UdpListener::bind(UdpConfig::default(), intake).await?;
//! Box::new(udp).run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod stream;
pub mod udp;

#[cfg(feature = "http")]
pub mod web;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "export")]
pub mod alert;

#[cfg(feature = "export")]
pub mod export;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use telecast_core::errors::IntakeError;
use telecast_core::{Clock, GatewayHints, IncomingRequest, IntakeQueue, SharedClock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Common connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Could not bind the listening socket
    #[error("cannot bind {addr}: {reason}")]
    Bind {
        /// Requested address
        addr: String,
        /// OS error
        reason: String,
    },

    /// Socket failure after startup
    #[error("I/O error: {0}")]
    Io(String),

    /// Peer or broker violated the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid settings
    #[error("configuration error: {0}")]
    Config(String),

    /// The intake queue refused a request
    #[error(transparent)]
    Intake(#[from] IntakeError),
}

impl From<std::io::Error> for ConnectorError {
    fn from(e: std::io::Error) -> Self {
        ConnectorError::Io(e.to_string())
    }
}

/// A transport listener run as one supervised process
#[async_trait::async_trait]
pub trait Listener: Send {
    /// Name for logs
    fn name(&self) -> &str;

    /// Accept transmissions until `shutdown` fires
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), ConnectorError>;
}

/// Per-listener counters
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Transmissions handed to the queue
    pub received: AtomicU64,
    /// Payload bytes handed to the queue
    pub bytes: AtomicU64,
    /// Transmissions refused by the queue
    pub rejected: AtomicU64,
    /// Transport-level failures (bad frames, oversize bodies, socket errors)
    pub errors: AtomicU64,
}

impl ListenerStats {
    /// Point-in-time copy
    pub fn counters(&self) -> ListenerCounters {
        ListenerCounters {
            received: self.received.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Count a transport-level failure
    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializable copy of [`ListenerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerCounters {
    /// Transmissions handed to the queue
    pub received: u64,
    /// Payload bytes handed to the queue
    pub bytes: u64,
    /// Transmissions refused by the queue
    pub rejected: u64,
    /// Transport-level failures
    pub errors: u64,
}

/// A listener's handle on the intake queue
#[derive(Clone)]
pub struct Intake {
    queue: IntakeQueue,
    clock: SharedClock,
    stats: Arc<ListenerStats>,
}

impl Intake {
    /// Handle stamping requests with `clock`
    pub fn new(queue: IntakeQueue, clock: SharedClock) -> Self {
        Self {
            queue,
            clock,
            stats: Arc::new(ListenerStats::default()),
        }
    }

    /// The queue behind this handle
    pub fn queue(&self) -> &IntakeQueue {
        &self.queue
    }

    /// This listener's counters
    pub fn stats(&self) -> &Arc<ListenerStats> {
        &self.stats
    }

    /// Enqueue one transmission; returns its sequence number
    pub async fn submit(
        &self,
        payload: Vec<u8>,
        transport: String,
        hints: GatewayHints,
    ) -> Result<u64, IntakeError> {
        let size = payload.len() as u64;
        let request = IncomingRequest::new(payload, transport, self.clock.now()).with_hints(hints);

        match self.queue.enqueue(request).await {
            Ok(sequence) => {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes.fetch_add(size, Ordering::Relaxed);
                Ok(sequence)
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telecast_core::time::FixedClock;
    use telecast_core::intake_channel;

    #[tokio::test]
    async fn submit_counts_accepted_and_refused() {
        let (queue, mut rx) = intake_channel(1);
        let clock = FixedClock::new(chrono::Utc::now());
        let intake = Intake::new(queue, Arc::new(clock));

        let seq = intake
            .submit(vec![1, 2, 3], "device-udp:10.0.0.1".into(), GatewayHints::default())
            .await
            .unwrap();
        assert_eq!(seq, 1);

        // Capacity 1 was reached, so the breaker is open now.
        let refused = intake
            .submit(vec![4], "device-udp:10.0.0.1".into(), GatewayHints::default())
            .await;
        assert_eq!(refused, Err(IntakeError::CircuitOpen));

        let counters = intake.stats().counters();
        assert_eq!(counters.received, 1);
        assert_eq!(counters.bytes, 3);
        assert_eq!(counters.rejected, 1);

        let request = rx.recv().await.unwrap();
        assert_eq!(request.transport, "device-udp:10.0.0.1");
    }
}
