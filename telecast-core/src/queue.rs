//! Bounded Intake Queue with a Backpressure Circuit Breaker
//!
//! ## Overview
//!
//! Every listener pushes into one bounded queue; exactly one consumer drains
//! it in FIFO order. Serial consumption is load-bearing: bulk sub-messages
//! and stamp updates for a device must be applied in arrival order.
//!
//! ```text
//!  udp  ─┐
//!  tcp  ─┤   enqueue (blocks when full)   ┌──────────────┐   recv    ┌──────────┐
//!  http ─┼──────────────────────────────→ │ IntakeQueue  │ ────────→ │ consumer │
//!  mqtt ─┘                                └──────────────┘           └──────────┘
//!                                               │ high-water == capacity
//!                                               ↓
//!                                        CircuitBreaker::trip (once)
//! ```
//!
//! ## Why Trip Instead of Growing?
//!
//! A full queue means the consumer is not keeping up, and a consumer that is
//! stuck cannot diagnose itself. When the high-water mark reaches capacity
//! the breaker opens, cancels its fault token, and every later enqueue fails
//! fast with [`IntakeError::CircuitOpen`]. The runner watching the token
//! shuts the process down for the supervisor to relaunch.
//!
//! ## Memory Ordering
//!
//! Counters are statistics and use `Relaxed`. The breaker's open flag uses a
//! single `compare_exchange` so exactly one caller observes the transition.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::constants::{BROKER_QUEUE_CAPACITY, HTTP_QUEUE_CAPACITY};
use crate::errors::{IntakeError, IntakeResult};
use crate::request::IncomingRequest;

/// Deployment flavour, which decides the default capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntakeMode {
    /// Behind an HTTP load balancer
    #[default]
    Http,
    /// Draining a broker subscription
    Broker,
}

impl IntakeMode {
    /// Default queue capacity for this mode
    pub const fn capacity(self) -> usize {
        match self {
            IntakeMode::Http => HTTP_QUEUE_CAPACITY,
            IntakeMode::Broker => BROKER_QUEUE_CAPACITY,
        }
    }
}

/// Queue statistics
///
/// Track queue health without impacting performance
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Requests accepted into the queue
    pub enqueued: AtomicU64,
    /// Requests handed to the consumer
    pub dequeued: AtomicU64,
    /// Requests refused because the breaker was open
    pub rejected: AtomicU64,
    /// Requests in the queue or waiting to enter it
    pub depth: AtomicUsize,
    /// Maximum depth seen
    pub high_water: AtomicUsize,
}

impl QueueStats {
    /// Update high-water mark if current is higher
    fn update_high_water(&self, current: usize) {
        let mut max = self.high_water.load(Ordering::Relaxed);
        while current > max {
            match self.high_water.compare_exchange_weak(
                max,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => max = actual,
            }
        }
    }
}

/// Point-in-time copy of the queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounters {
    /// Configured capacity
    pub capacity: usize,
    /// Requests accepted
    pub enqueued: u64,
    /// Requests consumed
    pub dequeued: u64,
    /// Requests refused by the open breaker
    pub rejected: u64,
    /// Current depth
    pub depth: usize,
    /// Maximum depth seen
    pub high_water: usize,
    /// Breaker trips (0 or 1 for a process lifetime)
    pub trips: u32,
}

/// One-shot backpressure breaker
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    open: AtomicBool,
    trips: AtomicU32,
    fault: CancellationToken,
}

impl CircuitBreaker {
    /// Open the breaker; returns true only for the call that opened it
    pub fn trip(&self) -> bool {
        let opened = self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if opened {
            self.trips.fetch_add(1, Ordering::Relaxed);
            self.fault.cancel();
        }
        opened
    }

    /// Whether the breaker has tripped
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Number of trips
    pub fn trips(&self) -> u32 {
        self.trips.load(Ordering::Relaxed)
    }

    /// Token cancelled when the breaker trips
    pub fn fault(&self) -> CancellationToken {
        self.fault.clone()
    }
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    sequence: AtomicU64,
    stats: QueueStats,
    breaker: CircuitBreaker,
}

impl Shared {
    fn counters(&self) -> QueueCounters {
        QueueCounters {
            capacity: self.capacity,
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            dequeued: self.stats.dequeued.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            depth: self.stats.depth.load(Ordering::Relaxed),
            high_water: self.stats.high_water.load(Ordering::Relaxed),
            trips: self.breaker.trips(),
        }
    }
}

/// Producer handle, cloned into every listener
#[derive(Debug, Clone)]
pub struct IntakeQueue {
    tx: mpsc::Sender<IncomingRequest>,
    shared: Arc<Shared>,
}

/// Consumer handle, owned by the single consumer task
#[derive(Debug)]
pub struct IntakeReceiver {
    rx: mpsc::Receiver<IncomingRequest>,
    shared: Arc<Shared>,
}

/// Create a queue of the given capacity
pub fn intake_channel(capacity: usize) -> (IntakeQueue, IntakeReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let shared = Arc::new(Shared {
        capacity,
        sequence: AtomicU64::new(0),
        stats: QueueStats::default(),
        breaker: CircuitBreaker::default(),
    });
    (
        IntakeQueue {
            tx,
            shared: Arc::clone(&shared),
        },
        IntakeReceiver { rx, shared },
    )
}

impl IntakeQueue {
    /// Push a request, waiting while the queue is full
    ///
    /// Assigns and returns the request's sequence number. The request that
    /// brings the high-water mark to capacity trips the breaker and is still
    /// delivered.
    pub async fn enqueue(&self, mut request: IncomingRequest) -> IntakeResult<u64> {
        let shared = &self.shared;
        if shared.breaker.is_open() {
            shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(IntakeError::CircuitOpen);
        }

        let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        request.sequence = sequence;

        let depth = shared.stats.depth.fetch_add(1, Ordering::Relaxed) + 1;
        shared.stats.update_high_water(depth);
        if depth >= shared.capacity && shared.breaker.trip() {
            log::error!(
                "intake queue reached capacity {} (seq {sequence}); circuit breaker open",
                shared.capacity
            );
        }

        if self.tx.send(request).await.is_err() {
            shared.stats.depth.fetch_sub(1, Ordering::Relaxed);
            return Err(IntakeError::Closed);
        }
        shared.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(sequence)
    }

    /// Snapshot of the counters
    pub fn counters(&self) -> QueueCounters {
        self.shared.counters()
    }

    /// The breaker
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl IntakeReceiver {
    /// Next request in FIFO order; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<IncomingRequest> {
        let request = self.rx.recv().await?;
        self.shared.stats.depth.fetch_sub(1, Ordering::Relaxed);
        self.shared.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(request)
    }

    /// Stop accepting; queued requests can still be drained
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Snapshot of the counters
    pub fn counters(&self) -> QueueCounters {
        self.shared.counters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(tag: u8) -> IncomingRequest {
        IncomingRequest::new(vec![tag], "test", Utc::now())
    }

    #[tokio::test]
    async fn fifo_with_sequence_numbers() {
        let (queue, mut rx) = intake_channel(10);
        for tag in 1..=3 {
            queue.enqueue(request(tag)).await.unwrap();
        }

        for expected in 1..=3u8 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.payload, vec![expected]);
            assert_eq!(got.sequence, u64::from(expected));
        }
        let counters = rx.counters();
        assert_eq!((counters.enqueued, counters.dequeued, counters.depth), (3, 3, 0));
        assert_eq!(counters.high_water, 3);
    }

    #[tokio::test]
    async fn breaker_trips_once_at_capacity() {
        let (queue, mut rx) = intake_channel(3);
        let fault = queue.breaker().fault();

        for tag in 1..=3 {
            queue.enqueue(request(tag)).await.unwrap();
        }
        assert!(fault.is_cancelled());
        assert_eq!(queue.breaker().trips(), 1);

        for tag in 4..=6 {
            assert_eq!(queue.enqueue(request(tag)).await, Err(IntakeError::CircuitOpen));
        }
        assert_eq!(queue.breaker().trips(), 1);
        assert_eq!(queue.counters().rejected, 3);

        // The tripping request was still delivered.
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
        assert_eq!(rx.recv().await.unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn closed_consumer_reports_closed() {
        let (queue, rx) = intake_channel(5);
        drop(rx);
        assert_eq!(queue.enqueue(request(1)).await, Err(IntakeError::Closed));
        assert_eq!(queue.counters().depth, 0);
    }

    #[test]
    fn mode_capacities() {
        assert_eq!(IntakeMode::Http.capacity(), 100);
        assert_eq!(IntakeMode::Broker.capacity(), 25);
    }

    #[test]
    fn second_trip_is_ignored() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.trip());
        assert!(!breaker.trip());
        assert_eq!(breaker.trips(), 1);
    }
}
