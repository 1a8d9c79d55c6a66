//! Normalizer: bytes in, outcomes out
//!
//! ## Overview
//!
//! For every sub-message of a request, in array order:
//!
//! ```text
//!  decode ──→ checksum ──→ dedup ──→ route ──┬─ sensor:  stamp ──→ SensorRecord ──→ Accepted
//!    │                       │               └─ other:   CommandMessage        ──→ Command
//!    ↓                       ↓
//!  Rejected(Malformed)    Duplicate
//! ```
//!
//! The normalizer owns the dedup ring and the stamp cache outright. It runs
//! on the single consumer task, so neither needs a lock, and a device's
//! stamp Set is always visible to the Apply that follows it in the same bulk
//! payload.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use telecast_schemas::{framing, SensorRecord, ServiceInfo, TelecastMessage};

use crate::dedup::{DedupRing, DedupVerdict};
use crate::pipeline::PipelineStats;
use crate::request::IncomingRequest;
use crate::sink::CommandMessage;
use crate::stamp::{StampCache, StampOutcome};
use crate::time::SharedClock;

/// Why a sub-message (or a whole request) was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Bulk header lengths overran the buffer
    Framing,
    /// Protobuf decode failed
    Malformed,
    /// Apply message with no recoverable stamp
    Unstampable,
    /// Sensor message without any device id
    Unidentified,
}

/// Result of normalizing one sub-message
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Sensor reading ready for the store and exports
    Accepted(SensorRecord),
    /// Seen within the dedup window
    Duplicate {
        /// Shared checksum
        checksum: u32,
    },
    /// Non-sensor message for the command path
    Command(CommandMessage),
    /// Dropped
    Rejected {
        /// Category
        reason: RejectReason,
        /// Human-readable detail
        detail: String,
    },
}

/// Decoder, dedup filter and stamp engine for the consumer task
pub struct Normalizer {
    dedup: DedupRing,
    stamps: StampCache,
    clock: SharedClock,
    stats: Arc<PipelineStats>,
}

impl Normalizer {
    /// Normalizer with stamp files under `stamp_dir`
    pub fn new(
        stamp_dir: impl Into<PathBuf>,
        dedup_window: Duration,
        clock: SharedClock,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            dedup: DedupRing::new(dedup_window),
            stamps: StampCache::new(stamp_dir),
            clock,
            stats,
        }
    }

    /// Stamp cache, for inspection
    pub fn stamps(&self) -> &StampCache {
        &self.stamps
    }

    /// Normalize every sub-message of a request, in order
    pub async fn process(&mut self, request: &IncomingRequest) -> Vec<Outcome> {
        PipelineStats::bump(&self.stats.requests);

        let parts = match framing::split(&request.payload) {
            Ok(parts) => parts,
            Err(e) => {
                PipelineStats::bump(&self.stats.malformed);
                log::warn!(
                    "dropping request seq={} transport={}: {e}; payload={}",
                    request.sequence,
                    request.transport,
                    hex::encode(&request.payload)
                );
                return vec![Outcome::Rejected {
                    reason: RejectReason::Framing,
                    detail: e.to_string(),
                }];
            }
        };

        let mut outcomes = Vec::with_capacity(parts.len());
        for part in parts {
            outcomes.push(self.process_one(request, part).await);
        }
        outcomes
    }

    async fn process_one(&mut self, request: &IncomingRequest, bytes: &[u8]) -> Outcome {
        PipelineStats::bump(&self.stats.messages);

        let mut msg = match TelecastMessage::parse(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                PipelineStats::bump(&self.stats.malformed);
                log::warn!(
                    "undecodable message seq={} transport={}: {e}; bytes={}",
                    request.sequence,
                    request.transport,
                    hex::encode(bytes)
                );
                return Outcome::Rejected {
                    reason: RejectReason::Malformed,
                    detail: e.to_string(),
                };
            }
        };

        let now = self.clock.now();
        let checksum = msg.dedup_checksum();
        if let DedupVerdict::Duplicate { age } = self.dedup.check(checksum, now) {
            PipelineStats::bump(&self.stats.duplicates);
            log::debug!(
                "duplicate {checksum:08x} via {} ({}s after first copy)",
                request.transport,
                age.num_seconds()
            );
            return Outcome::Duplicate { checksum };
        }
        msg.strip_relay_hops();

        if !msg.is_sensor() {
            PipelineStats::bump(&self.stats.commands);
            return Outcome::Command(CommandMessage {
                device: msg.entity_id(),
                device_type: msg.declared_type().map(|t| t.label().to_string()),
                text: msg.message.clone().unwrap_or_default(),
                transport: request.transport.clone(),
            });
        }

        let Some(device) = msg.entity_id() else {
            PipelineStats::bump(&self.stats.malformed);
            log::warn!(
                "sensor message without device id seq={} transport={}; bytes={}",
                request.sequence,
                request.transport,
                hex::encode(bytes)
            );
            return Outcome::Rejected {
                reason: RejectReason::Unidentified,
                detail: "no device id".into(),
            };
        };

        let stamp = match self.stamps.process(&device, &mut msg, now).await {
            Ok(stamp) => stamp,
            Err(e) => {
                PipelineStats::bump(&self.stats.unstampable);
                log::warn!("rejecting device={device} via {}: {e}", request.transport);
                return Outcome::Rejected {
                    reason: RejectReason::Unstampable,
                    detail: e.to_string(),
                };
            }
        };

        let captured_at = msg.resolved_captured_at().unwrap_or_else(|e| {
            log::warn!("device={device} sent unusable capture time: {e}");
            None
        });

        let mut record = SensorRecord::from_message(&msg, captured_at);
        record.gateway = request.hints.reception();
        record.service = Some(ServiceInfo {
            uploaded_at: Some(request.received_at),
            transport: Some(request.transport.clone()),
            checksum: Some(format!("{checksum:08x}")),
            sequence: Some(request.sequence),
        });
        if let StampOutcome::Degraded { .. } = stamp {
            record.approximated = true;
            PipelineStats::bump(&self.stats.degraded);
        }

        PipelineStats::bump(&self.stats.accepted);
        Outcome::Accepted(record)
    }
}
