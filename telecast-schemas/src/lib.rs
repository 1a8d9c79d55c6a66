//! Telecast Wire and Record Formats
//!
//! ## Overview
//!
//! Field devices speak a compact protobuf message (the *Telecast message*).
//! Everything downstream of the collector speaks a normalized JSON record.
//! This crate owns both ends of that translation and nothing else, so every
//! process in the fleet agrees on the bytes it hashes and the JSON it writes.
//!
//! ```text
//!  device bytes ──→ framing::split ──→ wire::TelecastMessage ──→ record::SensorRecord
//!   (bulk or         (one slice per       (decoded, relay hops     (normalized JSON,
//!    single)          sub-message)         strippable, hashable)    merged into snapshots)
//! ```
//!
//! ## Why Protobuf On The Wire?
//!
//! Devices transmit over LoRa, satellite and cellular links where every byte
//! costs airtime. Protobuf gives:
//!
//! 1. **Absent fields cost nothing**: a device that only measured radiation
//!    sends only the two tube counts.
//! 2. **Deterministic re-encoding**: fields are emitted in tag order, so two
//!    copies of one transmission re-encode to identical bytes once their relay
//!    hops are cleared. The dedup checksum depends on this.
//! 3. **Forward compatibility**: unknown tags from newer firmware are skipped.
//!
//! ## Bulk Framing
//!
//! A device that buffered readings while offline uploads them in one payload:
//!
//! ```text
//! ┌────────┬───────┬───────┬─────┬───────┬───────────┬─────┬───────────┐
//! │ format │ count │ len_1 │ ... │ len_n │ payload_1 │ ... │ payload_n │
//! │ 1 byte │ 1 byte│ 1 byte│     │ 1 byte│           │     │           │
//! └────────┴───────┴───────┴─────┴───────┴───────────┴─────┴───────────┘
//! ```
//!
//! Sub-messages must be processed in array order; later readings patch forward
//! from earlier ones through the stamp cache.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod framing;
pub mod record;
pub mod wire;

pub use framing::{split, FORMAT_PB_ARRAY};
pub use record::{
    Battery, Environment, GatewayReception, Geiger, Location, Particulate, SensorRecord,
    ServiceInfo,
};
pub use wire::{DeviceType, TelecastMessage, RELAY_HOPS};

use thiserror::Error;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while parsing device payloads
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Payload was empty
    #[error("empty payload")]
    Empty,

    /// Declared sub-message lengths run past the end of the buffer
    #[error("bulk framing overrun: need {needed} bytes, have {available}")]
    FramingOverrun {
        /// Bytes required by the header
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Protobuf decoding failed
    #[error("decode failed: {0}")]
    Decode(String),

    /// Captured-at date/time fields could not be turned into a timestamp
    #[error("invalid captured-at: {0}")]
    InvalidTime(String),
}

impl From<prost::DecodeError> for SchemaError {
    fn from(e: prost::DecodeError) -> Self {
        SchemaError::Decode(e.to_string())
    }
}

/// Crate version, reported in server heartbeats
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
