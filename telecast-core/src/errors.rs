//! Error Types for the Collector Pipeline
//!
//! ## Design Philosophy
//!
//! Errors are split by the component that raises them, and every variant says
//! which of two propagation classes it belongs to:
//!
//! 1. **Per-message faults** (`StampError`, most `StoreError`s, `SinkError`):
//!    recovered locally. The pipeline logs, counts, and moves on to the next
//!    message.
//! 2. **Systemic faults** (`IntakeError::CircuitOpen`): escalated to the
//!    process runner, which shuts down cleanly so a supervisor can relaunch.
//!
//! ## Error Categories
//!
//! ### Intake
//! - `CircuitOpen`: the backpressure breaker has tripped
//! - `Closed`: the consumer side is gone (shutdown in progress)
//!
//! ### Stamp Protocol
//! - `Unstampable`: an apply message with no recoverable cache
//! - `UnsupportedVersion`: a stamp format this build cannot interpret
//!
//! ### Reconciliation Store
//! - `Io` / `Serialize`: backend failures, retried by the reconcile loop
//! - `Unconverged`: the write never verified within the attempt budget

use thiserror::Error;

/// Result type for intake operations
pub type IntakeResult<T> = Result<T, IntakeError>;

/// Intake queue failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeError {
    /// The high-water mark reached capacity; no further requests are accepted
    #[error("intake circuit breaker is open")]
    CircuitOpen,

    /// The consumer has shut down
    #[error("intake queue closed")]
    Closed,
}

/// Stamp protocol failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StampError {
    /// Apply message references a stamp with no usable cache or file
    #[error("device {device} has no usable stamp for id {stamp}")]
    Unstampable {
        /// Entity id of the device
        device: String,
        /// Stamp id the message referenced
        stamp: u32,
    },

    /// Stamp format version is not understood
    #[error("unsupported stamp version {0}")]
    UnsupportedVersion(u32),

    /// Stamp file could not be read or written
    #[error("stamp file error: {0}")]
    Io(String),

    /// Stamp file contents did not parse
    #[error("stamp file is corrupt: {0}")]
    Corrupt(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Reconciliation store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend read/write failed
    #[error("store I/O error: {0}")]
    Io(String),

    /// Snapshot could not be serialized
    #[error("snapshot serialization failed: {0}")]
    Serialize(String),

    /// Entity id cannot be mapped to a storage key
    #[error("invalid entity id {0:?}")]
    InvalidId(String),

    /// Every attempt failed the post-write integrity check
    #[error("{kind} {id} did not converge after {attempts} attempts")]
    Unconverged {
        /// Entity kind name
        kind: &'static str,
        /// Entity id
        id: String,
        /// Attempts made
        attempts: u32,
    },
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Outbound collaborator failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The call did not finish within its deadline
    #[error("{sink} timed out after {millis} ms")]
    Timeout {
        /// Sink name
        sink: String,
        /// Deadline that elapsed
        millis: u64,
    },

    /// The collaborator refused or failed the request
    #[error("{sink} failed: {reason}")]
    Failed {
        /// Sink name
        sink: String,
        /// Failure detail
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = StoreError::Unconverged {
            kind: "device",
            id: "100".into(),
            attempts: 8,
        };
        assert_eq!(err.to_string(), "device 100 did not converge after 8 attempts");

        let err = StampError::Unstampable {
            device: "100".into(),
            stamp: 42,
        };
        assert!(err.to_string().contains("id 42"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(StoreError::from(io), StoreError::Io(_)));
    }
}
