//! Transport-normalized inbound request

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telecast_schemas::GatewayReception;

/// Reception metadata supplied by a gateway alongside the payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayHints {
    /// Gateway id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Gateway latitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f32>,
    /// Gateway longitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f32>,
    /// Gateway altitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<i32>,
    /// Signal-to-noise ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    /// Free-form location label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl GatewayHints {
    /// Whether any hint is present
    pub fn is_empty(&self) -> bool {
        *self == GatewayHints::default()
    }

    /// Reception block for a normalized record
    pub fn reception(&self) -> Option<GatewayReception> {
        if self.is_empty() {
            return None;
        }
        Some(GatewayReception {
            id: self.id.clone(),
            lat: self.lat,
            lon: self.lon,
            alt: self.alt,
            snr: self.snr,
            location: self.location.clone(),
        })
    }
}

/// One inbound transmission, as handed from a listener to the intake queue
///
/// Consumed exactly once by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    /// Raw payload bytes, single or bulk
    pub payload: Vec<u8>,
    /// Gateway-supplied hints
    pub hints: GatewayHints,
    /// Transport label, e.g. `device-udp:1.2.3.4`
    pub transport: String,
    /// Server receipt time
    pub received_at: DateTime<Utc>,
    /// Intake sequence number, assigned on enqueue
    pub sequence: u64,
}

impl IncomingRequest {
    /// A request with no hints; the sequence is assigned by the queue
    pub fn new(payload: Vec<u8>, transport: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            hints: GatewayHints::default(),
            transport: transport.into(),
            received_at,
            sequence: 0,
        }
    }

    /// Attach gateway hints
    pub fn with_hints(mut self, hints: GatewayHints) -> Self {
        self.hints = hints;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hints_give_no_reception() {
        assert!(GatewayHints::default().reception().is_none());

        let hints = GatewayHints {
            id: Some("gw-1".into()),
            snr: Some(9.5),
            ..Default::default()
        };
        let reception = hints.reception().unwrap();
        assert_eq!(reception.id.as_deref(), Some("gw-1"));
        assert_eq!(reception.snr, Some(9.5));
    }
}
