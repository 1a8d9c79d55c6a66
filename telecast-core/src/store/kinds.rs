//! Entity kinds reconciled by the collector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telecast_schemas::SensorRecord;

use super::merge::overlay_fields;
use super::{Category, EntityKind, Mergeable};
use crate::pipeline::PipelineCounters;
use crate::queue::QueueCounters;

/// Per-device snapshots: the full record, every category tracked
#[derive(Debug, Clone, Copy)]
pub struct DeviceKind;

impl EntityKind for DeviceKind {
    type Current = SensorRecord;
    const NAME: &'static str = "device";
    const CATEGORIES: &'static [Category] = &Category::ALL;
}

/// Measurement-only projection used by value consumers
///
/// Same record type as [`DeviceKind`], minus collector and gateway metadata,
/// so readers of the `value` directory see only what the device measured.
#[derive(Debug, Clone, Copy)]
pub struct AggregateKind;

impl EntityKind for AggregateKind {
    type Current = SensorRecord;
    const NAME: &'static str = "value";
    const CATEGORIES: &'static [Category] = &Category::ALL;

    fn prepare(mut update: SensorRecord) -> SensorRecord {
        update.service = None;
        update.gateway = None;
        update
    }
}

/// Last-known state of a receiving gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Latitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f32>,
    /// Longitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f32>,
    /// Altitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<i32>,
    /// Location label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// SNR of the latest reception
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    /// Transport that carried the latest reception
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transport: Option<String>,
    /// When the gateway last relayed anything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Mergeable for GatewayStatus {
    fn overlay(&mut self, update: &Self) {
        overlay_fields!(self, update; lat, lon, alt, location, snr, last_transport, last_seen);
    }

    fn project(&self, category: Category) -> Self {
        match category {
            Category::Location => GatewayStatus {
                lat: self.lat,
                lon: self.lon,
                alt: self.alt,
                location: self.location.clone(),
                ..Default::default()
            },
            _ => GatewayStatus::default(),
        }
    }
}

/// Gateways: location tracked
#[derive(Debug, Clone, Copy)]
pub struct GatewayKind;

impl EntityKind for GatewayKind {
    type Current = GatewayStatus;
    const NAME: &'static str = "gateway";
    const CATEGORIES: &'static [Category] = &[Category::Location];
}

/// Heartbeat of one collector instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Instance id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Process start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Latest heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Build version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Pipeline counters at the heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineCounters>,
    /// Intake queue counters at the heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueCounters>,
}

impl Mergeable for ServerStatus {
    fn overlay(&mut self, update: &Self) {
        overlay_fields!(self, update; instance_id, started_at, last_heartbeat, version, pipeline, queue);
    }

    fn project(&self, _category: Category) -> Self {
        ServerStatus::default()
    }
}

/// Collector instances: no history
#[derive(Debug, Clone, Copy)]
pub struct ServerKind;

impl EntityKind for ServerKind {
    type Current = ServerStatus;
    const NAME: &'static str = "server";
    const CATEGORIES: &'static [Category] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;
    use telecast_schemas::record::{GatewayReception, ServiceInfo};

    #[test]
    fn aggregate_drops_collector_metadata() {
        let record = SensorRecord {
            device_id: Some(3),
            gateway: Some(GatewayReception::default()),
            service: Some(ServiceInfo::default()),
            ..Default::default()
        };
        let prepared = AggregateKind::prepare(record);
        assert_eq!(prepared.device_id, Some(3));
        assert!(prepared.gateway.is_none());
        assert!(prepared.service.is_none());
    }

    #[test]
    fn gateway_location_projection() {
        let status = GatewayStatus {
            lat: Some(1.0),
            snr: Some(7.5),
            ..Default::default()
        };
        let projected = status.project(Category::Location);
        assert_eq!(projected.lat, Some(1.0));
        assert_eq!(projected.snr, None);
        assert_eq!(status.project(Category::Geiger), GatewayStatus::default());
    }

    #[test]
    fn server_heartbeat_overlays() {
        let mut status = ServerStatus {
            instance_id: Some("a".into()),
            version: Some("0.1.0".into()),
            ..Default::default()
        };
        status.overlay(&ServerStatus {
            last_heartbeat: Some(Utc::now()),
            ..Default::default()
        });
        assert_eq!(status.instance_id.as_deref(), Some("a"));
        assert!(status.last_heartbeat.is_some());
    }
}
