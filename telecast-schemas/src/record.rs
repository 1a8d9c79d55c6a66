//! Normalized sensor record
//!
//! The JSON shape written to snapshots and export sinks. Every group is
//! optional: a record carries only what its source message measured, and
//! absent groups are omitted from the JSON entirely so that merging a record
//! into a snapshot never erases earlier values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wire::TelecastMessage;

/// Position of a device or gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f32>,
    /// Longitude in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f32>,
    /// Altitude in metres
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<i32>,
}

/// Ambient environment readings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Temperature, °C
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f32>,
    /// Relative humidity, %
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humid: Option<f32>,
    /// Pressure, Pa
    #[serde(skip_serializing_if = "Option::is_none")]
    pub press: Option<f32>,
}

/// Battery state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    /// Voltage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f32>,
    /// State of charge, %
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soc: Option<f32>,
    /// Current, mA
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f32>,
}

/// Geiger tube counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geiger {
    /// Tube 0, counts per minute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpm0: Option<u32>,
    /// Tube 1, counts per minute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpm1: Option<u32>,
}

/// Particulate counter readings (shared by the PMS and OPC families)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Particulate {
    /// PM1.0, µg/m³
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm01_0: Option<f32>,
    /// PM2.5, µg/m³
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm02_5: Option<f32>,
    /// PM10, µg/m³
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pm10_0: Option<f32>,
    /// Sampling period, seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csecs: Option<u32>,
}

/// How a gateway heard the transmission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayReception {
    /// Gateway id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Gateway latitude
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f32>,
    /// Gateway longitude
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f32>,
    /// Gateway altitude
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<i32>,
    /// Signal-to-noise ratio of the reception
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    /// Free-form location label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Collector-side metadata about how the record arrived
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// When the collector received the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Transport label, e.g. `device-udp:10.0.0.5`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    /// Dedup checksum, hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Intake sequence number of the carrying request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// One normalized reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Numeric device id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
    /// String device id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_sn: Option<String>,
    /// Device kind label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Resolved capture time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    /// Device position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<Location>,
    /// Environment readings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Environment>,
    /// Battery state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bat: Option<Battery>,
    /// Geiger counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geiger: Option<Geiger>,
    /// PMS particulate readings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pms: Option<Particulate>,
    /// OPC particulate readings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opc: Option<Particulate>,
    /// Receiving gateway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayReception>,
    /// Collector metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceInfo>,
    /// Capture time and location came from a degraded stamp match
    #[serde(skip)]
    pub approximated: bool,
}

impl SensorRecord {
    /// Build a record from a decoded message and its resolved capture time
    pub fn from_message(msg: &TelecastMessage, captured_at: Option<DateTime<Utc>>) -> Self {
        let loc = Location {
            lat: msg.latitude,
            lon: msg.longitude,
            alt: msg.altitude,
        };
        let env = Environment {
            temp: msg.env_temperature,
            humid: msg.env_humidity,
            press: msg.env_pressure,
        };
        let bat = Battery {
            voltage: msg.bat_voltage,
            soc: msg.bat_soc,
            current: msg.bat_current,
        };
        let geiger = Geiger {
            cpm0: msg.cpm0,
            cpm1: msg.cpm1,
        };
        let pms = Particulate {
            pm01_0: msg.pms_pm01_0,
            pm02_5: msg.pms_pm02_5,
            pm10_0: msg.pms_pm10_0,
            csecs: msg.pms_csecs,
        };
        let opc = Particulate {
            pm01_0: msg.opc_pm01_0,
            pm02_5: msg.opc_pm02_5,
            pm10_0: msg.opc_pm10_0,
            csecs: msg.opc_csecs,
        };

        SensorRecord {
            device_id: msg.device_id,
            device_sn: msg.device_id_string.clone().filter(|s| !s.is_empty()),
            device_type: msg.declared_type().map(|t| t.label().to_string()),
            captured_at,
            loc: non_empty(loc),
            env: non_empty(env),
            bat: non_empty(bat),
            geiger: non_empty(geiger),
            pms: non_empty(pms),
            opc: non_empty(opc),
            gateway: None,
            service: None,
            approximated: false,
        }
    }

    /// Entity id, string form preferred
    pub fn entity_id(&self) -> Option<String> {
        self.device_sn
            .clone()
            .or_else(|| self.device_id.map(|id| id.to_string()))
    }
}

fn non_empty<T: Default + PartialEq>(group: T) -> Option<T> {
    (group != T::default()).then_some(group)
}
