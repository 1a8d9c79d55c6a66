//! Telecast wire message
//!
//! ## Field Groups
//!
//! | Tags    | Group        | Notes                                         |
//! |---------|--------------|-----------------------------------------------|
//! | 1-8     | identity/time| numeric or string device id, captured-at      |
//! | 10-12   | location     | omitted by stamp-apply uploads                |
//! | 20-22   | environment  | temperature, humidity, pressure               |
//! | 30-32   | battery      | voltage, state of charge, current             |
//! | 40-41   | geiger       | two tube channels, counts per minute          |
//! | 50-53   | pms          | particulate family A                          |
//! | 60-63   | opc          | particulate family B                          |
//! | 70-74   | relay hops   | mesh path, cleared before hashing             |
//! | 80-81   | stamp        | stamp protocol version and id                 |
//!
//! Tags are stable forever. New fields get new tags.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use prost::Message;

use crate::{SchemaError, SchemaResult};

/// Number of relay-hop slots carried by a message
pub const RELAY_HOPS: usize = 5;

/// Declared kind of the transmitting device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DeviceType {
    /// Proto default, treated as "not declared"
    UnknownDeviceType = 0,
    /// Handheld bGeigie Nano
    BgeigieNano = 1,
    /// Solar-powered fixed station
    Solarcast = 2,
    /// Another collector instance
    TtServe = 3,
    /// Phone app console
    TtApp = 4,
    /// LoRa gateway console
    TtGate = 5,
    /// Mesh relay console
    TtRelay = 6,
    /// Air-quality station
    SafecastAir = 7,
}

impl DeviceType {
    /// Whether messages from this kind carry sensor readings
    pub const fn is_sensor(self) -> bool {
        matches!(
            self,
            DeviceType::UnknownDeviceType
                | DeviceType::BgeigieNano
                | DeviceType::Solarcast
                | DeviceType::SafecastAir
        )
    }

    /// Lowercase label written into normalized records
    pub const fn label(self) -> &'static str {
        match self {
            DeviceType::UnknownDeviceType => "unknown",
            DeviceType::BgeigieNano => "bgeigie-nano",
            DeviceType::Solarcast => "solarcast",
            DeviceType::TtServe => "ttserve",
            DeviceType::TtApp => "ttapp",
            DeviceType::TtGate => "ttgate",
            DeviceType::TtRelay => "ttrelay",
            DeviceType::SafecastAir => "safecast-air",
        }
    }
}

/// One decoded Telecast message
///
/// Lives only for the processing of a single sub-message. Every field is
/// optional on the wire; devices send only what they measured.
#[derive(Clone, PartialEq, Message)]
pub struct TelecastMessage {
    /// Declared device kind
    #[prost(enumeration = "DeviceType", optional, tag = "1")]
    pub device_type: Option<i32>,
    /// Numeric device id
    #[prost(uint32, optional, tag = "2")]
    pub device_id: Option<u32>,
    /// String device id, preferred over the numeric form when both are set
    #[prost(string, optional, tag = "3")]
    pub device_id_string: Option<String>,
    /// Free-text message (console devices)
    #[prost(string, optional, tag = "4")]
    pub message: Option<String>,
    /// RFC 3339 capture time
    #[prost(string, optional, tag = "5")]
    pub captured_at: Option<String>,
    /// Capture date as YYMMDD
    #[prost(uint32, optional, tag = "6")]
    pub captured_at_date: Option<u32>,
    /// Capture time as HHMMSS, UTC
    #[prost(uint32, optional, tag = "7")]
    pub captured_at_time: Option<u32>,
    /// Seconds added to the date/time pair
    #[prost(int32, optional, tag = "8")]
    pub captured_at_offset: Option<i32>,

    /// Latitude in degrees
    #[prost(float, optional, tag = "10")]
    pub latitude: Option<f32>,
    /// Longitude in degrees
    #[prost(float, optional, tag = "11")]
    pub longitude: Option<f32>,
    /// Altitude in metres
    #[prost(int32, optional, tag = "12")]
    pub altitude: Option<i32>,

    /// Air temperature, °C
    #[prost(float, optional, tag = "20")]
    pub env_temperature: Option<f32>,
    /// Relative humidity, %
    #[prost(float, optional, tag = "21")]
    pub env_humidity: Option<f32>,
    /// Barometric pressure, Pa
    #[prost(float, optional, tag = "22")]
    pub env_pressure: Option<f32>,

    /// Battery voltage
    #[prost(float, optional, tag = "30")]
    pub bat_voltage: Option<f32>,
    /// Battery state of charge, %
    #[prost(float, optional, tag = "31")]
    pub bat_soc: Option<f32>,
    /// Battery current, mA
    #[prost(float, optional, tag = "32")]
    pub bat_current: Option<f32>,

    /// Geiger tube 0, counts per minute
    #[prost(uint32, optional, tag = "40")]
    pub cpm0: Option<u32>,
    /// Geiger tube 1, counts per minute
    #[prost(uint32, optional, tag = "41")]
    pub cpm1: Option<u32>,

    /// PMS PM1.0, µg/m³
    #[prost(float, optional, tag = "50")]
    pub pms_pm01_0: Option<f32>,
    /// PMS PM2.5, µg/m³
    #[prost(float, optional, tag = "51")]
    pub pms_pm02_5: Option<f32>,
    /// PMS PM10, µg/m³
    #[prost(float, optional, tag = "52")]
    pub pms_pm10_0: Option<f32>,
    /// PMS sampling period, seconds
    #[prost(uint32, optional, tag = "53")]
    pub pms_csecs: Option<u32>,

    /// OPC PM1.0, µg/m³
    #[prost(float, optional, tag = "60")]
    pub opc_pm01_0: Option<f32>,
    /// OPC PM2.5, µg/m³
    #[prost(float, optional, tag = "61")]
    pub opc_pm02_5: Option<f32>,
    /// OPC PM10, µg/m³
    #[prost(float, optional, tag = "62")]
    pub opc_pm10_0: Option<f32>,
    /// OPC sampling period, seconds
    #[prost(uint32, optional, tag = "63")]
    pub opc_csecs: Option<u32>,

    /// First mesh relay
    #[prost(uint32, optional, tag = "70")]
    pub relay_device1: Option<u32>,
    /// Second mesh relay
    #[prost(uint32, optional, tag = "71")]
    pub relay_device2: Option<u32>,
    /// Third mesh relay
    #[prost(uint32, optional, tag = "72")]
    pub relay_device3: Option<u32>,
    /// Fourth mesh relay
    #[prost(uint32, optional, tag = "73")]
    pub relay_device4: Option<u32>,
    /// Fifth mesh relay
    #[prost(uint32, optional, tag = "74")]
    pub relay_device5: Option<u32>,

    /// Stamp protocol version, present only on stamp-set uploads
    #[prost(uint32, optional, tag = "80")]
    pub stamp_version: Option<u32>,
    /// Stamp id, set or referenced
    #[prost(uint32, optional, tag = "81")]
    pub stamp: Option<u32>,
}

impl TelecastMessage {
    /// Decode one sub-message
    pub fn parse(bytes: &[u8]) -> SchemaResult<Self> {
        Ok(<Self as Message>::decode(bytes)?)
    }

    /// Encode to protobuf bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Relay hops in path order
    pub fn relay_hops(&self) -> [Option<u32>; RELAY_HOPS] {
        [
            self.relay_device1,
            self.relay_device2,
            self.relay_device3,
            self.relay_device4,
            self.relay_device5,
        ]
    }

    /// Clear every relay-hop slot
    pub fn strip_relay_hops(&mut self) {
        self.relay_device1 = None;
        self.relay_device2 = None;
        self.relay_device3 = None;
        self.relay_device4 = None;
        self.relay_device5 = None;
    }

    /// CRC32 (IEEE) of the message re-encoded without relay hops
    ///
    /// Identical for every copy of one transmission, whichever relays or
    /// gateways it passed through.
    pub fn dedup_checksum(&self) -> u32 {
        let mut normalized = self.clone();
        normalized.strip_relay_hops();
        crc32fast::hash(&normalized.encode_to_vec())
    }

    /// Declared device kind, `None` when absent or unrecognized
    pub fn declared_type(&self) -> Option<DeviceType> {
        self.device_type
            .and_then(|raw| DeviceType::try_from(raw).ok())
    }

    /// Whether this message belongs on the sensor path
    ///
    /// No declared type counts as a sensor. An unrecognized tag does not.
    pub fn is_sensor(&self) -> bool {
        match self.device_type {
            None => true,
            Some(_) => self.declared_type().is_some_and(DeviceType::is_sensor),
        }
    }

    /// Entity id used for stamp files and snapshots
    pub fn entity_id(&self) -> Option<String> {
        match (&self.device_id_string, self.device_id) {
            (Some(id), _) if !id.is_empty() => Some(id.clone()),
            (_, Some(id)) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Stamp-set upload: carries fresh metadata and a new stamp id
    pub fn is_stamp_set(&self) -> bool {
        self.stamp_version.is_some() && self.stamp.is_some()
    }

    /// Stamp-apply upload: references metadata by stamp id only
    pub fn is_stamp_apply(&self) -> bool {
        self.stamp_version.is_none() && self.stamp.is_some()
    }

    /// Remove stamp fields before the message continues downstream
    pub fn strip_stamp(&mut self) {
        self.stamp_version = None;
        self.stamp = None;
    }

    /// Resolve the capture time
    ///
    /// An RFC 3339 `captured_at` wins; otherwise the date/time pair plus any
    /// offset seconds. `Ok(None)` when the message carries no time at all.
    pub fn resolved_captured_at(&self) -> SchemaResult<Option<DateTime<Utc>>> {
        if let Some(text) = &self.captured_at {
            let parsed = DateTime::parse_from_rfc3339(text)
                .map_err(|e| SchemaError::InvalidTime(format!("{text}: {e}")))?;
            return Ok(Some(parsed.with_timezone(&Utc)));
        }

        let (Some(date), Some(time)) = (self.captured_at_date, self.captured_at_time) else {
            return Ok(None);
        };

        let base = compose_date_time(date, time)?;
        let offset = chrono::Duration::seconds(i64::from(self.captured_at_offset.unwrap_or(0)));
        Ok(Some(base + offset))
    }
}

/// Turn a `YYMMDD` date and `HHMMSS` time into a UTC timestamp
pub fn compose_date_time(date: u32, time: u32) -> SchemaResult<DateTime<Utc>> {
    let (yy, month, day) = (date / 10_000, (date / 100) % 100, date % 100);
    let (hour, minute, second) = (time / 10_000, (time / 100) % 100, time % 100);

    NaiveDate::from_ymd_opt(2000 + yy as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| SchemaError::InvalidTime(format!("date={date:06} time={time:06}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reading() -> TelecastMessage {
        TelecastMessage {
            device_id: Some(100),
            cpm0: Some(31),
            cpm1: Some(29),
            latitude: Some(37.5),
            longitude: Some(140.9),
            ..Default::default()
        }
    }

    #[test]
    fn checksum_ignores_relay_path() {
        let direct = reading();
        let mut relayed = reading();
        relayed.relay_device1 = Some(7);
        relayed.relay_device3 = Some(9);

        assert_ne!(direct.to_bytes(), relayed.to_bytes());
        assert_eq!(direct.dedup_checksum(), relayed.dedup_checksum());
    }

    #[test]
    fn checksum_sees_reading_changes() {
        let a = reading();
        let mut b = reading();
        b.cpm0 = Some(32);
        assert_ne!(a.dedup_checksum(), b.dedup_checksum());
    }

    #[test]
    fn routing_by_declared_type() {
        let mut msg = reading();
        assert!(msg.is_sensor());

        msg.device_type = Some(DeviceType::Solarcast as i32);
        assert!(msg.is_sensor());

        msg.device_type = Some(DeviceType::TtApp as i32);
        assert!(!msg.is_sensor());

        msg.device_type = Some(99);
        assert!(!msg.is_sensor());
        assert_eq!(msg.declared_type(), None);
    }

    #[test]
    fn entity_id_prefers_string_form() {
        let mut msg = reading();
        assert_eq!(msg.entity_id().as_deref(), Some("100"));

        msg.device_id_string = Some("pointcast:10042".into());
        assert_eq!(msg.entity_id().as_deref(), Some("pointcast:10042"));

        msg.device_id_string = Some(String::new());
        assert_eq!(msg.entity_id().as_deref(), Some("100"));

        msg.device_id = None;
        assert_eq!(msg.entity_id(), None);
    }

    #[test]
    fn stamp_kinds() {
        let mut msg = reading();
        assert!(!msg.is_stamp_set() && !msg.is_stamp_apply());

        msg.stamp = Some(42);
        assert!(msg.is_stamp_apply());

        msg.stamp_version = Some(1);
        assert!(msg.is_stamp_set());

        msg.strip_stamp();
        assert_eq!((msg.stamp, msg.stamp_version), (None, None));
    }

    #[test]
    fn date_time_pair_resolves() {
        let msg = TelecastMessage {
            captured_at_date: Some(170405),
            captured_at_time: Some(190807),
            ..Default::default()
        };
        let at = msg.resolved_captured_at().unwrap().unwrap();
        assert_eq!(at.to_rfc3339(), "2017-04-05T19:08:07+00:00");
    }

    #[test]
    fn offset_is_added() {
        let msg = TelecastMessage {
            captured_at_date: Some(170405),
            captured_at_time: Some(235950),
            captured_at_offset: Some(20),
            ..Default::default()
        };
        let at = msg.resolved_captured_at().unwrap().unwrap();
        assert_eq!(at.to_rfc3339(), "2017-04-06T00:00:10+00:00");
    }

    #[test]
    fn rfc3339_wins() {
        let msg = TelecastMessage {
            captured_at: Some("2020-01-02T03:04:05Z".into()),
            captured_at_date: Some(170405),
            captured_at_time: Some(190807),
            ..Default::default()
        };
        let at = msg.resolved_captured_at().unwrap().unwrap();
        assert_eq!(at.to_rfc3339(), "2020-01-02T03:04:05+00:00");
    }

    #[test]
    fn invalid_date_rejected() {
        assert!(compose_date_time(171345, 120000).is_err());
        assert!(compose_date_time(170405, 250000).is_err());
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(TelecastMessage::parse(&[0xFF, 0xFF, 0xFF]).is_err());
    }

    proptest! {
        #[test]
        fn any_relay_path_hashes_the_same(
            hops in proptest::collection::vec(proptest::option::of(any::<u32>()), RELAY_HOPS)
        ) {
            let mut relayed = reading();
            relayed.relay_device1 = hops[0];
            relayed.relay_device2 = hops[1];
            relayed.relay_device3 = hops[2];
            relayed.relay_device4 = hops[3];
            relayed.relay_device5 = hops[4];
            prop_assert_eq!(relayed.dedup_checksum(), reading().dedup_checksum());
        }
    }
}
