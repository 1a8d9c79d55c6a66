//! Shared helpers for telecast-core integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use telecast_core::pipeline::Pipeline;
use telecast_core::sink::{ExportChannel, RecordingSink};
use telecast_core::store::{EntitySnapshot, FileBackend, ReconcilePolicy};
use telecast_core::time::FixedClock;
use telecast_core::IncomingRequest;
use telecast_schemas::{SensorRecord, TelecastMessage};

/// A fixed start instant shared by the tests
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 5, 12, 0, 0).unwrap()
}

/// Pipeline over a temp data dir with no store delays and a recording sink
pub fn pipeline(dir: &Path, clock: &FixedClock, sink: &Arc<RecordingSink>) -> Pipeline {
    pipeline_with_policy(dir, clock, sink, ReconcilePolicy::immediate())
}

/// Like [`pipeline`], with explicit store timing
pub fn pipeline_with_policy(
    dir: &Path,
    clock: &FixedClock,
    sink: &Arc<RecordingSink>,
    policy: ReconcilePolicy,
) -> Pipeline {
    Pipeline::builder()
        .data_dir(dir)
        .backend(Arc::new(FileBackend::new(dir)))
        .clock(Arc::new(clock.clone()))
        .reconcile_policy(policy)
        .export(ExportChannel::new(sink.clone(), sink.clone()))
        .command_sink(sink.clone())
        .alert_sink(sink.clone())
        .build()
}

/// UDP-style request carrying `payload`
pub fn request(payload: Vec<u8>, clock: &FixedClock) -> IncomingRequest {
    use telecast_core::Clock;
    IncomingRequest::new(payload, "device-udp:192.0.2.10", clock.now())
}

/// Plain radiation reading
pub fn reading(device: u32, cpm: u32) -> TelecastMessage {
    TelecastMessage {
        device_id: Some(device),
        cpm0: Some(cpm),
        ..Default::default()
    }
}

/// Reading that also reports a position
pub fn located_reading(device: u32, cpm: u32, lat: f32) -> TelecastMessage {
    TelecastMessage {
        latitude: Some(lat),
        longitude: Some(140.9),
        ..reading(device, cpm)
    }
}

/// Stamp Set carrying full metadata
pub fn stamp_set(device: u32, stamp: u32) -> TelecastMessage {
    TelecastMessage {
        device_id: Some(device),
        stamp_version: Some(1),
        stamp: Some(stamp),
        latitude: Some(37.5),
        longitude: Some(140.9),
        captured_at_date: Some(170405),
        captured_at_time: Some(190807),
        cpm0: Some(30),
        ..Default::default()
    }
}

/// Stamp Apply referencing `stamp`
pub fn stamp_apply(device: u32, stamp: u32, cpm: u32) -> TelecastMessage {
    TelecastMessage {
        device_id: Some(device),
        stamp: Some(stamp),
        cpm0: Some(cpm),
        ..Default::default()
    }
}

/// Read a snapshot file straight from disk
pub fn read_snapshot(dir: &Path, kind: &str, id: &str) -> EntitySnapshot<SensorRecord> {
    let raw = std::fs::read(dir.join(kind).join(format!("{id}.json"))).unwrap();
    serde_json::from_slice(&raw).unwrap()
}
