//! Whole collector over real sockets and a temp data directory

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use telecast_collector::{assemble, CollectorConfig};
use telecast_connectors::udp::UdpConfig;
use telecast_core::SystemClock;
use telecast_schemas::TelecastMessage;
use tokio_util::sync::CancellationToken;

fn config(dir: &Path, capacity: Option<usize>) -> CollectorConfig {
    let mut config = CollectorConfig::default();
    config.udp = Some(UdpConfig {
        bind: "127.0.0.1:0".into(),
        ..Default::default()
    });
    config.intake.capacity = capacity;
    config.store.data_dir = dir.to_path_buf();
    config.store.jitter_max_ms = 0;
    config.store.verify_delay_ms = 0;
    config.server.instance_id = "test-a".into();
    config
}

async fn wait_for(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{} never appeared", path.display());
}

async fn send_reading(addr: std::net::SocketAddr) {
    let message = TelecastMessage {
        device_id: Some(100),
        cpm0: Some(31),
        ..Default::default()
    };
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&message.to_bytes(), addr).await.unwrap();
}

fn udp_addr(collector: &telecast_collector::Collector) -> std::net::SocketAddr {
    collector
        .bound()
        .iter()
        .find(|(name, _)| name == "udp")
        .map(|(_, addr)| *addr)
        .unwrap()
}

#[tokio::test]
async fn datagram_lands_in_the_store_and_shutdown_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let collector = assemble(&config(dir.path(), None), Arc::new(SystemClock), shutdown.clone())
        .await
        .unwrap();
    let addr = udp_addr(&collector);
    let running = tokio::spawn(collector.run());

    send_reading(addr).await;

    let device: PathBuf = dir.path().join("device").join("100.json");
    wait_for(&device).await;
    wait_for(&dir.path().join("value").join("100.json")).await;
    wait_for(&dir.path().join("server").join("test-a.json")).await;

    let snapshot: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&device).unwrap()).unwrap();
    assert_eq!(snapshot["current"]["geiger"]["cpm0"], 31);

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn breaker_trip_exits_with_error_after_draining() {
    let dir = tempfile::tempdir().unwrap();
    let collector = assemble(
        &config(dir.path(), Some(1)),
        Arc::new(SystemClock),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let addr = udp_addr(&collector);
    let running = tokio::spawn(collector.run());

    send_reading(addr).await;

    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap();
    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("saturated"));

    // The request that tripped the breaker was still processed.
    assert!(dir.path().join("device").join("100.json").exists());
}
