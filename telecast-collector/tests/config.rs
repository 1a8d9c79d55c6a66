//! Configuration parsing

use std::io::Write;
use std::path::PathBuf;

use telecast_collector::{CollectorConfig, ConfigError};
use telecast_connectors::export::AuthMethod;
use telecast_core::IntakeMode;

#[test]
fn empty_file_is_all_defaults() {
    let config = CollectorConfig::from_toml("").unwrap();
    assert_eq!(config, CollectorConfig::default());
    assert_eq!(config.intake.capacity(), 100);
    assert_eq!(config.staleness.device_after_mins, 90);
    assert_eq!(config.staleness.peer_after_mins, 10);
    assert_eq!(config.dedup.window_secs, 60);
    assert!(!config.has_listeners());
    assert!(config.export.is_none());
}

#[test]
fn shipped_sample_parses() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("telecast.toml");
    let config = CollectorConfig::load(path).unwrap();

    assert_eq!(config.udp.as_ref().map(|u| u.bind.as_str()), Some("0.0.0.0:8081"));
    assert_eq!(config.tcp.as_ref().map(|t| t.read_timeout_secs), Some(30));
    assert_eq!(config.http.as_ref().map(|h| h.max_body), Some(262_144));
    assert!(config.mqtt.is_none());
    assert_eq!(config.server.instance_id, "collector-1");

    let export = config.export.unwrap();
    assert_eq!(
        export.auth,
        AuthMethod::Bearer {
            token: "change-me".into()
        }
    );
    assert_eq!(export.failure_alert_threshold, 5);
}

#[test]
fn broker_mode_shrinks_the_queue() {
    let config = CollectorConfig::from_toml(
        r#"
        [intake]
        mode = "broker"

        [mqtt]
        broker_url = "mqtt://broker.local:1883"
        topic = "fleet/+/up"
        "#,
    )
    .unwrap();
    assert_eq!(config.intake.mode, IntakeMode::Broker);
    assert_eq!(config.intake.capacity(), 25);

    let mqtt = config.mqtt.unwrap();
    assert_eq!(mqtt.topic, "fleet/+/up");
    assert_eq!(mqtt.qos, 1);
}

#[test]
fn partial_sections_keep_other_defaults() {
    let config = CollectorConfig::from_toml(
        r#"
        [store]
        data_dir = "/srv/telecast"

        [staleness]
        device_after_mins = 30
        "#,
    )
    .unwrap();
    assert_eq!(config.store.data_dir, PathBuf::from("/srv/telecast"));
    assert_eq!(config.store.max_attempts, 8);
    assert_eq!(config.staleness.device_after_mins, 30);
    assert_eq!(config.staleness.peer_after_mins, 10);
}

#[test]
fn nonsense_values_are_rejected() {
    for text in [
        "[intake]\ncapacity = 0",
        "[store]\nmax_attempts = 0",
        "[dedup]\nwindow_secs = 0",
        "[server]\ninstance_id = \"a/b\"",
        "[export]\ntimeout_secs = 3",
    ] {
        assert!(
            matches!(CollectorConfig::from_toml(text), Err(ConfigError::Invalid(_))),
            "accepted: {text}"
        );
    }
}

#[test]
fn syntax_errors_are_parse_errors() {
    assert!(matches!(
        CollectorConfig::from_toml("[intake\nmode = 1"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        CollectorConfig::from_toml("[intake]\nmode = \"carrier-pigeon\""),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = CollectorConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));

    let present = dir.path().join("present.toml");
    let mut file = std::fs::File::create(&present).unwrap();
    writeln!(file, "log_level = \"debug\"").unwrap();
    assert_eq!(CollectorConfig::load(&present).unwrap().log_level, "debug");
}
