//! Collector configuration
//!
//! One TOML file, every key optional. Listener sections enable their
//! listener by being present; everything else falls back to the constants in
//! `telecast_core::constants`.
//!
//! ```toml
//! log_level = "info"
//!
//! [intake]
//! mode = "http"
//!
//! [udp]
//! bind = "0.0.0.0:8081"
//!
//! [http]
//! bind = "0.0.0.0:8080"
//!
//! [store]
//! data_dir = "/var/lib/telecast"
//!
//! [export]
//! url = "https://ingest.example.com/measurements"
//! auth = { kind = "bearer", token = "..." }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use telecast_connectors::export::{AuthMethod, HttpExportConfig};
use telecast_connectors::mqtt::MqttConfig;
use telecast_connectors::stream::TcpConfig;
use telecast_connectors::udp::UdpConfig;
use telecast_connectors::web::HttpListenerConfig;
use telecast_core::constants::{
    DEDUP_WINDOW_SECS, DEVICE_STALE_AFTER_MINS, EXPORT_FAILURE_ALERT_THRESHOLD,
    EXPORT_TIMEOUT_SECS, HEARTBEAT_INTERVAL_SECS, PEER_STALE_AFTER_MINS,
    RECONCILE_JITTER_MAX_MS, RECONCILE_MAX_ATTEMPTS, RECONCILE_VERIFY_DELAY_MS,
    STALENESS_SCAN_INTERVAL_SECS,
};
use telecast_core::store::ReconcilePolicy;
use telecast_core::IntakeMode;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but make no sense together
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete collector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Default log filter; `RUST_LOG` wins when set
    pub log_level: String,
    /// Intake queue sizing
    pub intake: IntakeSection,
    /// UDP datagram listener
    pub udp: Option<UdpConfig>,
    /// TCP stream listener
    pub tcp: Option<TcpConfig>,
    /// HTTP upload listener
    pub http: Option<HttpListenerConfig>,
    /// MQTT broker subscription
    pub mqtt: Option<MqttConfig>,
    /// Snapshot store
    pub store: StoreSection,
    /// Duplicate suppression
    pub dedup: DedupSection,
    /// Staleness thresholds and scan cadence
    pub staleness: StalenessSection,
    /// Downstream record export
    pub export: Option<ExportSection>,
    /// Operator alerts
    pub alerts: AlertsSection,
    /// This instance
    pub server: ServerSection,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            intake: IntakeSection::default(),
            udp: None,
            tcp: None,
            http: None,
            mqtt: None,
            store: StoreSection::default(),
            dedup: DedupSection::default(),
            staleness: StalenessSection::default(),
            export: None,
            alerts: AlertsSection::default(),
            server: ServerSection::default(),
        }
    }
}

/// `[intake]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSection {
    /// Deployment flavour
    pub mode: IntakeMode,
    /// Overrides the mode's default capacity
    pub capacity: Option<usize>,
}

impl IntakeSection {
    /// Effective queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity.unwrap_or_else(|| self.mode.capacity())
    }
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Root of snapshot and stamp files
    pub data_dir: PathBuf,
    /// Upper bound of the random delay before each read
    pub jitter_max_ms: u64,
    /// Pause between write and verification read
    pub verify_delay_ms: u64,
    /// Write cycles before giving up
    pub max_attempts: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            jitter_max_ms: RECONCILE_JITTER_MAX_MS,
            verify_delay_ms: RECONCILE_VERIFY_DELAY_MS,
            max_attempts: RECONCILE_MAX_ATTEMPTS,
        }
    }
}

impl StoreSection {
    /// Reconcile timing
    pub fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            jitter_max: Duration::from_millis(self.jitter_max_ms),
            verify_delay: Duration::from_millis(self.verify_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// `[dedup]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    /// How long a checksum suppresses repeats
    pub window_secs: i64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            window_secs: DEDUP_WINDOW_SECS,
        }
    }
}

/// `[staleness]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessSection {
    /// Devices
    pub device_after_mins: i64,
    /// Gateways and collector peers
    pub peer_after_mins: i64,
    /// Snapshot directory scan cadence
    pub scan_interval_secs: u64,
}

impl Default for StalenessSection {
    fn default() -> Self {
        Self {
            device_after_mins: DEVICE_STALE_AFTER_MINS,
            peer_after_mins: PEER_STALE_AFTER_MINS,
            scan_interval_secs: STALENESS_SCAN_INTERVAL_SECS,
        }
    }
}

impl StalenessSection {
    /// Device threshold
    pub fn device_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.device_after_mins)
    }

    /// Gateway and peer threshold
    pub fn peer_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.peer_after_mins)
    }
}

/// `[export]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    /// Endpoint receiving each record
    pub url: String,
    /// Authentication
    pub auth: AuthMethod,
    /// Per-record deadline
    pub timeout_secs: u64,
    /// Consecutive failures before one alert
    pub failure_alert_threshold: u32,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth: AuthMethod::None,
            timeout_secs: EXPORT_TIMEOUT_SECS,
            failure_alert_threshold: EXPORT_FAILURE_ALERT_THRESHOLD,
        }
    }
}

impl ExportSection {
    /// Connector settings for this section
    pub fn http_config(&self) -> HttpExportConfig {
        HttpExportConfig::new(self.url.clone())
            .auth(self.auth.clone())
            .timeout_secs(self.timeout_secs)
    }
}

/// `[alerts]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    /// Chat webhook; alerts are only logged when absent
    pub webhook_url: Option<String>,
    /// Also post command-path messages to the webhook
    pub commands: bool,
    /// Per-post deadline
    pub timeout_secs: u64,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            commands: true,
            timeout_secs: EXPORT_TIMEOUT_SECS,
        }
    }
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Snapshot id of this instance
    pub instance_id: String,
    /// Heartbeat cadence
    pub heartbeat_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            instance_id: "collector".into(),
            heartbeat_secs: HEARTBEAT_INTERVAL_SECS,
        }
    }
}

impl CollectorConfig {
    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the collector cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intake.capacity() == 0 {
            return Err(ConfigError::Invalid("intake capacity must be at least 1".into()));
        }
        if self.store.max_attempts == 0 {
            return Err(ConfigError::Invalid("store.max_attempts must be at least 1".into()));
        }
        if self.dedup.window_secs <= 0 {
            return Err(ConfigError::Invalid("dedup.window_secs must be positive".into()));
        }
        if self.staleness.device_after_mins <= 0 || self.staleness.peer_after_mins <= 0 {
            return Err(ConfigError::Invalid("staleness thresholds must be positive".into()));
        }
        if self.staleness.scan_interval_secs == 0 || self.server.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("task intervals must be at least one second".into()));
        }
        if self.server.instance_id.is_empty()
            || self.server.instance_id.contains(['/', '\\'])
            || self.server.instance_id.starts_with('.')
        {
            return Err(ConfigError::Invalid(format!(
                "server.instance_id {:?} is not usable as a snapshot id",
                self.server.instance_id
            )));
        }
        if let Some(export) = &self.export {
            if export.url.is_empty() {
                return Err(ConfigError::Invalid("export.url is required".into()));
            }
        }
        Ok(())
    }

    /// True when at least one listener section is present
    pub fn has_listeners(&self) -> bool {
        self.udp.is_some() || self.tcp.is_some() || self.http.is_some() || self.mqtt.is_some()
    }
}
