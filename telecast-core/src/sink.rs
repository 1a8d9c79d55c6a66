//! Outbound collaborator interfaces
//!
//! The pipeline hands accepted records to export sinks, plain-text notices to
//! an alert sink, and non-sensor messages to a command sink. Concrete HTTP
//! implementations live in `telecast-connectors`; this module holds the
//! traits, the timeout/failure-run wrapper, and log-only defaults.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use telecast_schemas::SensorRecord;

use crate::constants::{EXPORT_FAILURE_ALERT_THRESHOLD, EXPORT_TIMEOUT_SECS};
use crate::errors::SinkError;

/// Non-sensor message routed to the command path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Sending device, when identified
    pub device: Option<String>,
    /// Declared device kind label
    pub device_type: Option<String>,
    /// Message text
    pub text: String,
    /// Transport label of the carrying request
    pub transport: String,
}

/// Receives normalized records
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Name for logs and alerts
    fn name(&self) -> &str;

    /// Deliver one record
    async fn export(&self, record: &SensorRecord) -> Result<(), SinkError>;
}

/// Receives operator notifications
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one notice
    async fn alert(&self, text: &str) -> Result<(), SinkError>;
}

/// Receives command-path messages
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Deliver one command
    async fn deliver(&self, command: &CommandMessage) -> Result<(), SinkError>;
}

/// Alerts written to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn alert(&self, text: &str) -> Result<(), SinkError> {
        log::warn!("alert: {text}");
        Ok(())
    }
}

/// Commands written to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCommandSink;

#[async_trait]
impl CommandSink for LogCommandSink {
    async fn deliver(&self, command: &CommandMessage) -> Result<(), SinkError> {
        log::info!(
            "command device={} transport={}: {}",
            command.device.as_deref().unwrap_or("?"),
            command.transport,
            command.text
        );
        Ok(())
    }
}

/// Sink that keeps everything it receives; for tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<SensorRecord>>,
    alerts: Mutex<Vec<String>>,
    commands: Mutex<Vec<CommandMessage>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every export fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Delay every export
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.delay.lock() {
            *guard = delay;
        }
    }

    /// Exported records so far
    pub fn records(&self) -> Vec<SensorRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Alerts so far
    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Commands so far
    pub fn commands(&self) -> Vec<CommandMessage> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExportSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn export(&self, record: &SensorRecord) -> Result<(), SinkError> {
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(SinkError::Failed {
                sink: self.name().to_string(),
                reason: "configured to fail".into(),
            });
        }
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn alert(&self, text: &str) -> Result<(), SinkError> {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(text.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn deliver(&self, command: &CommandMessage) -> Result<(), SinkError> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }
        Ok(())
    }
}

/// Export sink wrapped with a hard timeout and failure-run alerting
///
/// A run of `alert_after` consecutive failures raises exactly one alert; the
/// next success ends the run.
pub struct ExportChannel {
    sink: Arc<dyn ExportSink>,
    alerts: Arc<dyn AlertSink>,
    timeout: Duration,
    alert_after: u32,
    consecutive: AtomicU32,
    failures: AtomicU64,
}

impl ExportChannel {
    /// Wrap `sink` with the default timeout and alert threshold
    pub fn new(sink: Arc<dyn ExportSink>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            alerts,
            timeout: Duration::from_secs(EXPORT_TIMEOUT_SECS),
            alert_after: EXPORT_FAILURE_ALERT_THRESHOLD,
            consecutive: AtomicU32::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Set the per-call deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the failure run that raises an alert
    pub fn alert_after(mut self, failures: u32) -> Self {
        self.alert_after = failures.max(1);
        self
    }

    /// Sink name
    pub fn name(&self) -> &str {
        self.sink.name()
    }

    /// Total failures since start
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Current consecutive failure run
    pub fn failure_run(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }

    /// Export one record
    pub async fn send(&self, record: &SensorRecord) -> Result<(), SinkError> {
        let result = match tokio::time::timeout(self.timeout, self.sink.export(record)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                sink: self.name().to_string(),
                millis: self.timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(()) => {
                let run = self.consecutive.swap(0, Ordering::Relaxed);
                if run >= self.alert_after {
                    log::info!("export {} recovered after {run} failures", self.name());
                }
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let run = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("export {} failed ({run} in a row): {e}", self.name());
                if run == self.alert_after {
                    let text = format!(
                        "export {} has failed {run} times in a row, latest: {e}",
                        self.name()
                    );
                    log::error!("{text}");
                    if let Err(alert_err) = self.alerts.alert(&text).await {
                        log::error!("alert delivery failed: {alert_err}");
                    }
                }
            }
        }
        result
    }
}
