//! Chat-style webhook for operator alerts and command-path messages
//!
//! Posts `{"text": "..."}`, the shape accepted by the common incoming-webhook
//! integrations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use telecast_core::errors::SinkError;
use telecast_core::{AlertSink, CommandMessage, CommandSink};

use crate::export::{check_url, post_json};
use crate::ConnectorError;

#[derive(Serialize)]
struct WebhookText<'a> {
    text: &'a str,
}

/// Webhook sink for alerts and commands
#[derive(Clone)]
pub struct WebhookAlertSink {
    url: Arc<str>,
    agent: ureq::Agent,
}

impl WebhookAlertSink {
    /// Sink posting to `url`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConnectorError> {
        let url = url.into();
        check_url(&url)?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            url: url.into(),
            agent,
        })
    }

    async fn post(&self, text: &str) -> Result<(), SinkError> {
        let failed = |reason: String| SinkError::Failed {
            sink: "webhook".into(),
            reason,
        };
        let body = serde_json::to_string(&WebhookText { text }).map_err(|e| failed(e.to_string()))?;
        post_json(self.agent.clone(), self.url.to_string(), Vec::new(), body)
            .await
            .map_err(failed)
    }
}

/// One-line rendering of a command-path message
pub fn command_text(command: &CommandMessage) -> String {
    let device = command.device.as_deref().unwrap_or("unknown device");
    match &command.device_type {
        Some(kind) => format!("{kind} {device} via {}: {}", command.transport, command.text),
        None => format!("{device} via {}: {}", command.transport, command.text),
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn alert(&self, text: &str) -> Result<(), SinkError> {
        self.post(text).await
    }
}

#[async_trait]
impl CommandSink for WebhookAlertSink {
    async fn deliver(&self, command: &CommandMessage) -> Result<(), SinkError> {
        self.post(&command_text(command)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_rendering() {
        let command = CommandMessage {
            device: Some("2044".into()),
            device_type: Some("ttapp".into()),
            text: "hello".into(),
            transport: "device-http:phone".into(),
        };
        assert_eq!(command_text(&command), "ttapp 2044 via device-http:phone: hello");

        let anonymous = CommandMessage {
            device: None,
            device_type: None,
            ..command
        };
        assert_eq!(
            command_text(&anonymous),
            "unknown device via device-http:phone: hello"
        );
    }

    #[test]
    fn rejects_relative_url() {
        assert!(WebhookAlertSink::new("/hooks/x", Duration::from_secs(1)).is_err());
    }
}
