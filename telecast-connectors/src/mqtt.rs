//! MQTT broker subscription
//!
//! Used by the broker-integrated deployment. Subscribes to one topic filter
//! and forwards every publish as one transmission labelled `broker:<topic>`.
//! Connection errors end the session; the listener waits `retry_delay_secs`
//! and reconnects until shutdown.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use telecast_core::errors::IntakeError;
use telecast_core::GatewayHints;
use tokio_util::sync::CancellationToken;

use crate::{ConnectorError, Intake, Listener};

/// MQTT listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// `mqtt://host:port`, `tcp://host:port` or `host:port`
    pub broker_url: String,
    /// Client id presented to the broker
    pub client_id: String,
    /// Topic filter to subscribe to
    pub topic: String,
    /// Subscription QoS (0, 1 or 2)
    pub qos: u8,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Pause between reconnect attempts in seconds
    pub retry_delay_secs: u64,
    /// Optional credentials
    pub username: Option<String>,
    /// Optional credentials
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".into(),
            client_id: "telecast-collector".into(),
            topic: "telecast/+/up".into(),
            qos: 1,
            keep_alive_secs: 30,
            retry_delay_secs: 5,
            username: None,
            password: None,
        }
    }
}

impl MqttConfig {
    fn qos(&self) -> Result<QoS, ConnectorError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ConnectorError::Config(format!("invalid MQTT QoS {other}"))),
        }
    }
}

/// Parse `mqtt://host:port`, `tcp://host:port` or `host:port`
pub fn parse_broker_url(url: &str) -> Result<(String, u16), ConnectorError> {
    let rest = url
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://");

    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| ConnectorError::Config(format!("broker url {url} has no port")))?;
    if host.is_empty() {
        return Err(ConnectorError::Config(format!("broker url {url} has no host")));
    }
    let port = port
        .parse()
        .map_err(|_| ConnectorError::Config(format!("broker url {url} has an invalid port")))?;
    Ok((host.to_string(), port))
}

/// Transport label for a publish on `topic`
pub fn transport_label(topic: &str) -> String {
    format!("broker:{topic}")
}

/// Broker subscriber
pub struct MqttListener {
    config: MqttConfig,
    intake: Intake,
}

impl MqttListener {
    /// Validate settings; nothing connects until [`Listener::run`]
    pub fn new(config: MqttConfig, intake: Intake) -> Result<Self, ConnectorError> {
        parse_broker_url(&config.broker_url)?;
        config.qos()?;
        Ok(Self { config, intake })
    }

    /// Intake handle, for counters
    pub fn intake(&self) -> &Intake {
        &self.intake
    }

    /// One connection session; `Ok` means shutdown, `Err` means reconnect
    async fn session(&self, shutdown: &CancellationToken) -> Result<(), ConnectorError> {
        let (host, port) = parse_broker_url(&self.config.broker_url)?;
        let mut options = MqttOptions::new(&self.config.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);
        client
            .subscribe(&self.config.topic, self.config.qos()?)
            .await
            .map_err(|e| ConnectorError::Protocol(format!("subscribe failed: {e}")))?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let label = transport_label(&publish.topic);
                        match self
                            .intake
                            .submit(publish.payload.to_vec(), label, GatewayHints::default())
                            .await
                        {
                            Ok(sequence) => log::debug!("mqtt {} seq={sequence}", publish.topic),
                            Err(IntakeError::CircuitOpen) => {
                                log::debug!("mqtt {} refused, intake breaker open", publish.topic);
                            }
                            Err(IntakeError::Closed) => return Ok(()),
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        log::info!("connected to MQTT broker {}", self.config.broker_url);
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        log::info!("subscribed to {}", self.config.topic);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ConnectorError::Protocol(format!("MQTT event loop error: {e}")));
                    }
                },
            }
        }
    }
}

#[async_trait::async_trait]
impl Listener for MqttListener {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), ConnectorError> {
        log::info!(
            "mqtt listener for {} on {}",
            self.config.topic,
            self.config.broker_url
        );

        loop {
            match self.session(&shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    self.intake.stats().error();
                    log::error!("mqtt session ended: {e}");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)) => {}
            }
        }

        log::info!("mqtt listener stopped");
        Ok(())
    }
}
