//! TCP stream listener
//!
//! A device connects, writes its payload and shuts down its write half.
//! Everything read before EOF is one transmission. Each connection gets its
//! own task; reads are capped in size and bounded in time so a stalled or
//! hostile peer cannot pin a task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use telecast_core::errors::IntakeError;
use telecast_core::GatewayHints;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{ConnectorError, Intake, Listener};

/// TCP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Bind address
    pub bind: String,
    /// Largest accepted payload
    pub max_payload: usize,
    /// Deadline for reading one payload, in seconds
    pub read_timeout_secs: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8082".into(),
            max_payload: 64 * 1024,
            read_timeout_secs: 30,
        }
    }
}

/// Bound TCP listener
pub struct StreamListener {
    listener: TcpListener,
    config: Arc<TcpConfig>,
    intake: Intake,
}

/// Transport label for a connection from `peer`
pub fn transport_label(peer: &SocketAddr) -> String {
    format!("device-tcp:{}", peer.ip())
}

impl StreamListener {
    /// Bind the socket
    pub async fn bind(config: TcpConfig, intake: Intake) -> Result<Self, ConnectorError> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|e| ConnectorError::Bind {
                addr: config.bind.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            intake,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr, ConnectorError> {
        Ok(self.listener.local_addr()?)
    }

    /// Intake handle, for counters
    pub fn intake(&self) -> &Intake {
        &self.intake
    }
}

#[async_trait::async_trait]
impl Listener for StreamListener {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), ConnectorError> {
        log::info!("tcp listener on {}", self.local_addr()?);
        let connections = TaskTracker::new();

        loop {
            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        self.intake.stats().error();
                        log::warn!("tcp accept failed: {e}");
                        continue;
                    }
                },
            };

            let intake = self.intake.clone();
            let config = Arc::clone(&self.config);
            let shutdown = shutdown.clone();
            connections.spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = handle_connection(socket, peer, &config, &intake) => {}
                }
            });
        }

        connections.close();
        connections.wait().await;
        log::info!("tcp listener stopped");
        Ok(())
    }
}

async fn handle_connection(socket: TcpStream, peer: SocketAddr, config: &TcpConfig, intake: &Intake) {
    let payload = match read_payload(socket, config).await {
        Ok(payload) => payload,
        Err(e) => {
            intake.stats().error();
            log::warn!("tcp {peer}: {e}");
            return;
        }
    };
    if payload.is_empty() {
        return;
    }

    let len = payload.len();
    match intake
        .submit(payload, transport_label(&peer), GatewayHints::default())
        .await
    {
        Ok(sequence) => log::debug!("tcp {peer} {len} bytes seq={sequence}"),
        Err(IntakeError::CircuitOpen) => log::debug!("tcp {peer} refused, intake breaker open"),
        Err(IntakeError::Closed) => {}
    }
}

/// Read until EOF, failing past `max_payload` bytes or the read deadline
pub async fn read_payload(socket: TcpStream, config: &TcpConfig) -> Result<Vec<u8>, ConnectorError> {
    let limit = config.max_payload as u64;
    let mut payload = Vec::new();
    let mut bounded = socket.take(limit + 1);

    tokio::time::timeout(
        Duration::from_secs(config.read_timeout_secs),
        bounded.read_to_end(&mut payload),
    )
    .await
    .map_err(|_| ConnectorError::Protocol(format!("no EOF within {}s", config.read_timeout_secs)))??;

    if payload.len() as u64 > limit {
        return Err(ConnectorError::Protocol(format!(
            "payload exceeds {} bytes",
            config.max_payload
        )));
    }
    Ok(payload)
}
