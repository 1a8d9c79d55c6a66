//! UDP datagram listener
//!
//! One datagram is one transmission. Bulk framing, if any, is inside the
//! payload and is left to the normalizer.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use telecast_core::errors::IntakeError;
use telecast_core::GatewayHints;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{ConnectorError, Intake, Listener};

/// Largest datagram read; anything longer is truncated by the OS and dropped
pub const MAX_DATAGRAM: usize = 65_507;

/// UDP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Bind address
    pub bind: String,
    /// Receive buffer size
    pub max_datagram: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8081".into(),
            max_datagram: MAX_DATAGRAM,
        }
    }
}

/// Bound UDP listener
pub struct UdpListener {
    socket: UdpSocket,
    config: UdpConfig,
    intake: Intake,
}

impl UdpListener {
    /// Bind the socket
    pub async fn bind(config: UdpConfig, intake: Intake) -> Result<Self, ConnectorError> {
        let socket = UdpSocket::bind(&config.bind)
            .await
            .map_err(|e| ConnectorError::Bind {
                addr: config.bind.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            socket,
            config,
            intake,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr, ConnectorError> {
        Ok(self.socket.local_addr()?)
    }

    /// Intake handle, for counters
    pub fn intake(&self) -> &Intake {
        &self.intake
    }
}

/// Transport label for a datagram from `peer`
pub fn transport_label(peer: &SocketAddr) -> String {
    format!("device-udp:{}", peer.ip())
}

#[async_trait::async_trait]
impl Listener for UdpListener {
    fn name(&self) -> &str {
        "udp"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), ConnectorError> {
        let mut buf = vec![0u8; self.config.max_datagram.max(1)];
        log::info!("udp listener on {}", self.local_addr()?);

        loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP port-unreachable and friends surface here; keep serving.
                        self.intake.stats().error();
                        log::warn!("udp receive failed: {e}");
                        continue;
                    }
                },
            };

            if len == 0 {
                continue;
            }

            let label = transport_label(&peer);
            match self
                .intake
                .submit(buf[..len].to_vec(), label, GatewayHints::default())
                .await
            {
                Ok(sequence) => log::debug!("udp {peer} {len} bytes seq={sequence}"),
                Err(IntakeError::CircuitOpen) => {
                    log::debug!("udp {peer} refused, intake breaker open");
                }
                Err(IntakeError::Closed) => break,
            }
        }

        log::info!("udp listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_uses_ip_only() {
        let peer: SocketAddr = "192.0.2.7:40000".parse().unwrap();
        assert_eq!(transport_label(&peer), "device-udp:192.0.2.7");
    }

    #[test]
    fn config_defaults_when_empty() {
        let config: UdpConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, UdpConfig::default());
    }
}
