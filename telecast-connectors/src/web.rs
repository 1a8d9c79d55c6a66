//! HTTP upload listener (axum)
//!
//! ## Routes
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | POST | `/`, `/send` | raw payload | `202 {"sequence": n}` |
//! | POST | `/`, `/send` | JSON [`UploadEnvelope`] | `202 {"sequence": n}` |
//! | GET | `/health` | | listener, queue and pipeline counters |
//!
//! The client is identified by the `X-Telecast-Client` header. Gateway
//! metadata comes from the envelope's `gateway` object or from `X-Gateway-*`
//! headers; envelope values win where both are present.
//!
//! Once the intake breaker is open every upload answers `503`, so a load
//! balancer can steer senders to a healthy instance while this one restarts.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use telecast_core::errors::IntakeError;
use telecast_core::{GatewayHints, PipelineCounters, PipelineStats, QueueCounters};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{ConnectorError, Intake, Listener, ListenerCounters};

/// Client-identifying header
pub const CLIENT_HEADER: &str = "x-telecast-client";

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpListenerConfig {
    /// Bind address
    pub bind: String,
    /// Largest accepted request body
    pub max_body: usize,
}

impl Default for HttpListenerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            max_body: 256 * 1024,
        }
    }
}

/// JSON upload as posted by network-server webhooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadEnvelope {
    /// Base64 of the wire payload
    pub payload: String,
    /// Reception metadata
    #[serde(default)]
    pub gateway: Option<GatewayHints>,
}

/// Body of a successful upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAccepted {
    /// Intake sequence number
    pub sequence: u64,
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `ok`, or `saturated` once the breaker is open
    pub status: String,
    /// This listener
    pub listener: ListenerCounters,
    /// Shared intake queue
    pub queue: QueueCounters,
    /// Consumer pipeline, when wired in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineCounters>,
}

/// Handler state
#[derive(Clone)]
pub struct WebState {
    intake: Intake,
    pipeline: Option<Arc<PipelineStats>>,
}

impl WebState {
    /// State over an intake handle
    pub fn new(intake: Intake) -> Self {
        Self {
            intake,
            pipeline: None,
        }
    }

    /// Report pipeline counters on `/health`
    pub fn with_pipeline(mut self, stats: Arc<PipelineStats>) -> Self {
        self.pipeline = Some(stats);
        self
    }
}

/// Build the upload router
pub fn router(state: WebState, max_body: usize) -> Router {
    Router::new()
        .route("/", post(upload))
        .route("/send", post(upload))
        .route("/health", get(health))
        .fallback(|| async { (StatusCode::NOT_FOUND, "not found") })
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body))
}

/// Transport label for an upload from `client`
pub fn transport_label(client: &str) -> String {
    format!("device-http:{client}")
}

async fn upload(State(state): State<WebState>, headers: HeaderMap, body: Bytes) -> Response {
    let client = header_str(&headers, CLIENT_HEADER).unwrap_or("anonymous");

    let (payload, mut hints) = if is_json(&headers) {
        match decode_envelope(&body) {
            Ok(decoded) => decoded,
            Err(reason) => {
                state.intake.stats().error();
                log::warn!("http upload from {client} rejected: {reason}");
                return (StatusCode::BAD_REQUEST, reason).into_response();
            }
        }
    } else {
        (body.to_vec(), GatewayHints::default())
    };

    if payload.is_empty() {
        state.intake.stats().error();
        return (StatusCode::BAD_REQUEST, "empty payload").into_response();
    }

    fill_from_headers(&mut hints, &headers);

    match state
        .intake
        .submit(payload, transport_label(client), hints)
        .await
    {
        Ok(sequence) => (StatusCode::ACCEPTED, Json(UploadAccepted { sequence })).into_response(),
        Err(IntakeError::CircuitOpen) => {
            (StatusCode::SERVICE_UNAVAILABLE, "intake saturated").into_response()
        }
        Err(IntakeError::Closed) => {
            (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
        }
    }
}

async fn health(State(state): State<WebState>) -> Json<HealthReport> {
    let queue = state.intake.queue().counters();
    let status = if state.intake.queue().breaker().is_open() {
        "saturated"
    } else {
        "ok"
    };
    Json(HealthReport {
        status: status.into(),
        listener: state.intake.stats().counters(),
        queue,
        pipeline: state.pipeline.as_ref().map(|stats| stats.counters()),
    })
}

fn is_json(headers: &HeaderMap) -> bool {
    header_str(headers, header::CONTENT_TYPE.as_str())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false)
}

fn decode_envelope(body: &[u8]) -> Result<(Vec<u8>, GatewayHints), String> {
    let envelope: UploadEnvelope =
        serde_json::from_slice(body).map_err(|e| format!("bad envelope: {e}"))?;
    let payload = STANDARD
        .decode(envelope.payload.trim())
        .map_err(|e| format!("bad base64 payload: {e}"))?;
    Ok((payload, envelope.gateway.unwrap_or_default()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn header_parse<T: FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

/// Fill hints the envelope left empty from `X-Gateway-*` headers
fn fill_from_headers(hints: &mut GatewayHints, headers: &HeaderMap) {
    if hints.id.is_none() {
        hints.id = header_str(headers, "x-gateway-id").map(str::to_string);
    }
    if hints.lat.is_none() {
        hints.lat = header_parse(headers, "x-gateway-lat");
    }
    if hints.lon.is_none() {
        hints.lon = header_parse(headers, "x-gateway-lon");
    }
    if hints.alt.is_none() {
        hints.alt = header_parse(headers, "x-gateway-alt");
    }
    if hints.snr.is_none() {
        hints.snr = header_parse(headers, "x-gateway-snr");
    }
    if hints.location.is_none() {
        hints.location = header_str(headers, "x-gateway-location").map(str::to_string);
    }
}

/// Bound HTTP listener
pub struct HttpListener {
    listener: TcpListener,
    router: Router,
}

impl HttpListener {
    /// Bind the socket and build the router
    pub async fn bind(config: HttpListenerConfig, state: WebState) -> Result<Self, ConnectorError> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|e| ConnectorError::Bind {
                addr: config.bind.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            listener,
            router: router(state, config.max_body),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr, ConnectorError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait::async_trait]
impl Listener for HttpListener {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<(), ConnectorError> {
        log::info!("http listener on {}", self.local_addr()?);
        let this = *self;
        axum::serve(this.listener, this.router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        log::info!("http listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_fill_only_missing_hints() {
        let mut headers = HeaderMap::new();
        headers.insert("x-gateway-id", "gw-9".parse().unwrap());
        headers.insert("x-gateway-lat", "35.5".parse().unwrap());
        headers.insert("x-gateway-snr", "not-a-number".parse().unwrap());

        let mut hints = GatewayHints {
            id: Some("from-envelope".into()),
            ..Default::default()
        };
        fill_from_headers(&mut hints, &headers);

        assert_eq!(hints.id.as_deref(), Some("from-envelope"));
        assert_eq!(hints.lat, Some(35.5));
        assert_eq!(hints.snr, None);
    }

    #[test]
    fn envelope_decodes_base64() {
        let body = br#"{"payload": "CGQ=", "gateway": {"id": "gw-1", "snr": 7.5}}"#;
        let (payload, hints) = decode_envelope(body).unwrap();
        assert_eq!(payload, vec![0x08, 0x64]);
        assert_eq!(hints.id.as_deref(), Some("gw-1"));
        assert_eq!(hints.snr, Some(7.5));

        assert!(decode_envelope(br#"{"payload": "%%%"}"#).is_err());
        assert!(decode_envelope(b"not json").is_err());
    }
}
