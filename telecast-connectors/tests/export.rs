//! Outbound collaborators against a local HTTP endpoint

#![cfg(feature = "export")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use telecast_connectors::alert::WebhookAlertSink;
use telecast_connectors::export::{HttpExportConfig, HttpExportSink};
use telecast_core::{AlertSink, ExportSink};
use telecast_schemas::record::Geiger;
use telecast_schemas::SensorRecord;

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>,
}

async fn capture(State(captured): State<Captured>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    captured.requests.lock().unwrap().push((auth, json));
    StatusCode::OK
}

async fn endpoint() -> (String, Captured) {
    let captured = Captured::default();
    let app = Router::new()
        .route("/in", post(capture))
        .route("/down", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), captured)
}

#[tokio::test]
async fn record_is_posted_with_bearer_token() {
    let (base, captured) = endpoint().await;
    let sink = HttpExportSink::new(
        HttpExportConfig::new(format!("{base}/in"))
            .bearer_token("s3cret")
            .timeout_secs(5),
    )
    .unwrap();

    let record = SensorRecord {
        device_id: Some(100),
        geiger: Some(Geiger {
            cpm0: Some(31),
            cpm1: None,
        }),
        ..Default::default()
    };
    sink.export(&record).await.unwrap();

    let requests = captured.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let (auth, json) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer s3cret"));
    assert_eq!(json["device_id"], 100);
    assert_eq!(json["geiger"]["cpm0"], 31);
}

#[tokio::test]
async fn server_error_is_reported() {
    let (base, _) = endpoint().await;
    let sink = HttpExportSink::new(HttpExportConfig::new(format!("{base}/down"))).unwrap();
    let err = sink.export(&SensorRecord::default()).await.unwrap_err();
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn alert_posts_text() {
    let (base, captured) = endpoint().await;
    let sink = WebhookAlertSink::new(format!("{base}/in"), Duration::from_secs(5)).unwrap();
    sink.alert("device 100 has not been seen for 1h 30m").await.unwrap();

    let requests = captured.requests.lock().unwrap().clone();
    assert_eq!(
        requests[0].1,
        serde_json::json!({ "text": "device 100 has not been seen for 1h 30m" })
    );
}
