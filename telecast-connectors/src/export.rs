//! HTTP Export Sink - Forward Normalized Records to a REST Endpoint
//!
//! ## Overview
//!
//! Every accepted record is POSTed as JSON to one configured URL. This is
//! how a collector feeds the downstream ingest API, a time-series store or a
//! partner's webhook.
//!
//! ## Implementation Choices
//!
//! - Blocking `ureq` agent run on Tokio's blocking pool; one request per
//!   record, no batching
//! - The agent timeout caps a single request; the pipeline's export channel
//!   adds its own deadline and failure-run alerting on top
//! - No retries here: a failed export is counted and the next record tries
//!   again
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use telecast_connectors::export::{HttpExportConfig, HttpExportSink};
//!
//! let config = HttpExportConfig::new("https://ingest.example.com/measurements")
//!     .bearer_token("your-api-token")
//!     .timeout_secs(10);
//! let sink = HttpExportSink::new(config)?;
//! # Ok::<(), telecast_connectors::ConnectorError>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use telecast_core::errors::SinkError;
use telecast_core::ExportSink;
use telecast_schemas::SensorRecord;

use crate::ConnectorError;

/// Authentication methods
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthMethod {
    /// No authentication
    #[default]
    None,
    /// Bearer token
    Bearer {
        /// Token value
        token: String,
    },
    /// Basic authentication
    Basic {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// API key in a header
    ApiKey {
        /// Header name
        header: String,
        /// Key value
        value: String,
    },
}

impl AuthMethod {
    /// `(header, value)` to send, if any
    pub fn header(&self) -> Option<(String, String)> {
        match self {
            AuthMethod::None => None,
            AuthMethod::Bearer { token } => {
                Some(("Authorization".into(), format!("Bearer {token}")))
            }
            AuthMethod::Basic { username, password } => {
                let credentials = STANDARD.encode(format!("{username}:{password}"));
                Some(("Authorization".into(), format!("Basic {credentials}")))
            }
            AuthMethod::ApiKey { header, value } => Some((header.clone(), value.clone())),
        }
    }
}

/// Export endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpExportConfig {
    /// Endpoint receiving the POSTs
    pub url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Authentication method
    pub auth: AuthMethod,
    /// Custom headers
    pub headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
    /// Name used in logs and alerts
    pub name: String,
}

impl HttpExportConfig {
    /// Configuration for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            auth: AuthMethod::None,
            headers: HashMap::new(),
            user_agent: format!("telecast/{}", env!("CARGO_PKG_VERSION")),
            name: "http-export".into(),
        }
    }

    /// Set bearer token authentication
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMethod::Bearer {
            token: token.into(),
        };
        self
    }

    /// Set basic authentication
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Set API key authentication
    pub fn api_key(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth = AuthMethod::ApiKey {
            header: header.into(),
            value: value.into(),
        };
        self
    }

    /// Replace the authentication method
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    /// Set request timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Add custom header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the sink name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Reject anything that is not an absolute http(s) URL
pub(crate) fn check_url(url: &str) -> Result<(), ConnectorError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConnectorError::Config(format!(
            "{url}: URL must start with http:// or https://"
        )))
    }
}

/// POST `body` as JSON with `headers`, on the blocking pool
pub(crate) async fn post_json(
    agent: ureq::Agent,
    url: String,
    headers: Vec<(String, String)>,
    body: String,
) -> Result<(), String> {
    let outcome = tokio::task::spawn_blocking(move || {
        let mut request = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        for (name, value) in &headers {
            request = request.set(name, value);
        }
        request.send_string(&body)
    })
    .await
    .map_err(|e| format!("export task failed: {e}"))?;

    match outcome {
        Ok(_) => Ok(()),
        Err(ureq::Error::Status(code, response)) => Err(format!(
            "server returned {code}: {}",
            response.into_string().unwrap_or_default()
        )),
        Err(ureq::Error::Transport(e)) => Err(e.to_string()),
    }
}

/// Export sink posting each record as JSON
pub struct HttpExportSink {
    config: Arc<HttpExportConfig>,
    agent: ureq::Agent,
}

impl HttpExportSink {
    /// Validate the config and build the agent
    pub fn new(config: HttpExportConfig) -> Result<Self, ConnectorError> {
        check_url(&config.url)?;
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();
        Ok(Self {
            config: Arc::new(config),
            agent,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &HttpExportConfig {
        &self.config
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.extend(self.config.auth.header());
        headers
    }
}

#[async_trait]
impl ExportSink for HttpExportSink {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn export(&self, record: &SensorRecord) -> Result<(), SinkError> {
        let body = serde_json::to_string(record).map_err(|e| SinkError::Failed {
            sink: self.config.name.clone(),
            reason: e.to_string(),
        })?;

        post_json(
            self.agent.clone(),
            self.config.url.clone(),
            self.request_headers(),
            body,
        )
        .await
        .map_err(|reason| SinkError::Failed {
            sink: self.config.name.clone(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = HttpExportConfig::new("https://ingest.example.com")
            .bearer_token("test-token")
            .timeout_secs(60)
            .header("X-Custom", "value");

        assert_eq!(config.url, "https://ingest.example.com");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.headers.contains_key("X-Custom"));
        assert_eq!(
            config.auth,
            AuthMethod::Bearer {
                token: "test-token".into()
            }
        );
    }

    #[test]
    fn url_validation() {
        assert!(HttpExportSink::new(HttpExportConfig::new("not-a-url")).is_err());
        assert!(HttpExportSink::new(HttpExportConfig::new("https://valid.url")).is_ok());
    }

    #[test]
    fn auth_headers() {
        let basic = AuthMethod::Basic {
            username: "aladdin".into(),
            password: "opensesame".into(),
        };
        assert_eq!(
            basic.header(),
            Some((
                "Authorization".to_string(),
                "Basic YWxhZGRpbjpvcGVuc2VzYW1l".to_string()
            ))
        );

        let key = AuthMethod::ApiKey {
            header: "X-Api-Key".into(),
            value: "k".into(),
        };
        assert_eq!(key.header(), Some(("X-Api-Key".to_string(), "k".to_string())));
        assert_eq!(AuthMethod::None.header(), None);
    }

    #[test]
    fn auth_from_config_file() {
        let auth: AuthMethod =
            serde_json::from_str(r#"{"kind": "bearer", "token": "abc"}"#).unwrap();
        assert_eq!(auth, AuthMethod::Bearer { token: "abc".into() });
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let sink = HttpExportSink::new(
            HttpExportConfig::new(format!("http://127.0.0.1:{port}/in")).timeout_secs(2),
        )
        .unwrap();
        let err = sink.export(&SensorRecord::default()).await.unwrap_err();
        assert!(matches!(err, SinkError::Failed { ref sink, .. } if sink == "http-export"));
    }
}
