//! Broker HTTP Transport
//!
//! Performs requests against the broker's REST resources and decodes the
//! JSON envelope. Non-success statuses are mapped to
//! [`KeysError::Endpoint`] here; connection, TLS and decoding failures
//! become [`KeysError::Transport`].

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{EndpointError, KeysError};
use crate::session::{Credentials, SessionConfig};

/// Collection resource for the authenticated user's keys
pub const KEYS_PATH: &str = "/user/keys";

/// Resource path of a single key
pub fn key_path(name: &str) -> String {
    format!("{}/{}", KEYS_PATH, urlencoding::encode(name))
}

// ============================================================
// API Response Types
// ============================================================

/// Response envelope returned by every broker resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// A broker message attached to a response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

impl Envelope {
    /// Wrap a payload in a successful envelope
    pub fn ok(data: Value) -> Self {
        Self {
            status: "ok".to_string(),
            data,
            messages: Vec::new(),
        }
    }

    /// Build the endpoint error this envelope describes
    pub fn into_endpoint_error(self, status: u16) -> EndpointError {
        let exit_code = self.messages.iter().find_map(|m| m.exit_code);
        let field = self.messages.iter().find_map(|m| m.field.clone());
        let text: Vec<&str> = self
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .filter(|t| !t.is_empty())
            .collect();

        EndpointError {
            status,
            exit_code,
            field,
            message: if text.is_empty() {
                self.status
            } else {
                text.join(", ")
            },
        }
    }
}

/// Executes requests against broker resources
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. `path` is relative to the broker base URL.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Envelope, KeysError>;
}

// ============================================================
// reqwest Implementation
// ============================================================

/// HTTP transport backed by reqwest
pub struct HttpTransport {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpTransport {
    pub fn new(config: &SessionConfig) -> Result<Self, KeysError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.broker_url.trim_end_matches('/').to_string(),
            credentials: config.credentials.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Credentials::Basic { username, password } => request.basic_auth(username, Some(password)),
            Credentials::Token(token) => request.bearer_auth(token),
            Credentials::None => request,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Envelope, KeysError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, path = %path, "Broker request");

        let mut request = self
            .authorize(self.client.request(method.clone(), &url))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {method} {path}"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read {method} {path} response"))?;

        debug!(method = %method, path = %path, status = status.as_u16(), "Broker response");

        let envelope = decode_envelope(&text);
        if status.is_success() {
            return envelope
                .with_context(|| format!("Failed to parse {method} {path} response"))
                .map_err(KeysError::from);
        }

        let envelope = envelope.unwrap_or_else(|_| Envelope {
            status: status.canonical_reason().unwrap_or_default().to_string(),
            ..Default::default()
        });
        Err(status_error(status, envelope))
    }
}

/// Map a non-success response to an error kind.
///
/// Authentication failures are transport errors; everything else the
/// broker rejects is an endpoint error.
fn status_error(status: StatusCode, envelope: Envelope) -> KeysError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            let error = envelope.into_endpoint_error(status.as_u16());
            KeysError::Transport(anyhow::anyhow!("Authentication failed: {error}"))
        }
        _ => KeysError::Endpoint(envelope.into_endpoint_error(status.as_u16())),
    }
}

fn decode_envelope(text: &str) -> serde_json::Result<Envelope> {
    if text.trim().is_empty() {
        return Ok(Envelope::default());
    }
    serde_json::from_str(text)
}
