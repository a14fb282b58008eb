//! Transport seam and the reference HTTP implementation.

use crate::{OutboxResult, RequestDescriptor};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure messages that browser-era transports used for connectivity loss.
const LEGACY_NETWORK_MESSAGES: [&str; 4] = [
    "Network Error",
    "Failed to fetch",
    "Type error",
    "NetworkError when attempting to fetch resource.",
];

/// Structured failure of a single transport call.
///
/// Only [`TransportError::Network`] is attributed to connectivity loss; every
/// other variant is an application-level failure and is terminal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote could not be reached.
    #[error("{0}")]
    Network(String),

    /// The remote answered with a non-ok status. Displays as the status text.
    #[error("{status_text}")]
    HttpStatus { status: u16, status_text: String },

    /// The exchange completed but could not be built or understood.
    #[error("{0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this failure should be treated as a connectivity loss.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Classify a bare error message.
    ///
    /// For transports that cannot report a structured kind. Exact matches of
    /// the known connectivity messages become `Network`, anything else
    /// `Protocol`.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if LEGACY_NETWORK_MESSAGES.contains(&message.as_str()) {
            Self::Network(message)
        } else {
            Self::Protocol(message)
        }
    }
}

/// Performs one remote call for a queued request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, descriptor: &RequestDescriptor) -> Result<Value, TransportError>;
}

/// JSON-over-HTTP transport backed by reqwest.
///
/// Cookies are kept across calls so session credentials are included. 2xx and
/// 3xx responses are ok; an empty ok body decodes as `null`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> OutboxResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self { client })
    }

    /// Wrap a preconfigured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, descriptor: &RequestDescriptor) -> Result<Value, TransportError> {
        let method = Method::from_bytes(descriptor.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| {
                TransportError::Protocol(format!("invalid HTTP method: {}", descriptor.method))
            })?;

        debug!(url = %descriptor.url, method = %method, "Sending request");

        let mut request = self
            .client
            .request(method, &descriptor.url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(payload) = &descriptor.payload {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            let status_text = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_str().to_string());
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                status_text,
            });
        }

        let body = response.bytes().await.map_err(classify_reqwest_error)?;
        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body)
            .map_err(|e| TransportError::Protocol(format!("invalid JSON response: {}", e)))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() || err.is_redirect() || err.is_decode() {
        TransportError::Protocol(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}
