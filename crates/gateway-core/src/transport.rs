//! Upstream transport seam.
//!
//! The dispatcher talks to the Cloud Code backend only through
//! [`UpstreamTransport`], so tests can script exact response sequences.

use crate::error::GatewayResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use secrecy::SecretString;

/// Raw upstream body chunks
pub type ByteStream = BoxStream<'static, GatewayResult<Bytes>>;

/// One outbound HTTP call
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    /// Fully qualified endpoint URL
    pub url: String,
    /// Bearer token for the selected account
    pub access_token: SecretString,
    /// Wrapped request body
    pub body: serde_json::Value,
}

/// Response head plus a lazily consumed body
pub struct UpstreamResponse {
    /// HTTP status
    pub status: http::StatusCode,
    /// Response headers
    pub headers: http::HeaderMap,
    /// Body chunks
    pub body: ByteStream,
}

impl UpstreamResponse {
    /// Build a response from parts
    pub fn new(status: http::StatusCode, headers: http::HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Drain the body into a string, lossy on invalid UTF-8
    ///
    /// # Errors
    /// Returns the first transport error encountered while reading
    pub async fn text(self) -> GatewayResult<String> {
        use futures::StreamExt;

        let mut body = self.body;
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends wrapped requests to an upstream endpoint
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Send one call and return as soon as the response head is available.
    ///
    /// Only network-level failures are errors; every HTTP status is returned
    /// as an [`UpstreamResponse`] for the caller to classify.
    async fn send(&self, call: UpstreamCall) -> GatewayResult<UpstreamResponse>;
}
