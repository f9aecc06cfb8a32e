//! reqwest-backed upstream transport.

use async_trait::async_trait;
use futures::StreamExt;
use gateway_config::EndpointConfig;
use gateway_core::{GatewayError, GatewayResult, UpstreamCall, UpstreamResponse, UpstreamTransport};
use reqwest::Client;
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, error};

/// HTTP transport sharing one pooled client across all calls
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport from endpoint settings
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &EndpointConfig) -> GatewayResult<Self> {
        Self::with_settings(&config.user_agent, config.connect_timeout)
    }

    /// Create a transport with an explicit user agent and connect timeout
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn with_settings(user_agent: &str, connect_timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Underlying client
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn send(&self, call: UpstreamCall) -> GatewayResult<UpstreamResponse> {
        debug!(url = %call.url, "Sending upstream request");

        let response = self
            .client
            .post(&call.url)
            .bearer_auth(call.access_token.expose_secret())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&call.body)
            .send()
            .await
            .map_err(|e| {
                error!(url = %call.url, error = %e, "Upstream request failed");
                GatewayError::transport(format!("Request to {} failed: {e}", call.url), None, true)
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| GatewayError::transport(format!("Stream error: {e}"), None, true))
            })
            .boxed();

        Ok(UpstreamResponse::new(status, headers, body))
    }
}
