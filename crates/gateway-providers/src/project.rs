//! Cloud project discovery.

use crate::endpoints::EndpointList;
use async_trait::async_trait;
use gateway_core::{GatewayError, GatewayResult};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Account placeholder on credential errors; the credential resolver
/// replaces it with the account's email
pub const UNTAGGED_ACCOUNT: &str = "unknown";

/// Resolves the cloud project for an access token
#[async_trait]
pub trait ProjectDiscovery: Send + Sync {
    /// Discover the project bound to `access_token`
    async fn discover_project(&self, access_token: &SecretString) -> GatewayResult<String>;
}

/// Discovers projects through `loadCodeAssist`, trying each endpoint in order
#[derive(Debug, Clone)]
pub struct CodeAssistProjectResolver {
    client: Client,
    endpoints: EndpointList,
}

impl CodeAssistProjectResolver {
    /// Create a resolver
    #[must_use]
    pub fn new(client: Client, endpoints: EndpointList) -> Self {
        Self { client, endpoints }
    }

    async fn load_code_assist(&self, index: usize, token: &SecretString) -> GatewayResult<String> {
        let url = self.endpoints.method_url(index, "loadCodeAssist");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&json!({"metadata": {"ideType": "ANTIGRAVITY"}}))
            .send()
            .await
            .map_err(|e| GatewayError::transport(format!("loadCodeAssist failed: {e}"), None, true))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::invalid_credential(UNTAGGED_ACCOUNT, body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::transport(
                format!("loadCodeAssist returned {status}: {body}"),
                Some(status.as_u16()),
                true,
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::malformed_frame(format!("loadCodeAssist response: {e}")))?;

        extract_project(&data).ok_or_else(|| {
            GatewayError::invalid_credential(UNTAGGED_ACCOUNT, "account has no cloudaicompanionProject")
        })
    }
}

fn extract_project(data: &Value) -> Option<String> {
    let project = data.get("cloudaicompanionProject")?;
    project
        .as_str()
        .or_else(|| project.get("id").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[async_trait]
impl ProjectDiscovery for CodeAssistProjectResolver {
    async fn discover_project(&self, access_token: &SecretString) -> GatewayResult<String> {
        let mut last_error = None;
        for index in 0..self.endpoints.len() {
            match self.load_code_assist(index, access_token).await {
                Ok(project) => {
                    debug!(project = %project, endpoint = self.endpoints.base(index), "Discovered project");
                    return Ok(project);
                }
                Err(err @ GatewayError::InvalidCredential { .. }) => return Err(err),
                Err(err) => {
                    warn!(endpoint = self.endpoints.base(index), error = %err, "Project discovery failed, trying next endpoint");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| GatewayError::internal("no endpoints to discover project")))
    }
}
