//! Credential resolution for pooled accounts.

use crate::account::Account;
use async_trait::async_trait;
use gateway_core::{GatewayError, GatewayResult};
use gateway_providers::ProjectDiscovery;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::debug;

/// Produces the access token and project for an account
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve a bearer token
    async fn resolve_token(&self, account: &Account) -> GatewayResult<SecretString>;

    /// Resolve the Cloud Code project, using `token` if discovery is needed
    async fn resolve_project(&self, account: &Account, token: &SecretString)
        -> GatewayResult<String>;
}

/// Uses configured tokens, discovering projects upstream when unset
#[derive(Clone, Default)]
pub struct StaticCredentials {
    discovery: Option<Arc<dyn ProjectDiscovery>>,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("discovery", &self.discovery.is_some())
            .finish()
    }
}

impl StaticCredentials {
    /// Resolver that only uses configured values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that falls back to project discovery
    #[must_use]
    pub fn with_discovery(discovery: Arc<dyn ProjectDiscovery>) -> Self {
        Self {
            discovery: Some(discovery),
        }
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve_token(&self, account: &Account) -> GatewayResult<SecretString> {
        account.configured_token().cloned().ok_or_else(|| {
            GatewayError::invalid_credential(account.email(), "no access token configured")
        })
    }

    async fn resolve_project(
        &self,
        account: &Account,
        token: &SecretString,
    ) -> GatewayResult<String> {
        if let Some(project) = account.configured_project() {
            return Ok(project.to_string());
        }
        let Some(discovery) = &self.discovery else {
            return Err(GatewayError::invalid_credential(
                account.email(),
                "no project configured and discovery is disabled",
            ));
        };
        let project = discovery
            .discover_project(token)
            .await
            .map_err(|err| match err {
                GatewayError::InvalidCredential { message, .. } => {
                    GatewayError::invalid_credential(account.email(), message)
                }
                other => other,
            })?;
        debug!(account = %account.email(), project = %project, "Discovered project");
        Ok(project)
    }
}
