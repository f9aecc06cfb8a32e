//! Configuration model.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct GatewayConfig {
    /// HTTP listener
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Dispatcher retry and rotation policy
    #[serde(default)]
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// Upstream endpoint fallback list
    #[serde(default)]
    #[validate(nested)]
    pub endpoints: EndpointConfig,

    /// Statically configured upstream accounts
    #[serde(default)]
    #[validate(nested)]
    pub accounts: Vec<AccountConfig>,

    /// Signature cache tuning
    #[serde(default)]
    #[validate(nested)]
    pub signatures: SignatureConfig,

    /// Logging and tracing
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Per-request timeout for aggregated responses
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    /// `host:port` bind string
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Dispatcher retry and rotation policy
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DispatchConfig {
    /// Capacity-exhaustion retries beyond the first attempt
    #[serde(default = "default_max_capacity_retries")]
    #[validate(range(max = 32))]
    pub max_capacity_retries: u32,

    /// Wait before each capacity retry, one tier per retry
    #[serde(
        default = "default_backoff_tiers",
        deserialize_with = "deserialize_duration_list"
    )]
    #[validate(length(min = 1))]
    pub backoff_tiers: Vec<Duration>,

    /// Random extra wait as a fraction of the tier
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub backoff_jitter: f64,

    /// Rate-limit applied when the upstream gives no reset time
    #[serde(default = "default_rate_limit", with = "humantime_serde")]
    pub default_rate_limit: Duration,

    /// Consecutive failures after which an account error is surfaced
    #[serde(default = "default_failure_threshold")]
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    /// Upper bound on account rotations for transport failures
    #[serde(default = "default_max_account_attempts")]
    #[validate(range(min = 1))]
    pub max_account_attempts: u32,

    /// Longest pool wait the dispatcher will sleep through
    #[serde(default = "default_max_rate_limit_wait", with = "humantime_serde")]
    pub max_rate_limit_wait: Duration,

    /// Reuse the last tier when retries outnumber tiers
    #[serde(default = "default_true")]
    pub extend_last_tier: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_capacity_retries: default_max_capacity_retries(),
            backoff_tiers: default_backoff_tiers(),
            backoff_jitter: 0.0,
            default_rate_limit: default_rate_limit(),
            failure_threshold: default_failure_threshold(),
            max_account_attempts: default_max_account_attempts(),
            max_rate_limit_wait: default_max_rate_limit_wait(),
            extend_last_tier: true,
        }
    }
}

/// Upstream endpoint fallback list
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EndpointConfig {
    /// Base URLs, tried in order
    #[serde(default = "default_endpoint_urls")]
    #[validate(length(min = 1))]
    pub urls: Vec<Url>,

    /// HTTP `User-Agent` sent upstream
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            urls: default_endpoint_urls(),
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// One upstream account
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_account_source"))]
pub struct AccountConfig {
    /// Account identifier
    #[validate(length(min = 1))]
    pub email: String,

    /// Bearer token
    #[serde(default)]
    pub access_token: Option<SecretString>,

    /// Credential-store file to seed the token from
    #[serde(default)]
    pub credential_file: Option<PathBuf>,

    /// Cloud project; discovered upstream when absent
    #[serde(default)]
    pub project_id: Option<String>,
}

fn validate_account_source(account: &AccountConfig) -> Result<(), ValidationError> {
    if account.access_token.is_none() && account.credential_file.is_none() {
        let mut err = ValidationError::new("account_source");
        err.message = Some("account needs access_token or credential_file".into());
        return Err(err);
    }
    Ok(())
}

/// Signature cache tuning
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignatureConfig {
    /// Entry lifetime
    #[serde(default = "default_signature_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Background sweep period
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Shorter thinking signatures are treated as placeholders
    #[serde(default = "default_min_signature_length")]
    pub min_signature_length: usize,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            ttl: default_signature_ttl(),
            sweep_interval: default_sweep_interval(),
            min_signature_length: default_min_signature_length(),
        }
    }
}

/// Logging and tracing
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TelemetryConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON log output
    #[serde(default)]
    pub json: bool,

    /// OpenTelemetry span export
    #[serde(default)]
    pub tracing_enabled: bool,

    /// Service name reported on spans
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Trace sampling ratio
    #[serde(default = "default_sampling_rate")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub sampling_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            tracing_enabled: false,
            service_name: default_service_name(),
            environment: default_environment(),
            sampling_rate: default_sampling_rate(),
        }
    }
}

fn deserialize_duration_list<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<humantime_serde::Serde<Duration>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(humantime_serde::Serde::into_inner).collect())
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8045
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_max_capacity_retries() -> u32 {
    3
}

fn default_backoff_tiers() -> Vec<Duration> {
    vec![
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(4),
    ]
}

fn default_rate_limit() -> Duration {
    Duration::from_secs(60)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_account_attempts() -> u32 {
    5
}

fn default_max_rate_limit_wait() -> Duration {
    Duration::from_secs(120)
}

fn default_true() -> bool {
    true
}

fn default_endpoint_urls() -> Vec<Url> {
    [
        "https://daily-cloudcode-pa.sandbox.googleapis.com",
        "https://daily-cloudcode-pa.googleapis.com",
        "https://cloudcode-pa.googleapis.com",
    ]
    .iter()
    .filter_map(|u| Url::parse(u).ok())
    .collect()
}

fn default_user_agent() -> String {
    "antigravity/1.11.9 linux/amd64".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_signature_ttl() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_min_signature_length() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "cloudcode-gateway".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_sampling_rate() -> f64 {
    1.0
}
