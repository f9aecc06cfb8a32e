//! Test helper utilities for integration tests

use gateway_core::RequestRecorder;
use gateway_providers::{EndpointList, HttpTransport, SignatureCache};
use gateway_resilience::BackoffPlan;
use gateway_routing::{Account, DispatchPolicy, Dispatcher, InMemoryAccountPool, StaticCredentials};
use gateway_server::{serve_on, AppState};
use gateway_telemetry::{DispatchMetrics, FanoutRecorder, TracingRecorder};
use once_cell::sync::Lazy;
use reqwest::{Client, Response};
use secrecy::SecretString;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Backoff short enough for real-time tests
pub fn fast_backoff() -> BackoffPlan {
    BackoffPlan::builder()
        .tiers(vec![Duration::from_millis(10), Duration::from_millis(20)])
        .max_retries(3)
        .jitter(0.0)
        .build()
}

/// Policy with short rate-limit defaults
pub fn fast_policy() -> DispatchPolicy {
    DispatchPolicy {
        default_rate_limit: Duration::from_millis(100),
        max_rate_limit_wait: Duration::from_secs(2),
        ..DispatchPolicy::default()
    }
}

/// A gateway served on an ephemeral port
pub struct TestGateway {
    /// The server address
    pub addr: SocketAddr,
    /// HTTP client for making requests
    pub client: Client,
    /// Base URL for the server
    pub base_url: String,
    /// The dispatcher behind the server
    pub dispatcher: Arc<Dispatcher>,
    /// Metrics fed by the dispatcher
    pub metrics: DispatchMetrics,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Builder for [`TestGateway`]
pub struct TestGatewayBuilder {
    endpoints: Vec<String>,
    accounts: Vec<(String, String)>,
    policy: DispatchPolicy,
    backoff: BackoffPlan,
    request_timeout: Duration,
}

impl TestGateway {
    /// Start building a gateway
    pub fn builder() -> TestGatewayBuilder {
        TestGatewayBuilder {
            endpoints: Vec::new(),
            accounts: Vec::new(),
            policy: fast_policy(),
            backoff: fast_backoff(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Get the full URL for a path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST `body` to `/v1/generate`
    pub async fn generate(&self, body: &Value) -> Response {
        self.client
            .post(self.url("/v1/generate"))
            .json(body)
            .send()
            .await
            .expect("Failed to send request")
    }

    /// GET `path`
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send request")
    }

    /// Shutdown the server
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TestGatewayBuilder {
    /// Add an upstream endpoint, in failover order
    pub fn endpoint(mut self, uri: impl Into<String>) -> Self {
        self.endpoints.push(uri.into());
        self
    }

    /// Add an account with a fixed token and project
    pub fn account(mut self, email: &str, token: &str) -> Self {
        self.accounts.push((email.to_string(), token.to_string()));
        self
    }

    /// Override the dispatch policy
    pub fn policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Start serving
    pub async fn start(self) -> TestGateway {
        init_tracing();

        let accounts = self
            .accounts
            .iter()
            .map(|(email, token)| {
                Account::new(email.as_str())
                    .with_token(SecretString::new(token.clone()))
                    .with_project("test-project")
                    .into_handle()
            })
            .collect();
        let pool = InMemoryAccountPool::new(accounts, Arc::new(StaticCredentials::new()));

        let metrics = DispatchMetrics::new().expect("Failed to register metrics");
        let recorder = FanoutRecorder::new()
            .with(Arc::new(TracingRecorder))
            .with(Arc::new(metrics.clone()) as Arc<dyn RequestRecorder>);

        let transport = HttpTransport::with_settings("gateway-integration-tests", Duration::from_secs(5))
            .expect("Failed to create transport");

        let dispatcher = Arc::new(
            Dispatcher::builder()
                .pool(Arc::new(pool))
                .transport(Arc::new(transport))
                .endpoints(
                    EndpointList::from_strings(self.endpoints.iter().map(String::as_str))
                        .expect("Invalid endpoints"),
                )
                .backoff(self.backoff)
                .policy(self.policy)
                .signatures(Arc::new(SignatureCache::default()))
                .recorder(Arc::new(recorder))
                .build()
                .expect("Failed to build dispatcher"),
        );

        let state = AppState::new(Arc::clone(&dispatcher))
            .with_metrics(metrics.clone())
            .with_request_timeout(self.request_timeout);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            serve_on(listener, state, async {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create client");

        TestGateway {
            addr,
            client,
            base_url: format!("http://{addr}"),
            dispatcher,
            metrics,
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

/// Parse the SSE body of a streaming response into event JSON values.
///
/// The trailing `[DONE]` marker is returned as `Value::Null`.
pub async fn read_sse_events(response: Response) -> Vec<Value> {
    let text = response.text().await.expect("Failed to read body");
    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .map(|data| {
            if data == "[DONE]" {
                Value::Null
            } else {
                serde_json::from_str(data).expect("Invalid event JSON")
            }
        })
        .collect()
}
