//! # Cloud Code Gateway
//!
//! Dispatches Gemini `generateContent` requests across a pool of Cloud Code
//! accounts and a list of fallback endpoints, streaming the result back as
//! normalized events.
//!
//! ## Usage
//!
//! ```bash
//! # Start with default configuration
//! cloudcode-gateway
//!
//! # Start with a config file
//! GATEWAY_CONFIG=/etc/gateway/config.yaml cloudcode-gateway
//!
//! # Override a single setting
//! GATEWAY_PORT=9000 cloudcode-gateway
//! ```

use anyhow::Context;
use gateway_config::{load_config, read_credential_file, AccountConfig, GatewayConfig};
use gateway_core::RequestRecorder;
use gateway_providers::{
    CodeAssistProjectResolver, EndpointList, HttpTransport, SignatureCache,
};
use gateway_routing::{Account, AccountHandle, Dispatcher, InMemoryAccountPool, StaticCredentials};
use gateway_server::{serve, shutdown_signal, AppState};
use gateway_telemetry::{
    init_tracing, shutdown_tracing, ChannelRecorder, DispatchMetrics, TracingConfig,
    TracingRecorder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Records waiting to be logged and counted
const RECORD_QUEUE_CAPACITY: usize = 1024;
const RECORD_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Tracing may not be up yet
        eprintln!("cloudcode-gateway: {e:#}");
        error!(error = %e, "Application failed");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    let tracer = init_tracing(&TracingConfig::from_config(&config.telemetry))
        .context("failed to initialize tracing")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting Cloud Code gateway"
    );

    let accounts = load_accounts(&config);
    if accounts.is_empty() {
        warn!("No usable accounts configured; every request will fail until one is added");
    }

    let transport = HttpTransport::new(&config.endpoints)?;
    let discovery = CodeAssistProjectResolver::new(
        transport.client().clone(),
        EndpointList::new(&config.endpoints.urls)?,
    );
    let pool = InMemoryAccountPool::new(
        accounts,
        Arc::new(StaticCredentials::with_discovery(Arc::new(discovery))),
    );

    let signatures = Arc::new(SignatureCache::new(&config.signatures));
    let sweeper = signatures.start_sweeper();

    let metrics = DispatchMetrics::new().context("failed to register metrics")?;
    let sink = metrics.clone();
    let (recorder, record_task) = ChannelRecorder::spawn(RECORD_QUEUE_CAPACITY, move |record| {
        TracingRecorder.record(record.clone());
        sink.record(record);
    });

    let dispatcher = Dispatcher::builder()
        .config(&config)?
        .pool(Arc::new(pool))
        .transport(Arc::new(transport))
        .signatures(signatures)
        .recorder(Arc::new(recorder))
        .build()?;

    let state = AppState::new(Arc::new(dispatcher))
        .with_metrics(metrics)
        .with_request_timeout(config.server.request_timeout);

    let addr: SocketAddr = config
        .server
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_address()))?;

    let served = serve(state, addr, async {
        shutdown_signal().await;
    })
    .await;

    // The server owned the last recorder clone; the drain task ends once its
    // queue is empty.
    match tokio::time::timeout(RECORD_DRAIN_TIMEOUT, record_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Record task ended abnormally"),
        Err(_) => warn!("Timed out draining request records"),
    }
    sweeper.shutdown().await;
    shutdown_tracing(tracer);

    served.context("server error")
}

/// Build pool accounts from configuration, reading credential files where
/// given. Accounts whose credential cannot be read are skipped.
fn load_accounts(config: &GatewayConfig) -> Vec<AccountHandle> {
    config
        .accounts
        .iter()
        .filter_map(|entry| match account_from_config(entry) {
            Ok(account) => Some(account.into_handle()),
            Err(e) => {
                warn!(account = %entry.email, error = %e, "Skipping account");
                None
            }
        })
        .collect()
}

fn account_from_config(entry: &AccountConfig) -> anyhow::Result<Account> {
    let mut account = Account::new(&entry.email);
    let mut project = entry.project_id.clone();

    if let Some(token) = &entry.access_token {
        account = account.with_token(token.clone());
    } else if let Some(path) = &entry.credential_file {
        let stored = read_credential_file(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if stored.is_expired(chrono::Utc::now()) {
            warn!(account = %entry.email, "Stored credential has expired");
        }
        project = project.or(stored.project_id);
        account = account.with_token(stored.api_key);
    }

    if let Some(project) = project {
        account = account.with_project(project);
    }
    Ok(account)
}
