//! Tracing subscriber setup.
//!
//! A `fmt` layer (plain or JSON) filtered by `RUST_LOG` or the configured
//! level, plus an OpenTelemetry layer when tracing is enabled.

use gateway_config::TelemetryConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{
    trace::{Config, RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use tracing::{info, Subscriber};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Enable tracing
    pub enabled: bool,
    /// Service name
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (dev, staging, prod)
    pub environment: String,
    /// Sampling rate (0.0 - 1.0)
    pub sampling_rate: f64,
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "cloudcode-gateway".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sampling_rate: 1.0,
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing configuration
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Build from the `telemetry` config section
    #[must_use]
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            enabled: config.tracing_enabled,
            service_name: config.service_name.clone(),
            environment: config.environment.clone(),
            log_level: config.log_level.clone(),
            json: config.json,
            ..Default::default()
        }
        .with_sampling_rate(config.sampling_rate)
    }

    /// Set the environment
    #[must_use]
    pub fn with_environment(mut self, env: impl Into<String>) -> Self {
        self.environment = env.into();
        self
    }

    /// Set the sampling rate
    #[must_use]
    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the log level
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Toggle JSON output
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Initialize tracing with the given configuration
///
/// # Errors
/// Returns error if tracing cannot be initialized
pub fn init_tracing(config: &TracingConfig) -> Result<Option<TracerProvider>, TracingError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TracingError::Filter(e.to_string()))?;

    if !config.enabled {
        tracing_subscriber::registry()
            .with(fmt_layer(config.json).with_filter(filter))
            .try_init()
            .map_err(|e| TracingError::Init(e.to_string()))?;

        return Ok(None);
    }

    let resource = Resource::new(vec![
        opentelemetry::KeyValue::new("service.name", config.service_name.clone()),
        opentelemetry::KeyValue::new("service.version", config.service_version.clone()),
        opentelemetry::KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let tracer_config = Config::default()
        .with_sampler(sampler_for(config.sampling_rate))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    let provider = TracerProvider::builder()
        .with_config(tracer_config)
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(fmt_layer(config.json).with_filter(filter))
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        sampling_rate = config.sampling_rate,
        json = config.json,
        "Tracing initialized"
    );

    Ok(Some(provider))
}

fn fmt_layer<S>(json: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    }
}

fn sampler_for(rate: f64) -> Sampler {
    if rate >= 1.0 {
        Sampler::AlwaysOn
    } else if rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(rate)
    }
}

/// Shutdown tracing and flush remaining spans
pub fn shutdown_tracing(provider: Option<TracerProvider>) {
    if let Some(provider) = provider {
        for result in provider.force_flush() {
            if let Err(err) = result {
                tracing::warn!(error = %err, "Failed to flush spans");
            }
        }
        drop(provider);
        info!("Tracing shutdown complete");
    }
}

/// Tracing initialization error
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// Failed to initialize tracing
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
    /// Invalid log filter directive
    #[error("Invalid log filter: {0}")]
    Filter(String),
}

/// Create a span for one dispatched request
#[macro_export]
macro_rules! dispatch_span {
    ($request_id:expr, $model:expr) => {
        tracing::info_span!(
            "dispatch",
            request_id = %$request_id,
            model = %$model,
            otel.kind = "server"
        )
    };
}

/// Create a span for one upstream attempt
#[macro_export]
macro_rules! upstream_span {
    ($endpoint:expr, $attempt:expr) => {
        tracing::info_span!(
            "upstream_call",
            endpoint = %$endpoint,
            attempt = $attempt,
            otel.kind = "client"
        )
    };
}
