//! Prometheus metrics fed from request records.

use gateway_core::{RequestRecord, RequestRecorder};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

/// Upstream call and token metrics
#[derive(Clone)]
pub struct DispatchMetrics {
    registry: Registry,
    upstream_calls: IntCounterVec,
    upstream_latency: HistogramVec,
    tokens: IntCounterVec,
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchMetrics").finish_non_exhaustive()
    }
}

impl DispatchMetrics {
    /// Create metrics on a fresh registry
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics on `registry`
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let upstream_calls = IntCounterVec::new(
            Opts::new("gateway_upstream_calls_total", "Upstream attempts by outcome"),
            &["endpoint", "outcome"],
        )?;
        let upstream_latency = HistogramVec::new(
            HistogramOpts::new(
                "gateway_upstream_latency_seconds",
                "Time to response head per upstream attempt",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["endpoint"],
        )?;
        let tokens = IntCounterVec::new(
            Opts::new("gateway_tokens_total", "Tokens by direction"),
            &["direction"],
        )?;

        registry.register(Box::new(upstream_calls.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(tokens.clone()))?;

        Ok(Self {
            registry,
            upstream_calls,
            upstream_latency,
            tokens,
        })
    }

    /// The underlying registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in the Prometheus text format
    #[must_use]
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            warn!(error = %err, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Upstream calls counted for `endpoint` and `outcome`
    #[must_use]
    pub fn upstream_calls(&self, endpoint: &str, outcome: &str) -> u64 {
        self.upstream_calls
            .with_label_values(&[endpoint, outcome])
            .get()
    }

    /// Tokens counted for `direction`
    #[must_use]
    pub fn tokens(&self, direction: &str) -> u64 {
        self.tokens.with_label_values(&[direction]).get()
    }
}

impl RequestRecorder for DispatchMetrics {
    fn record(&self, record: RequestRecord) {
        if record.summary {
            self.tokens
                .with_label_values(&["input"])
                .inc_by(u64::from(record.input_tokens));
            self.tokens
                .with_label_values(&["output"])
                .inc_by(u64::from(record.output_tokens));
            return;
        }

        let endpoint = endpoint_label(&record.url);
        self.upstream_calls
            .with_label_values(&[&endpoint, outcome_label(&record)])
            .inc();
        self.upstream_latency
            .with_label_values(&[&endpoint])
            .observe(record.duration.as_secs_f64());
    }
}

fn endpoint_label(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

fn outcome_label(record: &RequestRecord) -> &'static str {
    if record.is_success() {
        return "success";
    }
    match record.status {
        Some(429) => "rate_limited",
        Some(401 | 403) => "invalid_credential",
        Some(503) => "unavailable",
        Some(s) if s >= 500 => "server_error",
        Some(200..=299) => "stream_error",
        Some(_) => "client_error",
        None => "network_error",
    }
}
