//! Shared handler state.

use gateway_routing::Dispatcher;
use gateway_telemetry::DispatchMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Request dispatcher
    pub dispatcher: Arc<Dispatcher>,
    /// Metrics rendered at `/metrics`
    pub metrics: Option<DispatchMetrics>,
    /// Upper bound on time to the first event (or full response)
    pub request_timeout: Duration,
    /// Process start
    pub started_at: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create state around a dispatcher
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            metrics: None,
            request_timeout: Duration::from_secs(600),
            started_at: Instant::now(),
        }
    }

    /// Attach metrics
    #[must_use]
    pub fn with_metrics(mut self, metrics: DispatchMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
