//! HTTP request handlers for the gateway API.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, StreamExt};
use gateway_core::{DispatchRequest, StreamEvent};
use gateway_routing::AccountStatus;
use serde::Serialize;
use std::convert::Infallible;
use tracing::{debug, error, info};

use crate::{
    error::ApiError,
    extractors::{IncomingRequestId, JsonBody},
    state::AppState,
};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when at least one account is usable, otherwise `degraded`
    pub status: String,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Signature cache entries
    pub cached_signatures: usize,
    /// Per-account status
    pub accounts: Vec<AccountStatus>,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let accounts = state.dispatcher.pool().snapshot();
    let status = if accounts.iter().any(|a| a.available) {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        cached_signatures: state.dispatcher.signatures().len(),
        accounts,
    })
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(gateway_telemetry::DispatchMetrics::render)
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Dispatch a generate request
pub async fn generate(
    State(state): State<AppState>,
    IncomingRequestId(request_id): IncomingRequestId,
    JsonBody(body): JsonBody<DispatchRequest>,
) -> Result<Response, ApiError> {
    let request = body.with_id(request_id);
    debug!(
        request_id = %request.id,
        model = %request.model,
        streaming = request.stream,
        "Processing generate request"
    );

    if request.stream {
        handle_streaming_request(state, request).await
    } else {
        handle_non_streaming_request(state, request).await
    }
}

async fn handle_non_streaming_request(
    state: AppState,
    request: DispatchRequest,
) -> Result<Response, ApiError> {
    let request_id = request.id.clone();
    let result = tokio::time::timeout(state.request_timeout, state.dispatcher.dispatch(request))
        .await
        .map_err(|_| ApiError::timeout("Request timed out"))?;

    match result {
        Ok(response) => {
            info!(
                request_id = %request_id,
                attempts = response.attempts,
                output_tokens = response.usage.output_tokens,
                "Generate request completed"
            );
            Ok(Json(response).into_response())
        }
        Err(err) => {
            error!(request_id = %request_id, error = %err, "Generate request failed");
            Err(err.into())
        }
    }
}

async fn handle_streaming_request(
    state: AppState,
    request: DispatchRequest,
) -> Result<Response, ApiError> {
    let request_id = request.id.clone();
    let events = tokio::time::timeout(
        state.request_timeout,
        state.dispatcher.dispatch_stream(request),
    )
    .await
    .map_err(|_| ApiError::timeout("Timed out waiting for upstream"))?
    .map_err(|err| {
        error!(request_id = %request_id, error = %err, "Streaming request failed");
        ApiError::from(err)
    })?;

    let sse_stream = events
        .map(|item| {
            let event = item.unwrap_or_else(|err| StreamEvent::from_error(&err));
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok::<_, Infallible>(Event::default().data(data))
        })
        .chain(stream::once(async {
            Ok::<_, Infallible>(Event::default().data("[DONE]"))
        }));

    Ok(Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Fallback for unknown routes
pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", "Route not found")
}
