//! Upstream failure classification.
//!
//! Raw error bodies are parsed here and nowhere else. The dispatcher only
//! sees an [`UpstreamFailure`].

use chrono::{DateTime, Utc};
use gateway_core::GatewayError;
use http::{HeaderMap, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Capacity exhaustion reason code
pub const REASON_MODEL_CAPACITY_EXHAUSTED: &str = "MODEL_CAPACITY_EXHAUSTED";
/// Per-minute rate limit reason code
pub const REASON_RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
/// Quota exhaustion reason code
pub const REASON_QUOTA_EXHAUSTED: &str = "QUOTA_EXHAUSTED";

/// Upper bound applied to upstream reset hints
pub const MAX_RETRY_HINT: Duration = Duration::from_secs(24 * 60 * 60);

static DURATION_PART: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ms|h|m|s)").ok());

/// Classified upstream failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// Endpoint/region has no capacity for the model
    CapacityExhausted {
        /// Upstream message
        message: String,
    },
    /// Account-scoped rate limit
    RateLimited {
        /// Provider supplied reset delay
        retry_after: Option<Duration>,
        /// Upstream message
        message: String,
    },
    /// Credential rejected
    InvalidCredential {
        /// Upstream message
        message: String,
    },
    /// Anything else
    Transport {
        /// HTTP status, if any
        status: Option<u16>,
        /// Upstream message
        message: String,
        /// Whether another attempt may succeed
        retryable: bool,
    },
}

impl UpstreamFailure {
    /// Convert into the gateway taxonomy
    #[must_use]
    pub fn into_error(self, endpoint: &str, account: &str) -> GatewayError {
        match self {
            Self::CapacityExhausted { message } => GatewayError::capacity_exhausted(endpoint, message),
            Self::RateLimited {
                retry_after,
                message,
            } => GatewayError::rate_limited(account, retry_after, message),
            Self::InvalidCredential { message } => GatewayError::invalid_credential(account, message),
            Self::Transport {
                status,
                message,
                retryable,
            } => GatewayError::transport(message, status, retryable),
        }
    }

    /// Upstream message
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::CapacityExhausted { message }
            | Self::RateLimited { message, .. }
            | Self::InvalidCredential { message }
            | Self::Transport { message, .. } => message,
        }
    }
}

/// Classify a non-2xx response
#[must_use]
pub fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &str) -> UpstreamFailure {
    let json: Option<Value> = serde_json::from_str(body.trim()).ok();
    let error = json.as_ref().and_then(|j| j.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map_or_else(|| truncate(body), ToString::to_string);

    let failure = classify_parts(status.as_u16(), error, message, headers);
    debug!(status = status.as_u16(), failure = ?failure, "Classified upstream failure");
    failure
}

/// Classify an `{"error": ...}` frame found inside a 2xx stream
#[must_use]
pub fn classify_error_frame(frame: &Value) -> UpstreamFailure {
    let error = frame.get("error");
    let status = error
        .and_then(|e| e.get("code"))
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(500);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("upstream error frame")
        .to_string();
    classify_parts(status, error, message, &HeaderMap::new())
}

fn classify_parts(
    status: u16,
    error: Option<&Value>,
    message: String,
    headers: &HeaderMap,
) -> UpstreamFailure {
    let reasons = detail_reasons(error);
    let has_reason = |r: &str| reasons.iter().any(|x| *x == r);
    let error_status = error
        .and_then(|e| e.get("status"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if status == 503 && has_reason(REASON_MODEL_CAPACITY_EXHAUSTED) {
        return UpstreamFailure::CapacityExhausted { message };
    }

    if status == 429
        || has_reason(REASON_RATE_LIMIT_EXCEEDED)
        || has_reason(REASON_QUOTA_EXHAUSTED)
        || error_status == "RESOURCE_EXHAUSTED"
    {
        return UpstreamFailure::RateLimited {
            retry_after: retry_after(headers, error),
            message,
        };
    }

    match status {
        401 | 403 => UpstreamFailure::InvalidCredential { message },
        408 | 500..=599 => UpstreamFailure::Transport {
            status: Some(status),
            message,
            retryable: true,
        },
        _ => UpstreamFailure::Transport {
            status: Some(status),
            message,
            retryable: false,
        },
    }
}

fn detail_reasons(error: Option<&Value>) -> Vec<&str> {
    error
        .and_then(|e| e.get("details"))
        .and_then(Value::as_array)
        .map(|details| {
            details
                .iter()
                .filter_map(|d| d.get("reason").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn details(error: Option<&Value>) -> impl Iterator<Item = &Value> {
    error
        .and_then(|e| e.get("details"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Reset delay, from the `Retry-After` header, `RetryInfo.retryDelay`,
/// `metadata.quotaResetDelay` or `metadata.quotaResetTimeStamp`, in that order.
///
/// Capped at [`MAX_RETRY_HINT`].
fn retry_after(headers: &HeaderMap, error: Option<&Value>) -> Option<Duration> {
    upstream_retry_hint(headers, error).map(|hint| hint.min(MAX_RETRY_HINT))
}

fn upstream_retry_hint(headers: &HeaderMap, error: Option<&Value>) -> Option<Duration> {
    if let Some(secs) = headers
        .get(http::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(secs));
    }

    if let Some(delay) = details(error)
        .filter_map(|d| d.get("retryDelay").and_then(Value::as_str))
        .find_map(parse_duration_str)
    {
        return Some(delay);
    }

    if let Some(delay) = details(error)
        .filter_map(|d| d.pointer("/metadata/quotaResetDelay").and_then(Value::as_str))
        .find_map(parse_duration_str)
    {
        return Some(delay);
    }

    details(error)
        .filter_map(|d| d.pointer("/metadata/quotaResetTimeStamp").and_then(Value::as_str))
        .find_map(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|reset| {
            let remaining = reset.with_timezone(&Utc) - Utc::now();
            remaining.to_std().unwrap_or(Duration::ZERO)
        })
}

/// Parse Google-style durations such as `"3.5s"`, `"1h2m3s"` or `"250ms"`.
///
/// Returns `None` when the total does not fit in a [`Duration`].
#[must_use]
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let pattern = DURATION_PART.as_ref()?;
    let mut total = Duration::ZERO;
    let mut matched = false;
    for caps in pattern.captures_iter(s.trim()) {
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let secs = match caps.get(2)?.as_str() {
            "h" => value * 3600.0,
            "m" => value * 60.0,
            "s" => value,
            "ms" => value / 1000.0,
            _ => return None,
        };
        total = total.checked_add(Duration::try_from_secs_f64(secs).ok()?)?;
        matched = true;
    }
    matched.then_some(total)
}

fn truncate(body: &str) -> String {
    const MAX: usize = 512;
    let body = body.trim();
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
