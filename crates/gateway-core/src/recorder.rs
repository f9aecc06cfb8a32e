//! Per-attempt request records.
//!
//! Recording must never block or fail the request path. Implementations
//! that persist records hand them off to a background task.

use crate::types::RequestId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One upstream attempt, or the final summary of a dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Logical request id
    pub request_id: RequestId,
    /// HTTP method
    pub method: String,
    /// Upstream URL
    pub url: String,
    /// Upstream status, when one was received
    pub status: Option<u16>,
    /// Wall time of the attempt
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Prompt tokens (final record only)
    pub input_tokens: u32,
    /// Output tokens (final record only)
    pub output_tokens: u32,
    /// Error detail, if the attempt failed
    pub error: Option<String>,
    /// Account used
    pub account: Option<String>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Whether this is the end-of-stream summary rather than an attempt
    #[serde(default)]
    pub summary: bool,
}

impl RequestRecord {
    /// Start a record for an attempt against `url`
    pub fn new(request_id: RequestId, url: impl Into<String>, attempt: u32) -> Self {
        Self {
            request_id,
            method: "POST".to_string(),
            url: url.into(),
            status: None,
            duration: Duration::ZERO,
            input_tokens: 0,
            output_tokens: 0,
            error: None,
            account: None,
            attempt,
            summary: false,
        }
    }

    /// Whether the attempt succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.is_some_and(|s| (200..300).contains(&s))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Sink for request records
pub trait RequestRecorder: Send + Sync {
    /// Record an attempt. Must not block.
    fn record(&self, record: RequestRecord);
}

/// Discards every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl RequestRecorder for NoopRecorder {
    fn record(&self, _record: RequestRecord) {}
}
