//! Mock Cloud Code upstream for integration testing
//!
//! Wraps a wiremock server that answers `v1internal:streamGenerateContent`.

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, Request, ResponseTemplate};

/// Path of the streaming generate method
pub const STREAM_PATH: &str = "/v1internal:streamGenerateContent";

/// Mock upstream endpoint
pub struct MockUpstream {
    /// The underlying mock server
    pub server: MockServer,
}

impl MockUpstream {
    /// Start a new mock upstream
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure as an endpoint
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    fn generate() -> MockBuilder {
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(query_param("alt", "sse"))
    }

    fn generate_for(token: &str) -> MockBuilder {
        Self::generate().and(header("authorization", format!("Bearer {token}").as_str()))
    }

    /// Answer every generate call with `frames` as an SSE body
    pub async fn mock_stream(&self, frames: &[Value], expected_calls: u64) {
        Self::generate()
            .respond_with(sse_response(frames))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Answer generate calls made with `token` with `frames`
    pub async fn mock_stream_for(&self, token: &str, frames: &[Value], expected_calls: u64) {
        Self::generate_for(token)
            .respond_with(sse_response(frames))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Answer every generate call with a 503 capacity error
    pub async fn mock_capacity_exhausted(&self, expected_calls: u64) {
        Self::generate()
            .respond_with(ResponseTemplate::new(503).set_body_json(capacity_error()))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Answer calls made with `token` with a 429 and a `retryDelay`
    pub async fn mock_rate_limited_for(&self, token: &str, retry_delay: &str, expected_calls: u64) {
        Self::generate_for(token)
            .respond_with(ResponseTemplate::new(429).set_body_json(rate_limit_error(retry_delay)))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Answer calls made with `token` with `status` and a plain error body
    pub async fn mock_status_for(&self, token: &str, status: u16, expected_calls: u64) {
        Self::generate_for(token)
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {"code": status, "message": format!("status {status}")}
            })))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Answer every generate call with `status` and a plain error body
    pub async fn mock_status(&self, status: u16, expected_calls: u64) {
        Self::generate()
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {"code": status, "message": format!("status {status}")}
            })))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    /// Generate requests received so far
    pub async fn generate_requests(&self) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == STREAM_PATH)
            .collect()
    }

    /// Parsed body of the `n`th generate request
    pub async fn generate_body(&self, n: usize) -> Value {
        let requests = self.generate_requests().await;
        requests[n].body_json().unwrap_or(Value::Null)
    }
}

fn sse_response(frames: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse_body(frames))
}

/// Encode `frames` as `data:` lines
pub fn sse_body(frames: &[Value]) -> String {
    frames
        .iter()
        .map(|frame| format!("data: {frame}\r\n\r\n"))
        .collect()
}

/// Upstream frame wrapping one candidate with `parts`
pub fn frame(parts: Value) -> Value {
    json!({"response": {"candidates": [{"content": {"role": "model", "parts": parts}}]}})
}

/// Final frame with a finish reason and usage
pub fn final_frame(prompt_tokens: u32, output_tokens: u32) -> Value {
    json!({"response": {
        "candidates": [{"content": {"role": "model", "parts": []}, "finishReason": "STOP"}],
        "usageMetadata": {
            "promptTokenCount": prompt_tokens,
            "candidatesTokenCount": output_tokens,
            "totalTokenCount": prompt_tokens + output_tokens
        }
    }})
}

/// A short text reply split into frames
pub fn text_reply(chunks: &[&str]) -> Vec<Value> {
    let mut frames: Vec<Value> = chunks
        .iter()
        .map(|text| frame(json!([{"text": text}])))
        .collect();
    frames.push(final_frame(12, 4));
    frames
}

/// 503 body carrying `MODEL_CAPACITY_EXHAUSTED`
pub fn capacity_error() -> Value {
    json!({"error": {
        "code": 503,
        "message": "No capacity available for model gemini-3-pro-high on the server",
        "status": "UNAVAILABLE",
        "details": [{
            "@type": "type.googleapis.com/google.rpc.ErrorInfo",
            "reason": "MODEL_CAPACITY_EXHAUSTED",
            "domain": "cloudcode-pa.googleapis.com"
        }]
    }})
}

/// 429 body carrying `RATE_LIMIT_EXCEEDED` and a retry delay
pub fn rate_limit_error(retry_delay: &str) -> Value {
    json!({"error": {
        "code": 429,
        "message": "Resource has been exhausted (e.g. check quota).",
        "status": "RESOURCE_EXHAUSTED",
        "details": [
            {
                "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                "reason": "RATE_LIMIT_EXCEEDED",
                "domain": "cloudcode-pa.googleapis.com"
            },
            {
                "@type": "type.googleapis.com/google.rpc.RetryInfo",
                "retryDelay": retry_delay
            }
        ]
    }})
}
