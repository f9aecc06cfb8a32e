//! Endpoint failover and account rotation over real HTTP

use crate::*;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

const LOCAL_HOST: &str = "127.0.0.1";

#[tokio::test]
async fn test_capacity_exhaustion_fails_over_to_next_endpoint() {
    let primary = MockUpstream::start().await;
    let secondary = MockUpstream::start().await;
    primary.mock_capacity_exhausted(1).await;
    secondary.mock_stream(&text_reply(&["Hello", " world"]), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(primary.uri())
        .endpoint(secondary.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "Hello world");
    assert_eq!(body["attempts"], 2);
    assert_eq!(body["usage"]["input_tokens"], 12);

    // Same account and project on both endpoints
    let first = primary.generate_body(0).await;
    let second = secondary.generate_body(0).await;
    assert_eq!(first["project"], "test-project");
    assert_eq!(first["requestId"], second["requestId"]);
    assert_eq!(gateway.metrics.upstream_calls(LOCAL_HOST, "unavailable"), 1);
    assert_eq!(gateway.metrics.upstream_calls(LOCAL_HOST, "success"), 1);
}

#[tokio::test]
async fn test_retries_exhausted_after_backoff_budget() {
    let primary = MockUpstream::start().await;
    let secondary = MockUpstream::start().await;
    primary.mock_capacity_exhausted(1).await;
    // Failover stays on the last endpoint once the list is spent
    secondary.mock_capacity_exhausted(3).await;

    let gateway = TestGateway::builder()
        .endpoint(primary.uri())
        .endpoint(secondary.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "retries_exhausted");
}

#[tokio::test]
async fn test_rate_limited_account_is_rotated_out() {
    let upstream = MockUpstream::start().await;
    upstream.mock_rate_limited_for("tok-a", "30s", 1).await;
    upstream
        .mock_stream_for("tok-b", &text_reply(&["from b"]), 1)
        .await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .account("b@example.com", "tok-b")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "from b");

    let health: Value = gateway.get("/health").await.json().await.unwrap();
    let a = &health["accounts"][0];
    assert_eq!(a["email"], "a@example.com");
    assert_eq!(a["available"], false);
    assert!(a["rate_limit_remaining_ms"].as_u64().unwrap() > 25_000);
    assert_eq!(health["accounts"][1]["available"], true);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_single_account_waits_out_short_rate_limit() {
    let upstream = MockUpstream::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(rate_limit_error("300ms")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&upstream.server)
        .await;
    upstream.mock_stream(&text_reply(&["after wait"]), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let started = Instant::now();
    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() >= Duration::from_millis(300));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "after wait");
}

#[tokio::test]
async fn test_long_rate_limit_reports_pool_exhausted() {
    let upstream = MockUpstream::start().await;
    upstream.mock_rate_limited_for("tok-a", "60s", 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((55..=60).contains(&retry_after));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "pool_exhausted");

    let health: Value = gateway.get("/health").await.json().await.unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_rejected_credential_marks_account_invalid() {
    let upstream = MockUpstream::start().await;
    upstream.mock_status_for("tok-a", 401, 1).await;
    upstream
        .mock_stream_for("tok-b", &text_reply(&["ok"]), 2)
        .await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .account("b@example.com", "tok-b")
        .start()
        .await;

    for _ in 0..2 {
        let response = gateway.generate(&generate_request("hi", false)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let health: Value = gateway.get("/health").await.json().await.unwrap();
    assert_eq!(health["accounts"][0]["invalid"], true);
    assert_eq!(health["accounts"][0]["available"], false);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let upstream = MockUpstream::start().await;
    upstream.mock_status(400, 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .account("b@example.com", "tok-b")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "transport_failure");
    assert_eq!(gateway.metrics.upstream_calls(LOCAL_HOST, "client_error"), 1);
}

#[tokio::test]
async fn test_server_errors_surface_at_failure_threshold() {
    let upstream = MockUpstream::start().await;
    upstream.mock_status(500, 3).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let health: Value = gateway.get("/health").await.json().await.unwrap();
    assert_eq!(health["accounts"][0]["consecutive_failures"], 3);
}

#[tokio::test]
async fn test_capacity_error_frame_in_stream_fails_over() {
    let primary = MockUpstream::start().await;
    let secondary = MockUpstream::start().await;
    primary.mock_stream(&[capacity_error()], 1).await;
    secondary.mock_stream(&text_reply(&["recovered"]), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(primary.uri())
        .endpoint(secondary.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "recovered");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_transport_failure() {
    // Bind then release a port so nothing is listening on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let gateway = TestGateway::builder()
        .endpoint(dead_uri)
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(gateway.metrics.upstream_calls(LOCAL_HOST, "network_error"), 3);
}

#[tokio::test]
async fn test_bearer_token_is_sent_per_account() {
    let upstream = MockUpstream::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(header("authorization", "Bearer tok-a"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&text_reply(&["ok"]))),
        )
        .expect(1)
        .mount(&upstream.server)
        .await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let sent = upstream.generate_body(0).await;
    assert_eq!(sent["model"], TEST_MODEL);
    assert_eq!(sent["request"]["generationConfig"], json!({"maxOutputTokens": 256}));
}
