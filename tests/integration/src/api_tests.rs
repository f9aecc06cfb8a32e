//! HTTP API behaviour: streaming, health, metrics and request validation

use crate::*;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_streaming_generate_emits_events_then_done_marker() {
    let upstream = MockUpstream::start().await;
    upstream.mock_stream(&text_reply(&["Hel", "lo"]), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", true)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = read_sse_events(response).await;
    let types: Vec<&str> = events
        .iter()
        .map(|e| e.get("type").and_then(Value::as_str).unwrap_or("[DONE]"))
        .collect();
    assert_eq!(
        types,
        vec!["text_delta", "text_delta", "usage", "done", "[DONE]"]
    );
    assert_eq!(events[0]["text"], "Hel");
    assert_eq!(events[2]["input_tokens"], 12);
    assert_eq!(events[3]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_streaming_failover_happens_before_first_event() {
    let primary = MockUpstream::start().await;
    let secondary = MockUpstream::start().await;
    primary.mock_capacity_exhausted(1).await;
    secondary.mock_stream(&text_reply(&["ok"]), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(primary.uri())
        .endpoint(secondary.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", true)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let events = read_sse_events(response).await;
    assert!(events.iter().all(|e| e["type"] != "error"));
    assert_eq!(events[0]["text"], "ok");
}

#[tokio::test]
async fn test_streaming_error_before_commit_is_an_http_error() {
    let upstream = MockUpstream::start().await;
    upstream.mock_status(400, 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", true)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_stream_cut_after_commit_ends_with_error_event() {
    let upstream = MockUpstream::start().await;
    let mut body = sse_body(&[frame(json!([{"text": "partial"}]))]);
    body.push_str("data: {\"error\": {\"code\": 500, \"message\": \"backend reset\"}}\n\n");
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&upstream.server)
        .await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let events = read_sse_events(gateway.generate(&generate_request("hi", true)).await).await;
    assert_eq!(events[0]["text"], "partial");
    let error = events.iter().find(|e| e["type"] == "error").unwrap();
    assert_eq!(error["kind"], "transport_failure");
    assert_eq!(events.last(), Some(&Value::Null));
}

#[tokio::test]
async fn test_request_timeout_returns_gateway_timeout() {
    let upstream = MockUpstream::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&text_reply(&["late"])))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&upstream.server)
        .await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .request_timeout(Duration::from_millis(200))
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "timeout");
}

#[tokio::test]
async fn test_empty_model_is_rejected() {
    let gateway = TestGateway::builder()
        .endpoint("http://127.0.0.1:9")
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway
        .generate(&json!({"model": " ", "request": {"contents": []}}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "validation");
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let gateway = TestGateway::builder()
        .endpoint("http://127.0.0.1:9")
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway
        .client
        .post(gateway.url("/v1/generate"))
        .header("content-type", "application/json")
        .body("{\"model\":")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_lists_accounts() {
    let gateway = TestGateway::builder()
        .endpoint("http://127.0.0.1:9")
        .account("a@example.com", "tok-a")
        .account("b@example.com", "tok-b")
        .start()
        .await;

    let response = gateway.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: Value = response.json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["accounts"].as_array().unwrap().len(), 2);
    assert_eq!(health["accounts"][1]["email"], "b@example.com");
    assert_eq!(health["cached_signatures"], 0);
}

#[tokio::test]
async fn test_metrics_expose_upstream_calls_and_tokens() {
    let upstream = MockUpstream::start().await;
    upstream.mock_stream(&text_reply(&["counted"]), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("hi", false)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let text = gateway.get("/metrics").await.text().await.unwrap();
    assert!(text.contains("gateway_upstream_calls_total{endpoint=\"127.0.0.1\",outcome=\"success\"} 1"));
    assert!(text.contains("gateway_tokens_total{direction=\"input\"} 12"));
    assert!(text.contains("gateway_tokens_total{direction=\"output\"} 4"));
}
