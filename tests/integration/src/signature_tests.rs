//! Thought-signature continuity across requests

use crate::*;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};

fn signature() -> String {
    format!("CtQB{}", "a1b2c3d4".repeat(8))
}

fn tool_call_reply(call_id: &str, sig: &str) -> Vec<Value> {
    vec![
        frame(json!([
            {"text": "Let me read it.", "thought": true, "thoughtSignature": sig},
            {"functionCall": {"id": call_id, "name": "Read", "args": {"file_path": "src/lib.rs"}}, "thoughtSignature": sig}
        ])),
        final_frame(20, 8),
    ]
}

#[tokio::test]
async fn test_tool_call_signature_is_cached() {
    let sig = signature();
    let upstream = MockUpstream::start().await;
    upstream.mock_stream(&tool_call_reply("toolu_1", &sig), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let response = gateway.generate(&generate_request("read the file", false)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["finish_reason"], "tool_calls");
    let tool = body["content"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["type"] == "tool_use")
        .unwrap();
    assert_eq!(tool["id"], "toolu_1");
    assert_eq!(tool["input"]["file_path"], "src/lib.rs");

    let signatures = gateway.dispatcher.signatures();
    assert_eq!(signatures.get_cached_signature("toolu_1"), Some(sig.clone()));
    assert_eq!(
        signatures.get_cached_signature_family(&sig),
        Some(gateway_core::ModelFamily::Gemini)
    );
}

#[tokio::test]
async fn test_signatures_survive_within_one_gateway() {
    let sig = signature();
    let upstream = MockUpstream::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path(STREAM_PATH))
        .respond_with(
            wiremock::ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&tool_call_reply("toolu_7", &sig))),
        )
        .up_to_n_times(1)
        .mount(&upstream.server)
        .await;
    upstream.mock_stream(&text_reply(&["thanks"]), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;

    let first = gateway.generate(&generate_request("read", false)).await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = gateway
        .generate(&tool_followup_request("toolu_7", TEST_MODEL))
        .await;
    assert_eq!(second.status(), StatusCode::OK);

    let sent = upstream.generate_body(1).await;
    assert_eq!(
        sent["request"]["contents"][1]["parts"][0]["thoughtSignature"],
        sig.as_str()
    );
}

#[tokio::test]
async fn test_foreign_family_thinking_is_dropped() {
    let sig = signature();
    let upstream = MockUpstream::start().await;
    upstream.mock_stream(&text_reply(&["ok"]), 1).await;

    let gateway = TestGateway::builder()
        .endpoint(upstream.uri())
        .account("a@example.com", "tok-a")
        .start()
        .await;
    gateway
        .dispatcher
        .signatures()
        .cache_thinking_signature(&sig, gateway_core::ModelFamily::Gemini);

    let body = json!({
        "model": "claude-sonnet-4-5-thinking",
        "request": {"contents": [
            {"role": "user", "parts": [{"text": "hi"}]},
            {"role": "model", "parts": [
                {"text": "earlier reasoning", "thought": true, "thoughtSignature": sig},
                {"text": "earlier answer"}
            ]},
            {"role": "user", "parts": [{"text": "continue"}]}
        ]}
    });
    let response = gateway.generate(&body).await;
    assert_eq!(response.status(), StatusCode::OK);

    let sent = upstream.generate_body(0).await;
    let parts = sent["request"]["contents"][1]["parts"].as_array().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0]["text"], "earlier answer");
}
