//! Request fixtures

use serde_json::{json, Value};

/// Model used by most tests
pub const TEST_MODEL: &str = "gemini-3-pro-high";

/// A single-turn generate body
pub fn generate_request(prompt: &str, stream: bool) -> Value {
    json!({
        "model": TEST_MODEL,
        "stream": stream,
        "request": {
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {"maxOutputTokens": 256}
        }
    })
}

/// A follow-up turn whose history replays tool call `call_id` without
/// its thought signature, the way Claude clients send it back
pub fn tool_followup_request(call_id: &str, model: &str) -> Value {
    json!({
        "model": model,
        "request": {
            "contents": [
                {"role": "user", "parts": [{"text": "read the file"}]},
                {"role": "model", "parts": [
                    {"functionCall": {"id": call_id, "name": "Read", "args": {"file_path": "src/lib.rs"}}}
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"id": call_id, "name": "Read", "response": {"output": "fn main() {}"}}}
                ]}
            ]
        }
    })
}
