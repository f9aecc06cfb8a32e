//! `v1internal` request envelope and signature re-attachment.

use crate::signature_cache::SignatureCache;
use gateway_core::{ModelFamily, RequestId};
use serde_json::{json, Value};
use tracing::debug;

const ENVELOPE_USER_AGENT: &str = "antigravity";

/// Wrap a Gemini `generateContent` body in the Cloud Code envelope
#[must_use]
pub fn wrap_request(project: &str, model: &str, payload: Value, request_id: &RequestId) -> Value {
    json!({
        "project": project,
        "model": model,
        "request": payload,
        "requestId": request_id.as_str(),
        "userAgent": ENVELOPE_USER_AGENT,
    })
}

/// Outcome of [`restore_signatures`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    /// Tool calls that had a cached signature re-attached
    pub restored: usize,
    /// Thinking parts dropped because another family issued them
    pub dropped: usize,
}

/// Prepare conversation history for `target` before a call.
///
/// `functionCall` parts missing a `thoughtSignature` get the cached one for
/// their call id. Thinking parts whose signature was issued by a different
/// model family are removed, since the target would reject them.
pub fn restore_signatures(
    payload: &mut Value,
    cache: &SignatureCache,
    target: ModelFamily,
) -> RestoreStats {
    let mut stats = RestoreStats::default();
    let Some(contents) = payload.get_mut("contents").and_then(Value::as_array_mut) else {
        return stats;
    };

    for message in contents.iter_mut() {
        let Some(parts) = message.get_mut("parts").and_then(Value::as_array_mut) else {
            continue;
        };

        parts.retain(|part| {
            let is_thought = part.get("thought").and_then(Value::as_bool) == Some(true);
            if !is_thought {
                return true;
            }
            let foreign = part
                .get("thoughtSignature")
                .and_then(Value::as_str)
                .and_then(|sig| cache.get_cached_signature_family(sig))
                .is_some_and(|family| family != target);
            if foreign {
                stats.dropped += 1;
            }
            !foreign
        });

        for part in parts.iter_mut() {
            if part.get("thoughtSignature").is_some() {
                continue;
            }
            let Some(id) = part
                .pointer("/functionCall/id")
                .and_then(Value::as_str)
                .map(ToString::to_string)
            else {
                continue;
            };
            if let (Some(sig), Some(obj)) = (cache.get_cached_signature(&id), part.as_object_mut()) {
                obj.insert("thoughtSignature".to_string(), Value::String(sig));
                stats.restored += 1;
            }
        }
    }

    if stats != RestoreStats::default() {
        debug!(
            restored = stats.restored,
            dropped = stats.dropped,
            target = %target,
            "Adjusted thought signatures in history"
        );
    }
    stats
}
