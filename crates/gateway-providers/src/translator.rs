//! SSE stream translation.
//!
//! Turns the raw `data: <json>` byte stream of `streamGenerateContent` into
//! normalized [`StreamEvent`]s. A translator is created per attempt and owns
//! all decode state, so discarding it on failover leaks nothing.

use crate::classify::classify_error_frame;
use crate::signature_cache::SignatureCache;
use futures::StreamExt;
use gateway_core::{
    ArgumentShim, ByteStream, EventStream, FinishReason, GatewayError, GatewayResult, ModelFamily,
    StreamEvent, Usage,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest pending line kept while waiting for its terminator
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Decodes individual SSE lines into events
pub struct FrameDecoder {
    family: ModelFamily,
    cache: Arc<SignatureCache>,
    shim: Arc<dyn ArgumentShim>,
    finish_reason: Option<FinishReason>,
    saw_tool_call: bool,
    skipped_frames: usize,
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("family", &self.family)
            .field("finish_reason", &self.finish_reason)
            .field("skipped_frames", &self.skipped_frames)
            .finish_non_exhaustive()
    }
}

impl FrameDecoder {
    /// Create a decoder for responses from `model`
    pub fn new(model: &str, cache: Arc<SignatureCache>, shim: Arc<dyn ArgumentShim>) -> Self {
        Self {
            family: ModelFamily::from_model(model),
            cache,
            shim,
            finish_reason: None,
            saw_tool_call: false,
            skipped_frames: 0,
        }
    }

    /// Last finish reason reported upstream
    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        match self.finish_reason {
            Some(FinishReason::Stop) if self.saw_tool_call => Some(FinishReason::ToolCalls),
            other => other,
        }
    }

    /// Frames skipped as malformed so far
    #[must_use]
    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    /// Decode one line (without its terminator).
    ///
    /// Blank lines, SSE comments, non-`data` fields and `[DONE]` yield no
    /// events.
    ///
    /// # Errors
    /// Returns [`GatewayError::MalformedFrame`] when the payload is not JSON
    pub fn decode_line(&mut self, line: &str) -> GatewayResult<Vec<StreamEvent>> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(Vec::new());
        };
        let data = data.trim_start();
        if data.is_empty() || data == "[DONE]" {
            return Ok(Vec::new());
        }

        let frame: Value = serde_json::from_str(data)?;
        Ok(self.decode_frame(&frame))
    }

    /// Count a line dropped for exceeding [`MAX_LINE_BYTES`]
    pub fn skip_oversized(&mut self, len: usize) {
        self.skipped_frames += 1;
        warn!(bytes = len, limit = MAX_LINE_BYTES, "Dropping oversized upstream frame");
    }

    /// Decode a raw line, logging and skipping malformed frames
    pub fn decode_raw(&mut self, raw: &[u8]) -> Vec<StreamEvent> {
        let decoded = std::str::from_utf8(raw)
            .map_err(|e| GatewayError::malformed_frame(format!("invalid UTF-8: {e}")))
            .and_then(|line| self.decode_line(line));

        match decoded {
            Ok(events) => events,
            Err(err) => {
                self.skipped_frames += 1;
                warn!(error = %err, bytes = raw.len(), "Skipping malformed upstream frame");
                Vec::new()
            }
        }
    }

    fn decode_frame(&mut self, frame: &Value) -> Vec<StreamEvent> {
        if frame.get("error").is_some() {
            let failure = classify_error_frame(frame);
            let err = failure.into_error("stream", "stream");
            return vec![StreamEvent::from_error(&err)];
        }

        let response = frame.get("response").unwrap_or(frame);
        let mut events = Vec::new();

        let candidate = response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first());

        if let Some(parts) = candidate
            .and_then(|c| c.pointer("/content/parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                self.decode_part(part, &mut events);
            }
        }

        if let Some(usage) = response.get("usageMetadata").map(parse_usage) {
            events.push(StreamEvent::Usage(usage));
        }

        if let Some(reason) = candidate
            .and_then(|c| c.get("finishReason"))
            .and_then(Value::as_str)
        {
            self.finish_reason = Some(FinishReason::from_upstream(reason));
        }

        events
    }

    fn decode_part(&mut self, part: &Value, events: &mut Vec<StreamEvent>) {
        let signature = part
            .get("thoughtSignature")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());

        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map_or_else(
                    || format!("toolu_{}", uuid::Uuid::new_v4().simple()),
                    ToString::to_string,
                );

            let mut args = call
                .get("args")
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            self.shim.remap(&name, &mut args);

            if let Some(sig) = signature {
                self.cache.cache_signature(&id, sig);
                self.cache.cache_thinking_signature(sig, self.family);
            }

            self.saw_tool_call = true;
            events.push(StreamEvent::ToolCallStart {
                id: id.clone(),
                name,
            });
            events.push(StreamEvent::ToolCallArgs {
                id: id.clone(),
                arguments: args.to_string(),
            });
            events.push(StreamEvent::ToolCallEnd { id });
            return;
        }

        let text = part.get("text").and_then(Value::as_str).unwrap_or_default();
        let is_thought = part.get("thought").and_then(Value::as_bool) == Some(true);

        if let Some(sig) = signature {
            self.cache.cache_thinking_signature(sig, self.family);
        }

        if is_thought || (text.is_empty() && signature.is_some()) {
            events.push(StreamEvent::ThinkingDelta {
                text: text.to_string(),
                signature: signature.map(ToString::to_string),
            });
        } else if !text.is_empty() {
            events.push(StreamEvent::text(text));
        }
    }
}

fn parse_usage(meta: &Value) -> Usage {
    let count = |key: &str| {
        meta.get(key)
            .and_then(Value::as_u64)
            .map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX))
    };
    Usage {
        input_tokens: count("promptTokenCount"),
        output_tokens: count("candidatesTokenCount"),
        thinking_tokens: count("thoughtsTokenCount"),
        cached_tokens: count("cachedContentTokenCount"),
    }
}

/// Translates one upstream body into an ordered event stream
#[derive(Clone)]
pub struct StreamTranslator {
    model: String,
    cache: Arc<SignatureCache>,
    shim: Arc<dyn ArgumentShim>,
}

impl std::fmt::Debug for StreamTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTranslator")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl StreamTranslator {
    /// Create a translator for responses from `model`
    pub fn new(
        model: impl Into<String>,
        cache: Arc<SignatureCache>,
        shim: Arc<dyn ArgumentShim>,
    ) -> Self {
        Self {
            model: model.into(),
            cache,
            shim,
        }
    }

    /// Decode `body` into events.
    ///
    /// Events are yielded in decode order. `Done` is yielded only after the
    /// body reports end-of-stream. A transport error is yielded as `Err` and
    /// ends the stream; an upstream error frame is yielded as a terminal
    /// `Error` event.
    pub fn translate(&self, body: ByteStream) -> EventStream {
        let mut decoder = FrameDecoder::new(&self.model, Arc::clone(&self.cache), Arc::clone(&self.shim));
        let model = self.model.clone();

        let stream = async_stream::stream! {
            let mut body = body;
            let mut buf: Vec<u8> = Vec::new();
            // Inside an oversized line; bytes are dropped up to its newline
            let mut discarding = false;

            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                buf.extend_from_slice(&bytes);

                if discarding {
                    match buf.iter().position(|b| *b == b'\n') {
                        Some(pos) => {
                            buf.drain(..=pos);
                            discarding = false;
                        }
                        None => {
                            buf.clear();
                            continue;
                        }
                    }
                }

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    for event in decoder.decode_raw(&line[..pos]) {
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            return;
                        }
                    }
                }

                if buf.len() > MAX_LINE_BYTES {
                    decoder.skip_oversized(buf.len());
                    buf.clear();
                    discarding = true;
                }
            }

            if !buf.is_empty() {
                for event in decoder.decode_raw(&buf) {
                    let terminal = event.is_terminal();
                    yield Ok(event);
                    if terminal {
                        return;
                    }
                }
            }

            debug!(
                model = %model,
                skipped_frames = decoder.skipped_frames(),
                "Upstream stream completed"
            );
            yield Ok(StreamEvent::Done { finish_reason: decoder.finish_reason() });
        };

        stream.boxed()
    }
}
