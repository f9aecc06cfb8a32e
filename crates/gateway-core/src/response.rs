//! Aggregated (non-streaming) responses.
//!
//! A non-streaming dispatch drains the same [`StreamEvent`] sequence a
//! streaming one would, and folds it into an [`AggregatedResponse`].

use crate::error::{GatewayError, GatewayResult};
use crate::streaming::{FinishReason, StreamEvent, Usage};
use crate::types::RequestId;
use serde::{Deserialize, Serialize};

/// A completed response block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Visible text
    Text {
        /// Concatenated text
        text: String,
    },
    /// Reasoning text
    Thinking {
        /// Concatenated reasoning
        text: String,
        /// Signature attached to the block
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// A tool invocation
    ToolUse {
        /// Tool call id
        id: String,
        /// Tool name
        name: String,
        /// Parsed arguments
        input: serde_json::Value,
    },
}

/// Full response of a non-streaming dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    /// Request id
    pub id: RequestId,
    /// Model that served the request
    pub model: String,
    /// Content blocks in emission order
    pub content: Vec<ContentBlock>,
    /// Final usage
    pub usage: Usage,
    /// Finish reason
    pub finish_reason: Option<FinishReason>,
    /// Upstream attempts made before the response committed
    pub attempts: u32,
}

#[derive(Debug)]
struct PendingTool {
    id: String,
    name: String,
    arguments: String,
}

/// Folds stream events into content blocks
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    content: Vec<ContentBlock>,
    tools: Vec<PendingTool>,
    usage: Usage,
    finish_reason: Option<FinishReason>,
    done: bool,
}

impl ResponseAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event.
    ///
    /// # Errors
    /// An `Error` event ends aggregation with [`GatewayError::StreamTerminated`].
    pub fn push(&mut self, event: StreamEvent) -> GatewayResult<()> {
        match event {
            StreamEvent::TextDelta { text } => {
                if let Some(ContentBlock::Text { text: last }) = self.content.last_mut() {
                    last.push_str(&text);
                } else {
                    self.content.push(ContentBlock::Text { text });
                }
            }
            StreamEvent::ThinkingDelta { text, signature } => {
                if let Some(ContentBlock::Thinking {
                    text: last,
                    signature: last_sig,
                }) = self.content.last_mut()
                {
                    last.push_str(&text);
                    if signature.is_some() {
                        *last_sig = signature;
                    }
                } else {
                    self.content.push(ContentBlock::Thinking { text, signature });
                }
            }
            StreamEvent::ToolCallStart { id, name } => {
                self.tools.push(PendingTool {
                    id,
                    name,
                    arguments: String::new(),
                });
            }
            StreamEvent::ToolCallArgs { id, arguments } => {
                if let Some(tool) = self.tools.iter_mut().find(|t| t.id == id) {
                    tool.arguments.push_str(&arguments);
                }
            }
            StreamEvent::ToolCallEnd { id } => {
                if let Some(pos) = self.tools.iter().position(|t| t.id == id) {
                    let tool = self.tools.remove(pos);
                    let input = if tool.arguments.is_empty() {
                        serde_json::Value::Object(serde_json::Map::new())
                    } else {
                        serde_json::from_str(&tool.arguments)?
                    };
                    self.content.push(ContentBlock::ToolUse {
                        id: tool.id,
                        name: tool.name,
                        input,
                    });
                }
            }
            StreamEvent::Usage(usage) => self.usage = usage,
            StreamEvent::Error { kind, message } => {
                return Err(GatewayError::stream_terminated(kind, message));
            }
            StreamEvent::Done { finish_reason } => {
                self.finish_reason = finish_reason;
                self.done = true;
            }
        }
        Ok(())
    }

    /// Whether a `Done` event has been seen
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Build the final response
    #[must_use]
    pub fn finish(self, id: RequestId, model: impl Into<String>, attempts: u32) -> AggregatedResponse {
        AggregatedResponse {
            id,
            model: model.into(),
            content: self.content,
            usage: self.usage,
            finish_reason: self.finish_reason,
            attempts,
        }
    }
}
