//! Normalized stream event model.
//!
//! Every upstream response, streamed or aggregated, is decoded into an ordered
//! sequence of [`StreamEvent`]s. Order matches the order bytes were decoded.

use crate::error::{ErrorKind, GatewayError};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Stream of normalized events for one committed upstream response
pub type EventStream = BoxStream<'static, Result<StreamEvent, GatewayError>>;

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop
    Stop,
    /// Output token limit reached
    Length,
    /// Stopped to call a tool
    ToolCalls,
    /// Blocked by a safety filter
    ContentFilter,
    /// Anything else reported upstream
    Other,
}

impl FinishReason {
    /// Map an upstream `finishReason` string
    #[must_use]
    pub fn from_upstream(reason: &str) -> Self {
        match reason {
            "STOP" => Self::Stop,
            "MAX_TOKENS" => Self::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
                Self::ContentFilter
            }
            _ => Self::Other,
        }
    }
}

/// Cumulative token usage seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Generated tokens (excluding thinking)
    pub output_tokens: u32,
    /// Thinking tokens
    #[serde(default)]
    pub thinking_tokens: u32,
    /// Prompt tokens served from cache
    #[serde(default)]
    pub cached_tokens: u32,
}

impl Usage {
    /// Total billed tokens
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens + self.thinking_tokens
    }
}

/// One normalized output unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Visible text fragment
    TextDelta {
        /// Text fragment
        text: String,
    },
    /// Reasoning fragment
    ThinkingDelta {
        /// Reasoning text
        text: String,
        /// Signature bound to this block, when the upstream issued one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// A tool call begins
    ToolCallStart {
        /// Tool call id
        id: String,
        /// Tool name
        name: String,
    },
    /// Tool call arguments (JSON text)
    ToolCallArgs {
        /// Tool call id
        id: String,
        /// JSON-encoded arguments
        arguments: String,
    },
    /// A tool call is complete
    ToolCallEnd {
        /// Tool call id
        id: String,
    },
    /// Cumulative usage update
    Usage(Usage),
    /// Terminal error
    Error {
        /// Classified cause
        kind: ErrorKind,
        /// Error detail
        message: String,
    },
    /// End of stream
    Done {
        /// Finish reason reported upstream
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
    },
}

impl StreamEvent {
    /// Build a text delta
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Build an error event from a gateway error
    #[must_use]
    pub fn from_error(err: &GatewayError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }

    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}
