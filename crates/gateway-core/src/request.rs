//! Request types for the gateway.
//!
//! The dispatcher treats the upstream body as opaque; it only needs the model
//! name for capacity matching and signature family checks.

use crate::error::GatewayError;
use crate::types::{ModelFamily, RequestId};
use serde::{Deserialize, Serialize};

/// One logical client request handed to the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Unique request identifier
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,

    /// Target model (e.g., "gemini-3-pro-high", "claude-sonnet-4-5")
    pub model: String,

    /// Gemini `generateContent` body (contents, systemInstruction, tools, ...)
    #[serde(default, alias = "request")]
    pub payload: serde_json::Value,

    /// Whether the caller wants a live stream
    #[serde(default)]
    pub stream: bool,
}

impl DispatchRequest {
    /// Create a new request for a model with the given body
    pub fn new(model: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: RequestId::generate(),
            model: model.into(),
            payload,
            stream: false,
        }
    }

    /// Mark the request as streaming
    #[must_use]
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Override the request id
    #[must_use]
    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    /// Model family of the target model
    #[must_use]
    pub fn family(&self) -> ModelFamily {
        ModelFamily::from_model(&self.model)
    }

    /// Validate the request
    ///
    /// # Errors
    /// Returns error if the model is empty or the payload is not a JSON object
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::validation(
                "model cannot be empty",
                Some("model".to_string()),
            ));
        }

        if !self.payload.is_object() {
            return Err(GatewayError::validation(
                "request body must be a JSON object",
                Some("request".to_string()),
            ));
        }

        Ok(())
    }
}
