//! Small domain newtypes shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of one logical client request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh request id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("req-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Model family a thinking signature was issued by.
///
/// Signatures are only valid when replayed to the family that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Claude models served through the Gemini backend
    Claude,
    /// Native Gemini models
    Gemini,
}

impl ModelFamily {
    /// Derive the family from a model name
    #[must_use]
    pub fn from_model(model: &str) -> Self {
        if model.to_ascii_lowercase().contains("claude") {
            Self::Claude
        } else {
            Self::Gemini
        }
    }

    /// Stable tag stored in the signature cache
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }

    /// Parse a stored tag
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "claude" => Some(Self::Claude),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
