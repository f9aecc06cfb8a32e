//! Ordered endpoint fallback list.

use gateway_core::{GatewayError, GatewayResult};
use url::Url;

/// Sandbox daily endpoint (primary)
pub const SANDBOX_DAILY_BASE: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
/// Daily endpoint
pub const DAILY_BASE: &str = "https://daily-cloudcode-pa.googleapis.com";
/// Production endpoint
pub const PROD_BASE: &str = "https://cloudcode-pa.googleapis.com";

/// Non-empty, fixed-order list of upstream base URLs.
///
/// Index 0 is tried first; later entries are fallbacks. Indexes past the end
/// clamp to the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList {
    bases: Vec<String>,
}

impl EndpointList {
    /// Build from base URLs
    ///
    /// # Errors
    /// Returns a configuration error if `urls` is empty
    pub fn new(urls: &[Url]) -> GatewayResult<Self> {
        Self::from_strings(urls.iter().map(Url::as_str))
    }

    /// Build from base URL strings
    ///
    /// # Errors
    /// Returns a configuration error if the list is empty
    pub fn from_strings<'a>(urls: impl IntoIterator<Item = &'a str>) -> GatewayResult<Self> {
        let bases: Vec<String> = urls
            .into_iter()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if bases.is_empty() {
            return Err(GatewayError::configuration(
                "endpoint fallback list cannot be empty",
            ));
        }
        Ok(Self { bases })
    }

    /// Number of endpoints
    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Always false; the list is non-empty by construction
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Clamp an index into range
    #[must_use]
    pub fn clamp(&self, index: usize) -> usize {
        index.min(self.bases.len().saturating_sub(1))
    }

    /// Base URL at `index` (clamped)
    #[must_use]
    pub fn base(&self, index: usize) -> &str {
        &self.bases[self.clamp(index)]
    }

    /// Streaming generate URL at `index`
    #[must_use]
    pub fn stream_url(&self, index: usize) -> String {
        self.method_url(index, "streamGenerateContent?alt=sse")
    }

    /// `v1internal` method URL at `index`
    #[must_use]
    pub fn method_url(&self, index: usize, method: &str) -> String {
        format!("{}/v1internal:{method}", self.base(index))
    }

    /// Iterate base URLs in order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.bases.iter().map(String::as_str)
    }
}

impl Default for EndpointList {
    fn default() -> Self {
        Self {
            bases: vec![
                SANDBOX_DAILY_BASE.to_string(),
                DAILY_BASE.to_string(),
                PROD_BASE.to_string(),
            ],
        }
    }
}
