//! Error types for the gateway.
//!
//! `GatewayError` is the single taxonomy every dispatch outcome is reduced to.
//! Callers get enough detail to tell "try again later" apart from "fix your
//! credentials".

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the gateway crates
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Coarse classification of a gateway error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Model/region capacity exhausted upstream
    CapacityExhausted,
    /// Account-scoped rate limit
    RateLimited,
    /// Credential rejected or unresolvable
    InvalidCredential,
    /// Network failure or unexpected upstream status
    TransportFailure,
    /// Undecodable upstream frame
    MalformedFrame,
    /// No account can serve the request
    PoolExhausted,
    /// Endpoint failover budget spent
    RetriesExhausted,
    /// Invalid gateway configuration
    Configuration,
    /// Invalid client request
    Validation,
    /// Unexpected internal condition
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CapacityExhausted => "capacity_exhausted",
            Self::RateLimited => "rate_limited",
            Self::InvalidCredential => "invalid_credential",
            Self::TransportFailure => "transport_failure",
            Self::MalformedFrame => "malformed_frame",
            Self::PoolExhausted => "pool_exhausted",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Gateway error taxonomy
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Upstream reported model capacity exhaustion (structured 503)
    #[error("Model capacity exhausted at {endpoint}: {message}")]
    CapacityExhausted {
        /// Endpoint that reported the condition
        endpoint: String,
        /// Upstream message
        message: String,
    },

    /// Account-scoped rate limit
    #[error("Rate limited on account {account}: {message}")]
    RateLimited {
        /// Account identifier
        account: String,
        /// Provider supplied reset delay
        retry_after: Option<Duration>,
        /// Upstream message
        message: String,
    },

    /// Credential rejected or could not be resolved
    #[error("Invalid credential for account {account}: {message}")]
    InvalidCredential {
        /// Account identifier
        account: String,
        /// Error detail
        message: String,
    },

    /// Transport failure or unexpected upstream status
    #[error("Transport failure: {message}")]
    TransportFailure {
        /// Error detail
        message: String,
        /// HTTP status, when the upstream answered
        status_code: Option<u16>,
        /// Whether another attempt may succeed
        retryable: bool,
    },

    /// Upstream frame could not be decoded
    #[error("Malformed upstream frame: {message}")]
    MalformedFrame {
        /// Decoder error
        message: String,
    },

    /// No account is available and the wait budget is spent
    #[error("No upstream account available: {message}")]
    PoolExhausted {
        /// Shortest wait until an account frees up, if known
        retry_after: Option<Duration>,
        /// Error detail
        message: String,
    },

    /// All endpoint failover attempts failed
    #[error("Retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Number of upstream attempts made
        attempts: u32,
        /// Last failure seen
        message: String,
    },

    /// A committed stream ended with an error event
    #[error("Stream terminated ({kind}): {message}")]
    StreamTerminated {
        /// Classified cause
        kind: ErrorKind,
        /// Error detail
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error detail
        message: String,
    },

    /// Request validation error
    #[error("Validation error: {message}")]
    Validation {
        /// Error detail
        message: String,
        /// Offending field
        field: Option<String>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// Error detail
        message: String,
    },
}

impl GatewayError {
    /// Create a capacity exhaustion error
    pub fn capacity_exhausted(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CapacityExhausted {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limited(
        account: impl Into<String>,
        retry_after: Option<Duration>,
        message: impl Into<String>,
    ) -> Self {
        Self::RateLimited {
            account: account.into(),
            retry_after,
            message: message.into(),
        }
    }

    /// Create an invalid credential error
    pub fn invalid_credential(account: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            account: account.into(),
            message: message.into(),
        }
    }

    /// Create a transport failure
    pub fn transport(message: impl Into<String>, status_code: Option<u16>, retryable: bool) -> Self {
        Self::TransportFailure {
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Create a malformed frame error
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Create a pool exhaustion error
    pub fn pool_exhausted(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            retry_after,
            message: message.into(),
        }
    }

    /// Create a retries exhausted error
    pub fn retries_exhausted(attempts: u32, message: impl Into<String>) -> Self {
        Self::RetriesExhausted {
            attempts,
            message: message.into(),
        }
    }

    /// Create a stream termination error
    pub fn stream_terminated(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::StreamTerminated {
            kind,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>, field: Option<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CapacityExhausted { .. } => ErrorKind::CapacityExhausted,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::InvalidCredential { .. } => ErrorKind::InvalidCredential,
            Self::TransportFailure { .. } => ErrorKind::TransportFailure,
            Self::MalformedFrame { .. } => ErrorKind::MalformedFrame,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::StreamTerminated { kind, .. } => *kind,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the same request may succeed if retried later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CapacityExhausted { .. }
            | Self::RateLimited { .. }
            | Self::PoolExhausted { .. } => true,
            Self::TransportFailure { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Suggested wait before retrying, if the upstream supplied one
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::PoolExhausted { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// HTTP status code used when surfacing this error to a client
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::InvalidCredential => 401,
            ErrorKind::RateLimited => 429,
            ErrorKind::TransportFailure | ErrorKind::MalformedFrame => 502,
            ErrorKind::CapacityExhausted
            | ErrorKind::PoolExhausted
            | ErrorKind::RetriesExhausted => 503,
            ErrorKind::Configuration | ErrorKind::Internal => 500,
        }
    }

    /// Error message without the variant prefix
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::CapacityExhausted { message, .. }
            | Self::RateLimited { message, .. }
            | Self::InvalidCredential { message, .. }
            | Self::TransportFailure { message, .. }
            | Self::MalformedFrame { message }
            | Self::PoolExhausted { message, .. }
            | Self::RetriesExhausted { message, .. }
            | Self::StreamTerminated { message, .. }
            | Self::Configuration { message }
            | Self::Validation { message, .. }
            | Self::Internal { message } => message,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed_frame(err.to_string())
    }
}
