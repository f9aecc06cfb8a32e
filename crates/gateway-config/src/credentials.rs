//! On-disk credential store reader.
//!
//! Only used at startup to seed the account list.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Credential file errors
#[derive(Debug, Error)]
pub enum CredentialStoreError {
    /// No credential file at the given path
    #[error("Credential file not found: {0}")]
    NotFound(PathBuf),

    /// File exists but could not be read
    #[error("Failed to read credential file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not a valid credential document
    #[error("Failed to parse credential file {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },
}

impl CredentialStoreError {
    /// Whether the file simply does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Credential document as stored on disk
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    /// Bearer token
    pub api_key: SecretString,
    /// Account identifier
    pub email: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Cloud project
    #[serde(default)]
    pub project_id: Option<String>,
    /// Token expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredCredential {
    /// Whether the token has expired at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Read a credential document from `path`
pub fn read_credential_file(path: impl AsRef<Path>) -> Result<StoredCredential, CredentialStoreError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            CredentialStoreError::NotFound(path.to_path_buf())
        } else {
            CredentialStoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    serde_json::from_str(&raw).map_err(|source| CredentialStoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
