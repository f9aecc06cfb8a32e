//! # Gateway Config
//!
//! Typed configuration for the dispatch gateway.
//!
//! Configuration is read from a YAML or TOML file (chosen by extension),
//! then overridden from `GATEWAY_*` environment variables, then validated.
//! The credential-store reader used to seed accounts at startup lives here
//! as well.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod loader;

pub use config::{
    AccountConfig, DispatchConfig, EndpointConfig, GatewayConfig, ServerConfig, SignatureConfig,
    TelemetryConfig,
};
pub use credentials::{read_credential_file, CredentialStoreError, StoredCredential};
pub use loader::{load_config, load_config_from_path, ConfigError};
