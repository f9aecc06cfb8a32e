//! Configuration loading.

use crate::config::GatewayConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;

/// Path of the config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        /// Config path
        path: PathBuf,
        /// Parser error
        message: String,
    },

    /// Unknown file extension
    #[error("Unsupported config format for {0} (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(PathBuf),

    /// Environment override could not be parsed
    #[error("Invalid value for {var}: {message}")]
    Env {
        /// Variable name
        var: String,
        /// Parse error
        message: String,
    },

    /// Semantic validation failed
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Load configuration from `GATEWAY_CONFIG` (or defaults), then apply
/// environment overrides and validate.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    let config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => read_file(Path::new(&path))?,
        _ => {
            debug!("No {CONFIG_PATH_ENV} set, using default configuration");
            GatewayConfig::default()
        }
    };
    finish(config, |var| std::env::var(var).ok())
}

/// Load configuration from an explicit path, then apply environment
/// overrides and validate.
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<GatewayConfig, ConfigError> {
    let config = read_file(path.as_ref())?;
    finish(config, |var| std::env::var(var).ok())
}

fn finish<F>(mut config: GatewayConfig, lookup: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup)?;
    config.validate()?;
    info!(
        endpoints = config.endpoints.urls.len(),
        accounts = config.accounts.len(),
        max_capacity_retries = config.dispatch.max_capacity_retries,
        "Configuration loaded"
    );
    Ok(config)
}

fn read_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_str(&raw).map_err(|e| parse_err(e.to_string())),
        Some("toml") => toml::from_str(&raw).map_err(|e| parse_err(e.to_string())),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Apply `GATEWAY_*` overrides read through `lookup`
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("GATEWAY_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("GATEWAY_PORT") {
        config.server.port = parse_var("GATEWAY_PORT", &port)?;
    }
    if let Some(retries) = lookup("GATEWAY_MAX_CAPACITY_RETRIES") {
        config.dispatch.max_capacity_retries = parse_var("GATEWAY_MAX_CAPACITY_RETRIES", &retries)?;
    }
    if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
        config.telemetry.log_level = level;
    }
    Ok(())
}

fn parse_var<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var: var.to_string(),
        message: e.to_string(),
    })
}
