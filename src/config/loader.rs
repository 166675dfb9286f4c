//! Configuration loading from disk and flag values.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ShadowConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("route table is not a JSON object of host to URL: {0}")]
    RouteTable(#[from] serde_json::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read a TOML configuration file without validating it.
///
/// Flag overrides are usually applied on top before [`finalize`] runs.
pub fn read_config(path: &Path) -> Result<ShadowConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ShadowConfig, ConfigError> {
    finalize(read_config(path)?)
}

/// Validate a merged configuration and hand it back if it is usable.
pub fn finalize(config: ShadowConfig) -> Result<ShadowConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Decode the `--route-table-json` flag: `{"host": "http://base", ...}`.
///
/// An empty string is an empty table so that routes may come from the file alone.
pub fn parse_route_table(json: &str) -> Result<HashMap<String, String>, ConfigError> {
    if json.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(json)?)
}
