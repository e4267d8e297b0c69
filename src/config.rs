// ABOUTME: Engine configuration currency and validation errors.
// ABOUTME: Loading config files is the caller's concern; typed extraction is ours.

use std::path::Path;

use thiserror::Error;

/// One engine's configuration table, as loaded from the bridge config file.
pub type EngineConfig = toml::Table;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid `{key}` in {path}; expected {expected}.")]
    InvalidValue {
        key: String,
        path: String,
        expected: &'static str,
    },

    #[error("{0}")]
    Other(String),
}

impl ConfigError {
    fn invalid(key: &str, path: &Path, expected: &'static str) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            path: path.display().to_string(),
            expected,
        }
    }
}

/// String value under `key`, or an error when present with another type.
pub fn str_value(
    config: &EngineConfig,
    key: &str,
    full_key: &str,
    path: &Path,
) -> Result<Option<String>, ConfigError> {
    match config.get(key) {
        None => Ok(None),
        Some(toml::Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ConfigError::invalid(full_key, path, "a string")),
    }
}

/// String-list value under `key`. A single string is accepted as a
/// one-element list.
pub fn str_list(
    config: &EngineConfig,
    key: &str,
    full_key: &str,
    path: &Path,
) -> Result<Option<Vec<String>>, ConfigError> {
    match config.get(key) {
        None => Ok(None),
        Some(toml::Value::String(value)) => Ok(Some(vec![value.clone()])),
        Some(toml::Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    toml::Value::String(value) => out.push(value.clone()),
                    _ => return Err(ConfigError::invalid(full_key, path, "a list of strings")),
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(ConfigError::invalid(full_key, path, "a list of strings")),
    }
}

/// Boolean flag under `key`: true only when the value is literally `true`.
pub fn flag(config: &EngineConfig, key: &str) -> bool {
    matches!(config.get(key), Some(toml::Value::Boolean(true)))
}
