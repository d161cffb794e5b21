//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::CacheConfig;
use std::path::Path;

/// Conventional configuration file name.
pub const CONFIG_FILE_NAME: &str = "progcache.toml";

/// Loads and validates a configuration file.
///
/// If `path` is a directory, `<path>/progcache.toml` is read.
pub fn load_config(path: &Path) -> Result<CacheConfig, ConfigError> {
    let config_path = if path.is_dir() {
        path.join(CONFIG_FILE_NAME)
    } else {
        path.to_path_buf()
    };
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<CacheConfig, ConfigError> {
    let config: CacheConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that uploader settings are usable.
pub(crate) fn validate_config(config: &CacheConfig) -> Result<(), ConfigError> {
    let up = &config.uploader;
    if up.chunk_size == 0 {
        return Err(ConfigError::ValidationError(
            "uploader.chunk_size must be non-zero".to_string(),
        ));
    }
    if !up.alignment.is_power_of_two() {
        return Err(ConfigError::ValidationError(format!(
            "uploader.alignment must be a power of two, got {}",
            up.alignment
        )));
    }
    if let Some(max) = up.max_bytes {
        if max == 0 {
            return Err(ConfigError::ValidationError(
                "uploader.max_bytes must be non-zero when set".to_string(),
            ));
        }
    }
    Ok(())
}
