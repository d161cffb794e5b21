//! Environment overrides layered on top of a parsed configuration.

use crate::error::ConfigError;
use crate::types::CacheConfig;
use std::path::PathBuf;

/// Enables (`1`, `true`) or disables (`0`, `false`) the cache.
pub const ENV_ENABLE: &str = "PROGCACHE_ENABLE";

/// Overrides `cache.disk_cache_dir`. An empty value disables the disk cache.
pub const ENV_DISK_DIR: &str = "PROGCACHE_DISK_DIR";

/// Applies environment overrides to `config`.
///
/// `lookup` resolves a variable name to its value; pass
/// `|name| std::env::var(name).ok()` for the process environment.
pub fn apply_env_overrides<F>(config: &mut CacheConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_ENABLE) {
        config.cache.enabled = parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
            name: ENV_ENABLE.to_string(),
            value: value.clone(),
        })?;
    }

    if let Some(value) = lookup(ENV_DISK_DIR) {
        config.cache.disk_cache_dir = if value.is_empty() {
            None
        } else {
            Some(PathBuf::from(value))
        };
    }

    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
