//! Parsing and validation of `progcache.toml` configuration files.
//!
//! This crate reads the cache configuration file and produces a strongly-typed
//! [`CacheConfig`] covering the cache switch, the code uploader, and the device
//! identity, with environment overrides applied on top.

#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod loader;
pub mod types;

pub use env::{apply_env_overrides, ENV_DISK_DIR, ENV_ENABLE};
pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE_NAME};
pub use types::*;
