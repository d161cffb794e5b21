//! Shared setup for every subcommand: logging, configuration, blob I/O.

use std::path::Path;

use progcache::codec::read_header;
use progcache::ProgramDevice;
use progcache_common::DeviceIdentity;
use progcache_config::{apply_env_overrides, load_config, CacheConfig};
use tracing_subscriber::EnvFilter;

use crate::GlobalArgs;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `--quiet` and `--verbose` pick the
/// level.
pub fn init_logging(global: &GlobalArgs) {
    let default_level = if global.quiet {
        "error"
    } else if global.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads configuration from `--config` (or defaults) and applies
/// environment overrides.
pub fn load_settings(global: &GlobalArgs) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let mut config = match &global.config {
        Some(path) => load_config(path)?,
        None => CacheConfig::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Reads a whole blob file.
pub fn read_blob(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()).into())
}

/// The identity recorded in a blob header.
pub fn blob_identity(data: &[u8]) -> Result<DeviceIdentity, Box<dyn std::error::Error>> {
    let (header, _) = read_header(data)?;
    Ok(header.identity())
}

/// Builds a device for offline work.
///
/// Disk caching is never attached; blobs are the only persistence here.
pub fn offline_device(config: &CacheConfig, identity: DeviceIdentity) -> ProgramDevice {
    let mut config = config.clone();
    config.cache.enabled = true;
    config.cache.disk_cache_dir = None;
    config.device.vendor_id = identity.vendor_id;
    config.device.device_id = identity.device_id;
    config.device.uuid = identity.uuid;
    ProgramDevice::from_config(&config)
}
