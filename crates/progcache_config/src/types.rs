//! Configuration types deserialized from `progcache.toml`.

use progcache_common::{CacheUuid, DeviceIdentity};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

/// The top-level cache configuration parsed from `progcache.toml`.
///
/// Every table is optional; an empty file yields [`CacheConfig::default`].
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache switch and disk cache location.
    #[serde(default)]
    pub cache: CacheSection,
    /// Settings for the code uploader backing compiled programs.
    #[serde(default)]
    pub uploader: UploaderConfig,
    /// Device identity stamped into and checked against persisted blobs.
    #[serde(default)]
    pub device: DeviceConfig,
}

/// The `[cache]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// When false, lookups always miss and uploads are not retained.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Directory of the secondary on-disk cache, if any.
    #[serde(default)]
    pub disk_cache_dir: Option<PathBuf>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            disk_cache_dir: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// The `[uploader]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploaderConfig {
    /// Minimum size of each backing chunk in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Alignment of every code allocation in bytes. Must be a power of two.
    #[serde(default = "default_alignment")]
    pub alignment: usize,
    /// Optional cap on the total bytes the uploader may reserve.
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            alignment: default_alignment(),
            max_bytes: None,
        }
    }
}

fn default_chunk_size() -> usize {
    16 * 1024
}

fn default_alignment() -> usize {
    64
}

/// The `[device]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Hardware vendor tag.
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u32,
    /// Device model tag.
    #[serde(default)]
    pub device_id: u32,
    /// Cache-compatibility UUID as 32 hex characters.
    #[serde(default, deserialize_with = "deserialize_uuid")]
    pub uuid: CacheUuid,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vendor_id(),
            device_id: 0,
            uuid: CacheUuid::default(),
        }
    }
}

impl DeviceConfig {
    /// Returns the identity described by this table.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.vendor_id, self.device_id, self.uuid)
    }
}

fn default_vendor_id() -> u32 {
    progcache_common::identity::DEFAULT_VENDOR_ID
}

/// Deserializes a [`CacheUuid`] from its hex string form.
fn deserialize_uuid<'de, D>(deserializer: D) -> Result<CacheUuid, D::Error>
where
    D: Deserializer<'de>,
{
    struct UuidString;

    impl<'de> Visitor<'de> for UuidString {
        type Value = CacheUuid;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a 32-character hex string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            v.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_str(UuidString)
}
