//! Device identity stamped into every persisted cache blob.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vendor id used when no device is configured.
pub const DEFAULT_VENDOR_ID: u32 = 0x8086;

/// A 16-byte cache-compatibility UUID.
///
/// Changes whenever the producing compiler or the layout of the cached
/// metadata changes, so that blobs written by another build are rejected.
/// Parses from and displays as 32 hex characters; dashes are accepted on
/// input and ignored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CacheUuid([u8; 16]);

impl CacheUuid {
    /// Wraps raw UUID bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw UUID bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for CacheUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheUuid({self})")
    }
}

/// Error type for parsing UUID strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cache uuid: '{input}'")]
pub struct ParseUuidError {
    /// The input string that failed to parse.
    pub input: String,
}

impl FromStr for CacheUuid {
    type Err = ParseUuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseUuidError {
            input: s.to_string(),
        };
        let hex: Vec<u8> = s.trim().bytes().filter(|b| *b != b'-').collect();
        if hex.len() != 32 {
            return Err(err());
        }

        let mut out = [0u8; 16];
        for (i, pair) in hex.chunks(2).enumerate() {
            let text = std::str::from_utf8(pair).map_err(|_| err())?;
            out[i] = u8::from_str_radix(text, 16).map_err(|_| err())?;
        }
        Ok(Self(out))
    }
}

/// The hardware and build identity a cache blob is bound to.
///
/// A blob is only loadable by a runtime whose identity matches the one in the
/// blob header field by field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Hardware vendor tag.
    pub vendor_id: u32,
    /// Device model tag.
    pub device_id: u32,
    /// Cache-compatibility UUID.
    pub uuid: CacheUuid,
}

impl DeviceIdentity {
    /// Creates a new identity.
    pub fn new(vendor_id: u32, device_id: u32, uuid: CacheUuid) -> Self {
        Self {
            vendor_id,
            device_id,
            uuid,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} ({})",
            self.vendor_id, self.device_id, self.uuid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_hex() {
        let u: CacheUuid = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        assert_eq!(u.as_bytes()[0], 0x00);
        assert_eq!(u.as_bytes()[15], 0x0f);
    }

    #[test]
    fn parse_with_dashes() {
        let u: CacheUuid = "00010203-0405-0607-0809-0a0b0c0d0e0f".parse().unwrap();
        assert_eq!(u.to_string(), "000102030405060708090a0b0c0d0e0f");
    }

    #[test]
    fn parse_wrong_length_fails() {
        assert!("abcd".parse::<CacheUuid>().is_err());
    }

    #[test]
    fn parse_non_hex_fails() {
        let err = "zz0102030405060708090a0b0c0d0e0f"
            .parse::<CacheUuid>()
            .unwrap_err();
        assert!(err.to_string().contains("invalid cache uuid"));
    }

    #[test]
    fn identity_display() {
        let id = DeviceIdentity::new(0x8086, 0x591b, CacheUuid::from_bytes([0xab; 16]));
        let s = id.to_string();
        assert!(s.starts_with("8086:591b"));
        assert!(s.contains("abab"));
    }
}
