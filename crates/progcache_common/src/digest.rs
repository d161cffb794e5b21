//! Fixed-width cryptographic digests used to index the disk cache.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a [`Digest`] in bytes.
pub const DIGEST_LEN: usize = 32;

/// A 256-bit BLAKE3 digest.
///
/// A digest is treated as a collision-free identity: the disk cache stores
/// exactly one record per digest and never compares the keys that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Hashes a single byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hashes several byte slices as one contiguous stream.
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Wraps raw digest bytes.
    pub fn from_raw(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex rendering, 64 characters.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_match_concatenation() {
        let whole = Digest::of(b"vertexshader");
        let parts = Digest::of_parts(&[b"vertex", b"shader"]);
        assert_eq!(whole, parts);
    }

    #[test]
    fn hex_is_64_chars() {
        let d = Digest::of(b"x");
        let hex = d.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn raw_roundtrip() {
        let d = Digest::of(b"raw");
        assert_eq!(Digest::from_raw(*d.as_bytes()), d);
    }
}
