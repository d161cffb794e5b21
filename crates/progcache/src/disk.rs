//! Persistent key/value store behind the in-memory cache.
//!
//! Records are indexed by a [`Digest`] of the serialized key and hold one
//! encoded program each. Reads are fail-safe: a missing, truncated, or
//! corrupt record is a miss.

use std::io::Write;
use std::path::{Path, PathBuf};

use progcache_common::{ContentHash, DeviceIdentity, Digest};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// A digest-indexed byte store shared across processes.
pub trait DiskCache: Send + Sync {
    /// Derives the record digest for a serialized key.
    fn compute_key(&self, data: &[u8]) -> Digest;

    /// Fetches the record stored under `digest`.
    fn get(&self, digest: &Digest) -> Option<Vec<u8>>;

    /// Stores `data` under `digest`, replacing any previous record.
    fn put(&self, digest: &Digest, data: &[u8]) -> Result<(), CacheError>;
}

const RECORD_MAGIC: [u8; 4] = *b"PCDC";

/// Increment on breaking changes to the record header or payload.
const RECORD_FORMAT_VERSION: u32 = 1;

const DIGEST_SALT: &[u8] = b"progcache-disk-v1";

/// Header prepended to every record file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordHeader {
    magic: [u8; 4],
    format_version: u32,
    identity: DeviceIdentity,
    checksum: ContentHash,
}

/// [`DiskCache`] storing one file per record under a root directory.
///
/// Records live at `<root>/<first two hex digits>/<full hex digest>.bin`.
/// Writes go to a temporary file that is renamed into place, so concurrent
/// readers see either the old record or the new one.
pub struct FsDiskCache {
    root: PathBuf,
    identity: DeviceIdentity,
}

impl FsDiskCache {
    /// Creates a store rooted at `root` for the given device.
    ///
    /// The directory is created lazily on the first write.
    pub fn new(root: &Path, identity: DeviceIdentity) -> Self {
        Self {
            root: root.to_path_buf(),
            identity,
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file a record with `digest` is stored in.
    pub fn record_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join(&hex[..2]).join(format!("{hex}.bin"))
    }

    fn parse_record(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let len_bytes: [u8; 4] = raw.get(..4)?.try_into().ok()?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_bytes = raw.get(4..4usize.checked_add(header_len)?)?;

        let (header, _): (RecordHeader, usize) =
            bincode::serde::decode_from_slice(header_bytes, bincode::config::standard()).ok()?;

        if header.magic != RECORD_MAGIC
            || header.format_version != RECORD_FORMAT_VERSION
            || header.identity != self.identity
        {
            return None;
        }

        let payload = &raw[4 + header_len..];
        if !header.checksum.matches(payload) {
            return None;
        }
        Some(payload.to_vec())
    }
}

impl DiskCache for FsDiskCache {
    fn compute_key(&self, data: &[u8]) -> Digest {
        Digest::of_parts(&[
            DIGEST_SALT,
            &self.identity.vendor_id.to_le_bytes(),
            &self.identity.device_id.to_le_bytes(),
            self.identity.uuid.as_bytes(),
            data,
        ])
    }

    fn get(&self, digest: &Digest) -> Option<Vec<u8>> {
        let path = self.record_path(digest);
        let raw = std::fs::read(&path).ok()?;
        let payload = self.parse_record(&raw);
        if payload.is_none() {
            tracing::warn!(path = %path.display(), "ignoring invalid disk cache record");
        }
        payload
    }

    fn put(&self, digest: &Digest, data: &[u8]) -> Result<(), CacheError> {
        let path = self.record_path(digest);
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let header = RecordHeader {
            magic: RECORD_MAGIC,
            format_version: RECORD_FORMAT_VERSION,
            identity: self.identity,
            checksum: ContentHash::from_bytes(data),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(data);

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;
        tmp.write_all(&output).map_err(|e| CacheError::Io {
            path: tmp.path().to_path_buf(),
            source: e,
        })?;
        tmp.persist(&path).map_err(|e| CacheError::Io {
            path,
            source: e.error,
        })?;

        tracing::trace!(digest = %digest, bytes = data.len(), "wrote disk cache record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progcache_common::CacheUuid;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(0x8086, 0x9a49, CacheUuid::from_bytes([1; 16]))
    }

    fn make_store() -> (tempfile::TempDir, FsDiskCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDiskCache::new(dir.path(), identity());
        (dir, store)
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, store) = make_store();
        let digest = store.compute_key(b"key bytes");
        store.put(&digest, b"record payload").unwrap();
        assert_eq!(store.get(&digest).unwrap(), b"record payload");
    }

    #[test]
    fn get_missing_returns_none() {
        let (_dir, store) = make_store();
        assert!(store.get(&Digest::of(b"nothing")).is_none());
    }

    #[test]
    fn put_replaces_record() {
        let (_dir, store) = make_store();
        let digest = store.compute_key(b"k");
        store.put(&digest, b"old").unwrap();
        store.put(&digest, b"new").unwrap();
        assert_eq!(store.get(&digest).unwrap(), b"new");
    }

    #[test]
    fn concurrent_puts_of_one_digest_all_succeed() {
        let (_dir, store) = make_store();
        let digest = store.compute_key(b"contended");
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..8u8)
                .map(|i| {
                    let store = &store;
                    s.spawn(move || store.put(&digest, &[i; 64]))
                })
                .collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
        });

        let record = store.get(&digest).unwrap();
        assert_eq!(record.len(), 64);
        assert!(record.iter().all(|b| *b == record[0]));
        let dir = store.record_path(&digest).parent().unwrap().to_path_buf();
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 1);
    }

    #[test]
    fn record_path_layout() {
        let (dir, store) = make_store();
        let digest = Digest::from_raw([0xab; 32]);
        let path = store.record_path(&digest);
        assert!(path.starts_with(dir.path().join("ab")));
        assert_eq!(path.file_name().unwrap().len(), 64 + 4);
    }

    #[test]
    fn compute_key_depends_on_identity() {
        let dir = tempfile::tempdir().unwrap();
        let a = FsDiskCache::new(dir.path(), identity());
        let other = DeviceIdentity::new(0x8086, 0x9a40, CacheUuid::from_bytes([1; 16]));
        let b = FsDiskCache::new(dir.path(), other);
        assert_ne!(a.compute_key(b"same"), b.compute_key(b"same"));
        assert_eq!(a.compute_key(b"same"), a.compute_key(b"same"));
    }

    #[test]
    fn record_from_other_device_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let a = FsDiskCache::new(dir.path(), identity());
        let other = DeviceIdentity::new(0x8086, 0x9a40, CacheUuid::from_bytes([1; 16]));
        let b = FsDiskCache::new(dir.path(), other);

        let digest = Digest::of(b"shared digest");
        a.put(&digest, b"payload").unwrap();
        assert!(b.get(&digest).is_none());
    }

    #[test]
    fn garbage_record_is_miss() {
        let (_dir, store) = make_store();
        let digest = Digest::of(b"k");
        let path = store.record_path(&digest);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        assert!(store.get(&digest).is_none());
    }

    #[test]
    fn tampered_payload_is_miss() {
        let (_dir, store) = make_store();
        let digest = Digest::of(b"k");
        store.put(&digest, b"payload").unwrap();

        let path = store.record_path(&digest);
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, &raw).unwrap();
        assert!(store.get(&digest).is_none());
    }

    #[test]
    fn truncated_record_is_miss() {
        let (_dir, store) = make_store();
        let digest = Digest::of(b"k");
        let path = store.record_path(&digest);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"AB").unwrap();
        assert!(store.get(&digest).is_none());
    }
}
