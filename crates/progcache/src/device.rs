//! Device-level entry points.
//!
//! A [`ProgramDevice`] owns the uploader, a default cache used when the
//! caller supplies none, and an optional [`DiskCache`]. It layers the disk
//! cache under whichever in-memory cache a lookup goes through.

use std::ptr;
use std::sync::Arc;

use progcache_common::DeviceIdentity;
use progcache_config::CacheConfig;

use crate::cache::ProgramCache;
use crate::codec::{self, LoadOutcome};
use crate::disk::{DiskCache, FsDiskCache};
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::metadata::CompiledOutput;
use crate::program::ProgramRef;
use crate::uploader::{ArenaUploader, Uploader};

/// Result of [`ProgramDevice::search_for_program`].
#[derive(Debug, Default)]
pub struct ProgramLookup {
    /// The program, if any layer had it.
    pub program: Option<ProgramRef>,
    /// True if the hit came from a caller-supplied cache rather than the
    /// device default or the disk cache.
    pub user_cache_hit: bool,
}

/// One device: its identity, code uploader, default cache, and disk cache.
pub struct ProgramDevice {
    identity: DeviceIdentity,
    uploader: Arc<dyn Uploader>,
    default_cache: ProgramCache,
    disk_cache: Option<Box<dyn DiskCache>>,
}

impl ProgramDevice {
    /// Creates a device without a disk cache.
    pub fn new(identity: DeviceIdentity, uploader: Arc<dyn Uploader>, cache_enabled: bool) -> Self {
        let default_cache = ProgramCache::new(identity, Arc::clone(&uploader), cache_enabled);
        Self {
            identity,
            uploader,
            default_cache,
            disk_cache: None,
        }
    }

    /// Attaches a disk cache.
    pub fn with_disk_cache(mut self, disk_cache: Box<dyn DiskCache>) -> Self {
        self.disk_cache = Some(disk_cache);
        self
    }

    /// Builds a device from configuration.
    ///
    /// The disk cache is attached only when caching is enabled and a
    /// directory is configured.
    pub fn from_config(config: &CacheConfig) -> Self {
        let identity = config.device.identity();
        let uploader: Arc<dyn Uploader> = Arc::new(ArenaUploader::from_config(&config.uploader));
        let device = Self::new(identity, uploader, config.cache.enabled);

        match (&config.cache.disk_cache_dir, config.cache.enabled) {
            (Some(dir), true) => {
                tracing::debug!(dir = %dir.display(), "attaching disk cache");
                device.with_disk_cache(Box::new(FsDiskCache::new(dir, identity)))
            }
            _ => device,
        }
    }

    /// The device identity.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The shared code uploader.
    pub fn uploader(&self) -> &Arc<dyn Uploader> {
        &self.uploader
    }

    /// The cache used when callers pass none.
    pub fn default_cache(&self) -> &ProgramCache {
        &self.default_cache
    }

    /// True if the device caches at all.
    pub fn cache_enabled(&self) -> bool {
        self.default_cache.is_enabled()
    }

    /// True if a disk cache is attached.
    pub fn has_disk_cache(&self) -> bool {
        self.disk_cache.is_some()
    }

    /// Creates a caller-owned cache, optionally seeded from a blob.
    pub fn create_cache(&self, initial: Option<&[u8]>) -> ProgramCache {
        let cache = ProgramCache::new(
            self.identity,
            Arc::clone(&self.uploader),
            self.cache_enabled(),
        );
        if let Some(data) = initial {
            match cache.load(data) {
                LoadOutcome::Rejected(e) => {
                    tracing::debug!(error = %e, "ignoring initial cache data")
                }
                LoadOutcome::Partial { entries, error } => {
                    tracing::warn!(entries, %error, "initial cache data partially loaded")
                }
                LoadOutcome::Loaded { entries } => {
                    tracing::debug!(entries, "initial cache data loaded")
                }
                LoadOutcome::Disabled => {}
            }
        }
        cache
    }

    fn resolve<'a>(&'a self, cache: Option<&'a ProgramCache>) -> &'a ProgramCache {
        cache.unwrap_or(&self.default_cache)
    }

    /// Looks `key` up in `cache` (or the default cache), then on disk.
    ///
    /// A disk hit is inserted into the in-memory cache before it is
    /// returned.
    pub fn search_for_program(&self, cache: Option<&ProgramCache>, key: &CacheKey) -> ProgramLookup {
        let cache = self.resolve(cache);

        if let Some(program) = cache.search(key) {
            return ProgramLookup {
                program: Some(program),
                user_cache_hit: !ptr::eq(cache, &self.default_cache),
            };
        }

        let program = match &self.disk_cache {
            Some(disk) if self.cache_enabled() => self.search_disk(disk.as_ref(), cache, key),
            _ => None,
        };
        ProgramLookup {
            program,
            user_cache_hit: false,
        }
    }

    fn search_disk(
        &self,
        disk: &dyn DiskCache,
        cache: &ProgramCache,
        key: &CacheKey,
    ) -> Option<ProgramRef> {
        let digest = disk.compute_key(&key.to_bytes());
        let record = disk.get(&digest)?;

        let (stored_key, output) = match codec::decode_program(&record) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(%digest, error = %e, "undecodable disk cache record");
                return None;
            }
        };
        if &stored_key != key {
            tracing::warn!(%digest, "disk cache record holds a different key");
            return None;
        }

        match cache.upload(stored_key, output) {
            Ok(program) => {
                tracing::debug!(?key, "disk cache hit");
                Some(program)
            }
            Err(e) => {
                tracing::warn!(?key, error = %e, "could not upload disk cache hit");
                None
            }
        }
    }

    /// Uploads compiler output into `cache` (or the default cache) and
    /// writes it through to the disk cache.
    ///
    /// A failed disk write is logged and otherwise ignored.
    pub fn upload_program(
        &self,
        cache: Option<&ProgramCache>,
        key: CacheKey,
        output: CompiledOutput,
    ) -> Result<ProgramRef, CacheError> {
        let cache = self.resolve(cache);
        let program = cache.upload(key, output)?;

        if let Some(disk) = self.disk_cache.as_ref().filter(|_| self.cache_enabled()) {
            let digest = disk.compute_key(&program.key().to_bytes());
            let written = codec::encode_program(&program).and_then(|bytes| disk.put(&digest, &bytes));
            if let Err(e) = written {
                tracing::warn!(%digest, error = %e, "disk cache write failed");
            }
        }

        Ok(program)
    }
}

impl std::fmt::Debug for ProgramDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramDevice")
            .field("identity", &self.identity)
            .field("default_cache", &self.default_cache)
            .field("disk_cache", &self.disk_cache.is_some())
            .finish()
    }
}
