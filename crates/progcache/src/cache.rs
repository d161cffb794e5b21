//! The cache manager.
//!
//! [`ProgramCache`] owns the program table and the IR side cache behind a
//! single mutex. Lookups clone a [`ProgramRef`] out under the lock; compiling
//! happens outside it. A disabled cache has no tables at all: searches miss,
//! uploads hand back an uncached program, and nothing is persisted.

use std::collections::HashMap;
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;
use progcache_common::{DeviceIdentity, Digest};

use crate::codec::{self, LoadOutcome, SerializedCache};
use crate::error::CacheError;
use crate::key::{CacheId, CacheKey, ProgramKey};
use crate::metadata::CompiledOutput;
use crate::program::{CompiledProgram, ProgramRef};
use crate::store::ContentStore;
use crate::uploader::Uploader;

#[derive(Default)]
struct CacheTables {
    programs: ContentStore,
    ir: HashMap<Digest, Arc<[u8]>>,
}

/// Thread-safe program cache bound to one device.
pub struct ProgramCache {
    identity: DeviceIdentity,
    uploader: Arc<dyn Uploader>,
    tables: Option<Mutex<CacheTables>>,
}

impl ProgramCache {
    /// Creates an empty cache. With `enabled == false` the cache never
    /// stores anything.
    pub fn new(identity: DeviceIdentity, uploader: Arc<dyn Uploader>, enabled: bool) -> Self {
        Self {
            identity,
            uploader,
            tables: enabled.then(|| Mutex::new(CacheTables::default())),
        }
    }

    /// Creates a cache and loads `initial` into it.
    ///
    /// A rejected or damaged blob still yields a usable cache; the outcome
    /// says how much was loaded.
    pub fn with_initial_data(
        identity: DeviceIdentity,
        uploader: Arc<dyn Uploader>,
        enabled: bool,
        initial: &[u8],
    ) -> (Self, LoadOutcome) {
        let cache = Self::new(identity, uploader, enabled);
        let outcome = cache.load(initial);
        (cache, outcome)
    }

    /// The device this cache belongs to.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The uploader programs are placed with.
    pub fn uploader(&self) -> &Arc<dyn Uploader> {
        &self.uploader
    }

    /// False if the cache was created disabled.
    pub fn is_enabled(&self) -> bool {
        self.tables.is_some()
    }

    /// Looks up `key`, returning a new reference on a hit.
    pub fn search(&self, key: &CacheKey) -> Option<ProgramRef> {
        let tables = self.tables.as_ref()?.lock();
        tables.programs.lookup(key).map(Arc::clone)
    }

    /// True if `key` has an entry.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.tables
            .as_ref()
            .is_some_and(|tables| tables.lock().programs.contains(key))
    }

    /// Stores the compiler output for `key` and returns the program.
    ///
    /// `output` is consumed. If another thread stored `key` first, that
    /// program is returned and `output` is discarded. If an existing program
    /// has byte-identical code, the new program shares its code region but
    /// keeps its own metadata.
    pub fn upload(&self, key: CacheKey, output: CompiledOutput) -> Result<ProgramRef, CacheError> {
        let Some(tables) = &self.tables else {
            return Ok(Arc::new(CompiledProgram::create(
                key,
                output,
                &self.uploader,
            )?));
        };

        let mut tables = tables.lock();
        if let Some(existing) = tables.programs.lookup(&key) {
            tracing::debug!(?key, "upload raced with another thread; keeping first program");
            return Ok(Arc::clone(existing));
        }

        let program = match tables.programs.find_existing_code(&output.code) {
            Some(region) => {
                tracing::trace!(?key, ?region, "sharing existing code");
                CompiledProgram::with_region(key, output, region, &self.uploader)
            }
            None => CompiledProgram::create(key, output, &self.uploader)?,
        };

        Ok(tables.programs.insert_if_absent(Arc::new(program)))
    }

    /// Inserts an already-built program unless its key is present.
    ///
    /// Returns whichever program the table holds for the key afterwards. A
    /// disabled cache returns `program` unchanged.
    pub fn add_program(&self, program: ProgramRef) -> ProgramRef {
        match &self.tables {
            Some(tables) => tables.lock().programs.insert_if_absent(program),
            None => program,
        }
    }

    /// Finds the key of a previous compile of `program_string_id` for stage
    /// `id`, to seed a recompile with a differing key.
    pub fn find_previous_compile(&self, id: CacheId, program_string_id: u32) -> Option<ProgramKey> {
        let tables = self.tables.as_ref()?.lock();
        tables.programs.find_previous_compile(id, program_string_id)
    }

    /// Adds every entry of `sources` whose key is absent here.
    ///
    /// Existing entries are never replaced. `self` and disabled caches among
    /// the sources are skipped. Returns the number of entries added.
    pub fn merge(&self, sources: &[&ProgramCache]) -> usize {
        let Some(dst) = &self.tables else {
            return 0;
        };

        let mut added = 0;
        for src in sources {
            if ptr::eq(*src, self) {
                continue;
            }
            let snapshot = src.entries();
            if snapshot.is_empty() {
                continue;
            }

            let mut tables = dst.lock();
            for program in snapshot {
                if tables.programs.contains(program.key()) {
                    continue;
                }
                tables.programs.insert_if_absent(program);
                added += 1;
            }
        }

        tracing::debug!(sources = sources.len(), added, "merged caches");
        added
    }

    /// Looks up serialized IR by digest.
    pub fn search_ir(&self, digest: &Digest) -> Option<Arc<[u8]>> {
        let tables = self.tables.as_ref()?.lock();
        tables.ir.get(digest).cloned()
    }

    /// Stores serialized IR under `digest` unless already present.
    ///
    /// `serialize` runs outside the lock and only if the digest was missing
    /// when checked. Returns true if this call inserted the entry.
    pub fn upload_ir(&self, digest: Digest, serialize: impl FnOnce() -> Vec<u8>) -> bool {
        let Some(tables) = &self.tables else {
            return false;
        };

        if tables.lock().ir.contains_key(&digest) {
            return false;
        }

        let bytes: Arc<[u8]> = serialize().into();

        let mut tables = tables.lock();
        if tables.ir.contains_key(&digest) {
            return false;
        }
        tables.ir.insert(digest, bytes);
        true
    }

    /// Number of IR entries.
    pub fn ir_len(&self) -> usize {
        self.tables
            .as_ref()
            .map_or(0, |tables| tables.lock().ir.len())
    }

    /// Snapshot of every program in the table.
    pub fn entries(&self) -> Vec<ProgramRef> {
        match &self.tables {
            Some(tables) => tables.lock().programs.programs().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Number of programs in the table.
    pub fn len(&self) -> usize {
        self.tables
            .as_ref()
            .map_or(0, |tables| tables.lock().programs.len())
    }

    /// True if the table holds no programs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the program table. See [`codec::serialize`].
    pub fn serialize(&self, limit: Option<usize>) -> SerializedCache {
        codec::serialize(self, limit)
    }

    /// Loads a blob into this cache. See [`codec::load`].
    pub fn load(&self, data: &[u8]) -> LoadOutcome {
        codec::load(self, data)
    }

    /// Tears the cache down, dropping its reference to every program.
    ///
    /// Programs still referenced by callers stay alive until those references
    /// go away. Returns the number of programs the table held.
    pub fn finish(self) -> usize {
        let Some(tables) = self.tables else {
            return 0;
        };
        let mut tables = tables.into_inner();
        tables.ir.clear();
        let released = tables.programs.remove_all();
        tracing::debug!(released, "cache finished");
        released
    }
}

impl std::fmt::Debug for ProgramCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramCache")
            .field("identity", &self.identity)
            .field("enabled", &self.is_enabled())
            .field("len", &self.len())
            .finish()
    }
}
