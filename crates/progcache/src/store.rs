//! The program table.
//!
//! A plain map from [`CacheKey`] to [`ProgramRef`]. It does no locking of its
//! own; [`ProgramCache`](crate::ProgramCache) wraps it in a mutex. Both
//! scans are linear in the table size.

use std::collections::HashMap;
use std::sync::Arc;

use crate::key::{CacheId, CacheKey, ProgramKey};
use crate::program::ProgramRef;
use crate::uploader::CodeRegion;

/// Map from key to program. Each key maps to at most one program.
#[derive(Default)]
pub struct ContentStore {
    entries: HashMap<CacheKey, ProgramRef>,
}

impl ContentStore {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key`.
    pub fn lookup(&self, key: &CacheKey) -> Option<&ProgramRef> {
        self.entries.get(key)
    }

    /// True if `key` has an entry.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts `program` under its own key unless the key is already present.
    ///
    /// Returns the entry that is in the table afterwards: the existing one if
    /// there was one (and `program` is dropped), otherwise `program` itself.
    pub fn insert_if_absent(&mut self, program: ProgramRef) -> ProgramRef {
        Arc::clone(
            self.entries
                .entry(program.key().clone())
                .or_insert(program),
        )
    }

    /// Finds an existing program whose machine code is exactly `code`.
    ///
    /// Compares length first, then bytes. O(n) in the number of entries.
    pub fn find_existing_code(&self, code: &[u8]) -> Option<CodeRegion> {
        self.entries
            .values()
            .map(|program| program.code_region())
            .find(|region| region.matches(code))
            .cloned()
    }

    /// Finds the key of any program of stage `id` compiled from the source
    /// program `program_string_id`.
    ///
    /// O(n) in the number of entries. Keys that fail to decode are skipped.
    pub fn find_previous_compile(&self, id: CacheId, program_string_id: u32) -> Option<ProgramKey> {
        self.entries
            .keys()
            .filter(|key| key.id() == id)
            .filter_map(|key| ProgramKey::from_cache_key(key).ok())
            .find(|key| key.program_string_id() == Some(program_string_id))
    }

    /// Iterates over all programs.
    pub fn programs(&self) -> impl Iterator<Item = &ProgramRef> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops the table's reference to every program. Returns how many
    /// entries were released.
    pub fn remove_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{FsKey, VsKey};
    use crate::metadata::CompiledOutput;
    use crate::program::CompiledProgram;
    use crate::uploader::{ArenaUploader, Uploader};

    fn make(key: CacheKey, code: &[u8], up: &Arc<dyn Uploader>) -> ProgramRef {
        let output = CompiledOutput {
            code: code.to_vec(),
            ..Default::default()
        };
        Arc::new(CompiledProgram::create(key, output, up).unwrap())
    }

    fn uploader() -> Arc<dyn Uploader> {
        Arc::new(ArenaUploader::new(4096, 64))
    }

    #[test]
    fn insert_then_lookup() {
        let up = uploader();
        let mut store = ContentStore::new();
        let key = CacheKey::from_raw(CacheId::Vertex, vec![1, 2]);
        let p = make(key.clone(), b"code", &up);
        let stored = store.insert_if_absent(Arc::clone(&p));
        assert!(Arc::ptr_eq(&stored, &p));
        assert!(Arc::ptr_eq(store.lookup(&key).unwrap(), &p));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn insert_keeps_existing_entry() {
        let up = uploader();
        let mut store = ContentStore::new();
        let key = CacheKey::from_raw(CacheId::Vertex, vec![1]);
        let first = make(key.clone(), b"first", &up);
        let second = make(key.clone(), b"second", &up);

        store.insert_if_absent(Arc::clone(&first));
        let winner = store.insert_if_absent(second);
        assert!(Arc::ptr_eq(&winner, &first));
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(&key).unwrap().code(), b"first");
    }

    #[test]
    fn lookup_misses_on_length_difference() {
        let up = uploader();
        let mut store = ContentStore::new();
        store.insert_if_absent(make(CacheKey::from_raw(CacheId::Blit, vec![1, 2]), b"c", &up));
        assert!(store.lookup(&CacheKey::from_raw(CacheId::Blit, vec![1])).is_none());
        assert!(store.lookup(&CacheKey::from_raw(CacheId::Blit, vec![1, 2, 3])).is_none());
    }

    #[test]
    fn find_existing_code_matches_bytes_exactly() {
        let up = uploader();
        let mut store = ContentStore::new();
        let p = make(CacheKey::from_raw(CacheId::Vertex, vec![1]), b"abcdef", &up);
        store.insert_if_absent(Arc::clone(&p));

        let found = store.find_existing_code(b"abcdef").unwrap();
        assert!(found.same_storage(p.code_region()));
        assert!(store.find_existing_code(b"abcde").is_none());
        assert!(store.find_existing_code(b"abcdeg").is_none());
    }

    #[test]
    fn find_previous_compile_by_program_string_id() {
        let up = uploader();
        let mut store = ContentStore::new();
        let vs = ProgramKey::Vertex(VsKey {
            program_string_id: 4,
            ..Default::default()
        });
        let fs = ProgramKey::Fragment(FsKey {
            program_string_id: 4,
            nr_color_regions: 2,
            ..Default::default()
        });
        store.insert_if_absent(make(vs.to_cache_key().unwrap(), b"v", &up));
        store.insert_if_absent(make(fs.to_cache_key().unwrap(), b"f", &up));

        assert_eq!(store.find_previous_compile(CacheId::Fragment, 4), Some(fs));
        assert_eq!(store.find_previous_compile(CacheId::Vertex, 4), Some(vs));
        assert_eq!(store.find_previous_compile(CacheId::Vertex, 5), None);
        assert_eq!(store.find_previous_compile(CacheId::Blit, 4), None);
    }

    #[test]
    fn remove_all_releases_entries() {
        let up = uploader();
        let mut store = ContentStore::new();
        let p = make(CacheKey::from_raw(CacheId::Vertex, vec![1]), b"x", &up);
        store.insert_if_absent(Arc::clone(&p));
        assert_eq!(Arc::strong_count(&p), 2);
        assert_eq!(store.remove_all(), 1);
        assert_eq!(Arc::strong_count(&p), 1);
        assert!(store.is_empty());
    }
}
