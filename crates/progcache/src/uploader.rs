//! Backing storage for uploaded machine code.
//!
//! Code bytes live inside larger shared resources handed out by an
//! [`Uploader`]. A [`CodeRegion`] names a stable `(resource, offset, size)`
//! range; programs with byte-identical code may hold the same region.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use progcache_config::UploaderConfig;

use crate::error::CacheError;

/// A fixed-capacity memory resource that code regions are carved out of.
pub struct BackingResource {
    id: u64,
    capacity: usize,
    data: RwLock<Box<[u8]>>,
}

impl BackingResource {
    fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            data: RwLock::new(vec![0u8; capacity].into_boxed_slice()),
        }
    }

    /// Identifier unique within the uploader that created this resource.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for BackingResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackingResource(#{})", self.id)
    }
}

/// A range of a [`BackingResource`] holding one program's code.
///
/// The bytes are written exactly once, before the region is shared, and are
/// immutable afterwards.
#[derive(Clone)]
pub struct CodeRegion {
    resource: Arc<BackingResource>,
    offset: usize,
    size: usize,
}

impl CodeRegion {
    /// The resource this region lives in.
    pub fn resource(&self) -> &Arc<BackingResource> {
        &self.resource
    }

    /// Byte offset within the resource.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// True if both regions name the same bytes of the same resource.
    pub fn same_storage(&self, other: &CodeRegion) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
            && self.offset == other.offset
            && self.size == other.size
    }

    /// Copies the region's bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_bytes(|bytes| bytes.to_vec())
    }

    /// Runs `f` over the region's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.resource.data.read();
        f(&data[self.offset..self.offset + self.size])
    }

    /// True if the region holds exactly `code`.
    pub fn matches(&self, code: &[u8]) -> bool {
        self.size == code.len() && self.with_bytes(|bytes| bytes == code)
    }

    pub(crate) fn write(&self, code: &[u8]) {
        debug_assert_eq!(code.len(), self.size);
        let mut data = self.resource.data.write();
        data[self.offset..self.offset + self.size].copy_from_slice(code);
    }
}

impl fmt::Debug for CodeRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CodeRegion(#{} @ {:#x}, {} bytes)",
            self.resource.id, self.offset, self.size
        )
    }
}

/// Sub-allocator placing code at stable offsets inside shared resources.
pub trait Uploader: Send + Sync {
    /// Reserves `size` bytes aligned to `alignment` (a power of two).
    fn alloc(&self, size: usize, alignment: usize) -> Result<CodeRegion, CacheError>;

    /// Called once for every program that held `region` when it is destroyed.
    ///
    /// Regions shared by deduplicated programs are released once per program.
    fn release(&self, _region: &CodeRegion) {}
}

/// Growable bump allocator over fixed-size chunks.
///
/// Allocations are never reclaimed individually; a chunk lives for as long as
/// any region inside it is referenced.
pub struct ArenaUploader {
    chunk_size: usize,
    min_alignment: usize,
    max_bytes: Option<usize>,
    state: Mutex<ArenaState>,
    next_id: AtomicU64,
    released: AtomicUsize,
}

#[derive(Default)]
struct ArenaState {
    current: Option<Arc<BackingResource>>,
    cursor: usize,
    reserved: usize,
    allocated: usize,
    resource_count: usize,
}

impl ArenaUploader {
    /// Creates an uploader with the given chunk size and minimum alignment.
    pub fn new(chunk_size: usize, min_alignment: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            min_alignment: min_alignment.max(1),
            max_bytes: None,
            state: Mutex::new(ArenaState::default()),
            next_id: AtomicU64::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Caps the total bytes reserved across all chunks.
    pub fn with_limit(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Builds an uploader from the `[uploader]` configuration table.
    pub fn from_config(config: &UploaderConfig) -> Self {
        let uploader = Self::new(config.chunk_size, config.alignment);
        match config.max_bytes {
            Some(max) => uploader.with_limit(max),
            None => uploader,
        }
    }

    /// Total bytes handed out, excluding alignment padding.
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().allocated
    }

    /// Total bytes reserved in chunks.
    pub fn reserved_bytes(&self) -> usize {
        self.state.lock().reserved
    }

    /// Number of chunks created so far.
    pub fn resource_count(&self) -> usize {
        self.state.lock().resource_count
    }

    /// Number of program releases observed.
    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }
}

impl Default for ArenaUploader {
    fn default() -> Self {
        Self::from_config(&UploaderConfig::default())
    }
}

impl Uploader for ArenaUploader {
    fn alloc(&self, size: usize, alignment: usize) -> Result<CodeRegion, CacheError> {
        let alignment = alignment.max(self.min_alignment);
        debug_assert!(alignment.is_power_of_two());

        let mut state = self.state.lock();
        let aligned = (state.cursor + alignment - 1) & !(alignment - 1);

        let (resource, offset) = match state.current.clone() {
            Some(res) if aligned + size <= res.capacity() => (res, aligned),
            _ => {
                let capacity = self.chunk_size.max(size);
                if let Some(limit) = self.max_bytes {
                    if state.reserved + capacity > limit {
                        return Err(CacheError::OutOfMemory {
                            requested: size,
                            limit,
                        });
                    }
                }
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let res = Arc::new(BackingResource::new(id, capacity));
                tracing::trace!(resource = id, capacity, "new code chunk");
                state.reserved += capacity;
                state.resource_count += 1;
                state.current = Some(Arc::clone(&res));
                (res, 0)
            }
        };

        state.cursor = offset + size;
        state.allocated += size;

        Ok(CodeRegion {
            resource,
            offset,
            size,
        })
    }

    fn release(&self, _region: &CodeRegion) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}
