//! Compiled program cache.
//!
//! Maps a variable-length compilation key to a compiled machine-code binary
//! and its side tables. Each key is stored exactly once, identical machine
//! code produced from different keys shares backing storage, and the whole
//! table can be persisted to a versioned, device-tagged blob and restored in
//! a later process. An optional disk cache indexed by a cryptographic digest
//! of the key sits behind the in-memory table.
//!
//! The usual flow: build a [`ProgramKey`], turn it into a [`CacheKey`], call
//! [`ProgramCache::search`], and on a miss compile externally and hand the
//! result to [`ProgramCache::upload`].

#![warn(missing_docs)]

pub mod blob;
pub mod cache;
pub mod codec;
pub mod device;
pub mod disk;
pub mod error;
pub mod key;
pub mod metadata;
pub mod program;
pub mod store;
pub mod uploader;

pub use cache::ProgramCache;
pub use codec::{CacheHeader, LoadOutcome, SerializedCache, HEADER_SIZE, HEADER_VERSION};
pub use device::{ProgramDevice, ProgramLookup};
pub use disk::{DiskCache, FsDiskCache};
pub use error::CacheError;
pub use key::{BlitKey, CacheId, CacheKey, CsKey, FsKey, GsKey, ProgramKey, TcsKey, TesKey, VsKey};
pub use metadata::{BindMap, Binding, CompiledOutput, StageInfo, XfbBuffer, XfbInfo, XfbOutput};
pub use program::{CompiledProgram, ProgramRef};
pub use uploader::{ArenaUploader, BackingResource, CodeRegion, Uploader};
