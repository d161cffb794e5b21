//! Compiled programs: machine code plus the side tables that describe it.

use std::fmt;
use std::sync::Arc;

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::metadata::{BindMap, CompiledOutput, StageInfo, XfbInfo};
use crate::uploader::{CodeRegion, Uploader};

/// Alignment of every code upload, in bytes.
pub const CODE_ALIGNMENT: usize = 64;

/// Shared handle to a compiled program.
///
/// The table holds one reference and every caller of
/// [`ProgramCache::search`](crate::ProgramCache::search) or
/// [`ProgramCache::upload`](crate::ProgramCache::upload) receives another.
/// Cloning is cheap and dropping needs no cache lock. The program is
/// destroyed when the last handle goes away.
pub type ProgramRef = Arc<CompiledProgram>;

/// One key bound to its machine code and metadata. Immutable once built.
pub struct CompiledProgram {
    key: CacheKey,
    code: CodeRegion,
    constant_data: Box<[u8]>,
    info: StageInfo,
    xfb: Option<XfbInfo>,
    bind_map: BindMap,
    uploader: Arc<dyn Uploader>,
}

impl CompiledProgram {
    /// Builds a program, writing its code into a fresh region from `uploader`.
    pub fn create(
        key: CacheKey,
        output: CompiledOutput,
        uploader: &Arc<dyn Uploader>,
    ) -> Result<Self, CacheError> {
        let region = uploader.alloc(output.code.len(), CODE_ALIGNMENT)?;
        region.write(&output.code);
        Ok(Self::with_region(key, output, region, uploader))
    }

    /// Builds a program whose code already lives in `region`.
    ///
    /// Used for content deduplication: `region` must hold bytes identical to
    /// `output.code`. Only storage is shared, never metadata.
    pub fn with_region(
        key: CacheKey,
        output: CompiledOutput,
        region: CodeRegion,
        uploader: &Arc<dyn Uploader>,
    ) -> Self {
        debug_assert_eq!(region.size(), output.code.len());
        let CompiledOutput {
            code: _,
            constant_data,
            info,
            xfb,
            bind_map,
        } = output;

        Self {
            key,
            code: region,
            constant_data: constant_data.into_boxed_slice(),
            info,
            xfb,
            bind_map,
            uploader: Arc::clone(uploader),
        }
    }

    /// The key this program was compiled for.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Where the machine code lives.
    pub fn code_region(&self) -> &CodeRegion {
        &self.code
    }

    /// Size of the machine code in bytes.
    pub fn code_size(&self) -> usize {
        self.code.size()
    }

    /// Copies the machine code out.
    pub fn code(&self) -> Vec<u8> {
        self.code.to_vec()
    }

    /// The constant pool.
    pub fn constant_data(&self) -> &[u8] {
        &self.constant_data
    }

    /// Stage information and parameter table.
    pub fn info(&self) -> &StageInfo {
        &self.info
    }

    /// Transform-feedback layout, if any.
    pub fn xfb(&self) -> Option<&XfbInfo> {
        self.xfb.as_ref()
    }

    /// Binding table layout.
    pub fn bind_map(&self) -> &BindMap {
        &self.bind_map
    }

    /// Rebuilds the compiler output this program was created from.
    pub fn to_output(&self) -> CompiledOutput {
        CompiledOutput {
            code: self.code(),
            constant_data: self.constant_data.to_vec(),
            info: self.info.clone(),
            xfb: self.xfb.clone(),
            bind_map: self.bind_map.clone(),
        }
    }
}

impl Drop for CompiledProgram {
    fn drop(&mut self) {
        tracing::trace!(key = ?self.key, "destroying program");
        self.uploader.release(&self.code);
    }
}

impl fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledProgram")
            .field("key", &self.key)
            .field("code", &self.code)
            .field("constant_data", &self.constant_data.len())
            .field("nr_params", &self.info.nr_params())
            .field("xfb", &self.xfb.is_some())
            .finish()
    }
}
