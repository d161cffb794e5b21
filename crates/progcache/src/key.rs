//! Program keys.
//!
//! Every stage has its own strongly-typed key struct describing the API state
//! that influences code generation. The table itself only sees the erased
//! [`CacheKey`]: a stage tag plus the canonical bincode encoding of the typed
//! key. Two keys are equal iff their tags match and their encodings are
//! byte-identical, including length.

use std::fmt;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CacheError;

/// Identifies the table partition a key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheId {
    /// Vertex stage.
    Vertex,
    /// Tessellation control stage.
    TessCtrl,
    /// Tessellation evaluation stage.
    TessEval,
    /// Geometry stage.
    Geometry,
    /// Fragment stage.
    Fragment,
    /// Compute stage.
    Compute,
    /// Fixed-function blit and resolve kernels.
    Blit,
}

impl CacheId {
    /// All stage ids in tag order.
    pub const ALL: [CacheId; 7] = [
        CacheId::Vertex,
        CacheId::TessCtrl,
        CacheId::TessEval,
        CacheId::Geometry,
        CacheId::Fragment,
        CacheId::Compute,
        CacheId::Blit,
    ];

    /// Returns the stable numeric tag written to persisted blobs.
    pub fn as_raw(self) -> u32 {
        match self {
            CacheId::Vertex => 0,
            CacheId::TessCtrl => 1,
            CacheId::TessEval => 2,
            CacheId::Geometry => 3,
            CacheId::Fragment => 4,
            CacheId::Compute => 5,
            CacheId::Blit => 6,
        }
    }

    /// Parses a numeric tag.
    pub fn from_raw(raw: u32) -> Result<Self, CacheError> {
        Self::ALL
            .get(raw as usize)
            .copied()
            .ok_or(CacheError::UnknownStage(raw))
    }

    /// Short uppercase name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            CacheId::Vertex => "VS",
            CacheId::TessCtrl => "TCS",
            CacheId::TessEval => "TES",
            CacheId::Geometry => "GS",
            CacheId::Fragment => "FS",
            CacheId::Compute => "CS",
            CacheId::Blit => "BLIT",
        }
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The erased key stored in the program table.
///
/// Cheap to clone: the encoded bytes are shared.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    id: CacheId,
    data: Arc<[u8]>,
}

impl CacheKey {
    /// Wraps already-encoded key bytes.
    pub fn from_raw(id: CacheId, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// The stage partition of this key.
    pub fn id(&self) -> CacheId {
        self.id
    }

    /// The encoded key bytes, without the stage tag.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length of the persisted form: a 4-byte tag followed by the data.
    pub fn encoded_len(&self) -> usize {
        4 + self.data.len()
    }

    /// Persisted form: little-endian tag followed by the data.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.id.as_raw().to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parses the persisted form produced by [`CacheKey::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.len() < 4 {
            return Err(CacheError::Truncated {
                offset: 0,
                needed: 4,
            });
        }
        let (tag, data) = bytes.split_at(4);
        let raw = u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]);
        Ok(Self::from_raw(CacheId::from_raw(raw)?, data))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({}, {} bytes)", self.id, self.data.len())
    }
}

/// Vertex stage key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VsKey {
    /// Identity of the source program this variant was compiled from.
    pub program_string_id: u32,
    /// Number of user clip planes to lower.
    pub nr_userclip_plane_consts: u8,
    /// Clamp vertex colors to [0, 1].
    pub clamp_vertex_color: bool,
    /// Pass the edge flag through to the fragment stage.
    pub copy_edgeflag: bool,
}

/// Tessellation control stage key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcsKey {
    /// Identity of the source program this variant was compiled from.
    pub program_string_id: u32,
    /// Vertices per input patch.
    pub input_vertices: u8,
    /// Per-vertex outputs read by the evaluation stage.
    pub outputs_written: u64,
    /// Per-patch outputs read by the evaluation stage.
    pub patch_outputs_written: u32,
    /// Primitive mode of the bound evaluation stage.
    pub tes_primitive_mode: u32,
}

/// Tessellation evaluation stage key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TesKey {
    /// Identity of the source program this variant was compiled from.
    pub program_string_id: u32,
    /// Per-vertex inputs written by the control stage.
    pub inputs_read: u64,
    /// Per-patch inputs written by the control stage.
    pub patch_inputs_read: u32,
    /// Number of user clip planes to lower.
    pub nr_userclip_plane_consts: u8,
}

/// Geometry stage key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GsKey {
    /// Identity of the source program this variant was compiled from.
    pub program_string_id: u32,
    /// Number of user clip planes to lower.
    pub nr_userclip_plane_consts: u8,
}

/// Fragment stage key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FsKey {
    /// Identity of the source program this variant was compiled from.
    pub program_string_id: u32,
    /// Number of bound color render targets.
    pub nr_color_regions: u8,
    /// Flat shading of color inputs.
    pub flat_shade: bool,
    /// Replicate alpha for alpha-to-coverage.
    pub alpha_test_replicate_alpha: bool,
    /// Interpolate at sample positions.
    pub persample_interp: bool,
    /// Rendering to a multisampled framebuffer.
    pub multisample_fbo: bool,
    /// Varying slots written by the previous stage.
    pub input_slots_valid: u64,
}

/// Compute stage key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CsKey {
    /// Identity of the source program this variant was compiled from.
    pub program_string_id: u32,
    /// Required subgroup size, 0 for any.
    pub subgroup_size: u8,
}

/// Key for fixed-function blit and resolve kernels.
///
/// These have no source program; the whole parameter block is the key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlitKey {
    /// Blit operation code.
    pub op: u32,
    /// Operation-specific parameter block.
    pub params: Vec<u8>,
}

/// A typed program key for any stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKey {
    /// Vertex stage.
    Vertex(VsKey),
    /// Tessellation control stage.
    TessCtrl(TcsKey),
    /// Tessellation evaluation stage.
    TessEval(TesKey),
    /// Geometry stage.
    Geometry(GsKey),
    /// Fragment stage.
    Fragment(FsKey),
    /// Compute stage.
    Compute(CsKey),
    /// Blit kernel.
    Blit(BlitKey),
}

impl ProgramKey {
    /// The stage partition of this key.
    pub fn cache_id(&self) -> CacheId {
        match self {
            ProgramKey::Vertex(_) => CacheId::Vertex,
            ProgramKey::TessCtrl(_) => CacheId::TessCtrl,
            ProgramKey::TessEval(_) => CacheId::TessEval,
            ProgramKey::Geometry(_) => CacheId::Geometry,
            ProgramKey::Fragment(_) => CacheId::Fragment,
            ProgramKey::Compute(_) => CacheId::Compute,
            ProgramKey::Blit(_) => CacheId::Blit,
        }
    }

    /// The source program identity, for every stage except blits.
    pub fn program_string_id(&self) -> Option<u32> {
        match self {
            ProgramKey::Vertex(k) => Some(k.program_string_id),
            ProgramKey::TessCtrl(k) => Some(k.program_string_id),
            ProgramKey::TessEval(k) => Some(k.program_string_id),
            ProgramKey::Geometry(k) => Some(k.program_string_id),
            ProgramKey::Fragment(k) => Some(k.program_string_id),
            ProgramKey::Compute(k) => Some(k.program_string_id),
            ProgramKey::Blit(_) => None,
        }
    }

    /// Produces the erased table key.
    pub fn to_cache_key(&self) -> Result<CacheKey, CacheError> {
        let data = match self {
            ProgramKey::Vertex(k) => encode(k)?,
            ProgramKey::TessCtrl(k) => encode(k)?,
            ProgramKey::TessEval(k) => encode(k)?,
            ProgramKey::Geometry(k) => encode(k)?,
            ProgramKey::Fragment(k) => encode(k)?,
            ProgramKey::Compute(k) => encode(k)?,
            ProgramKey::Blit(k) => encode(k)?,
        };
        Ok(CacheKey::from_raw(self.cache_id(), data))
    }

    /// Recovers the typed key from an erased one.
    pub fn from_cache_key(key: &CacheKey) -> Result<Self, CacheError> {
        let data = key.data();
        Ok(match key.id() {
            CacheId::Vertex => ProgramKey::Vertex(decode(data)?),
            CacheId::TessCtrl => ProgramKey::TessCtrl(decode(data)?),
            CacheId::TessEval => ProgramKey::TessEval(decode(data)?),
            CacheId::Geometry => ProgramKey::Geometry(decode(data)?),
            CacheId::Fragment => ProgramKey::Fragment(decode(data)?),
            CacheId::Compute => ProgramKey::Compute(decode(data)?),
            CacheId::Blit => ProgramKey::Blit(decode(data)?),
        })
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CacheError> {
    let (value, used) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    if used != data.len() {
        return Err(CacheError::Serialization {
            reason: format!("{} trailing bytes after key", data.len() - used),
        });
    }
    Ok(value)
}
