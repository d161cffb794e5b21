//! Side tables produced by the compiler alongside machine code.
//!
//! The cache never interprets these; it stores, copies, and serializes them.

use serde::{Deserialize, Serialize};

/// Stage-level program information.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInfo {
    /// First register holding dispatch payload.
    pub dispatch_grf_start_reg: u32,
    /// Scratch space per thread in bytes.
    pub total_scratch: u32,
    /// Shared local memory in bytes.
    pub total_shared: u32,
    /// Number of uniform parameters pulled rather than pushed.
    pub nr_pull_params: u32,
    /// Number of constant buffers the program reads.
    pub num_cbufs: u32,
    /// System values the driver must upload, in push order.
    pub system_values: Vec<u32>,
    /// Parameter pull table: one entry per pushed uniform slot.
    pub params: Vec<u32>,
}

impl StageInfo {
    /// Number of entries in the parameter pull table.
    pub fn nr_params(&self) -> usize {
        self.params.len()
    }
}

/// Logical-to-physical mapping for one bound resource slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    /// Descriptor set.
    pub set: u32,
    /// Binding within the set.
    pub binding: u32,
    /// Array index within the binding.
    pub index: u32,
    /// Plane of a multi-planar image.
    pub plane: u32,
}

impl Binding {
    /// Encoded width of one binding in a persisted blob.
    pub const ENCODED_LEN: usize = 16;

    /// Fixed-width little-endian encoding.
    pub fn to_le_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.set.to_le_bytes());
        out[4..8].copy_from_slice(&self.binding.to_le_bytes());
        out[8..12].copy_from_slice(&self.index.to_le_bytes());
        out[12..16].copy_from_slice(&self.plane.to_le_bytes());
        out
    }

    /// Decodes one binding. `bytes` must be exactly [`Binding::ENCODED_LEN`] long.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            set: word(0),
            binding: word(4),
            index: word(8),
            plane: word(12),
        })
    }
}

/// Binding table layout: surface and sampler slots to descriptors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMap {
    /// Binding table entries for surfaces.
    pub surfaces: Vec<Binding>,
    /// Binding table entries for samplers.
    pub samplers: Vec<Binding>,
}

/// One transform-feedback buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfbBuffer {
    /// Byte stride between vertices.
    pub stride: u32,
    /// Number of varyings captured into this buffer.
    pub varying_count: u32,
}

/// One captured output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfbOutput {
    /// Destination buffer index.
    pub buffer: u8,
    /// Byte offset within a vertex.
    pub offset: u16,
    /// Varying location captured.
    pub location: u8,
    /// Components of the varying written.
    pub component_mask: u8,
}

/// Transform-feedback (stream-out) layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XfbInfo {
    /// Per-buffer layout.
    pub buffers: Vec<XfbBuffer>,
    /// Captured outputs.
    pub outputs: Vec<XfbOutput>,
}

/// Everything the compiler hands to the cache for one program.
///
/// The cache takes ownership of all of it; nothing is borrowed from the
/// caller after [`ProgramCache::upload`](crate::ProgramCache::upload) returns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompiledOutput {
    /// Raw machine instructions.
    pub code: Vec<u8>,
    /// Constant pool read by the program.
    pub constant_data: Vec<u8>,
    /// Stage-level information and parameter table.
    pub info: StageInfo,
    /// Transform-feedback layout, if the program captures outputs.
    pub xfb: Option<XfbInfo>,
    /// Binding table layout.
    pub bind_map: BindMap,
}
