//! Persisted cache format.
//!
//! A blob is a fixed header, an entry count, and that many entries:
//!
//! ```text
//! header_size u32 | header_version u32 | vendor_id u32 | device_id u32 | uuid [16]
//! entry_count u32
//! entry* :
//!   key_size u32            key bytes (stage tag u32 + encoded key)
//!   code_size u32           code bytes
//!   constant_data_size u32  constant bytes
//!   metadata_size u32       metadata bytes, then nr_params * u32 parameter table
//!   xfb_size u32 (0 = none) xfb bytes
//!   surface_count u32  sampler_count u32
//!   surface bindings (16 bytes each)  sampler bindings (16 bytes each)
//! ```
//!
//! The same entry encoding is used for disk cache records.

use progcache_common::{CacheUuid, DeviceIdentity};
use serde::{Deserialize, Serialize};

use crate::blob::{BlobReader, BlobWriter};
use crate::cache::ProgramCache;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::metadata::{BindMap, Binding, CompiledOutput, StageInfo, XfbInfo};
use crate::program::CompiledProgram;

/// Size of the encoded [`CacheHeader`] in bytes.
pub const HEADER_SIZE: u32 = 32;

/// Current blob format version. Increment on any change to the entry layout.
pub const HEADER_VERSION: u32 = 1;

/// Blob header binding the contents to one device and compiler build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheHeader {
    /// Must equal [`HEADER_SIZE`].
    pub header_size: u32,
    /// Must equal [`HEADER_VERSION`].
    pub header_version: u32,
    /// Hardware vendor tag.
    pub vendor_id: u32,
    /// Device model tag.
    pub device_id: u32,
    /// Cache-compatibility UUID.
    pub uuid: CacheUuid,
}

impl CacheHeader {
    /// The header a runtime with `identity` writes.
    pub fn for_identity(identity: &DeviceIdentity) -> Self {
        Self {
            header_size: HEADER_SIZE,
            header_version: HEADER_VERSION,
            vendor_id: identity.vendor_id,
            device_id: identity.device_id,
            uuid: identity.uuid,
        }
    }

    /// The identity recorded in this header.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.vendor_id, self.device_id, self.uuid)
    }

    fn write(&self, w: &mut BlobWriter) -> bool {
        w.write_u32(self.header_size)
            && w.write_u32(self.header_version)
            && w.write_u32(self.vendor_id)
            && w.write_u32(self.device_id)
            && w.write_bytes(self.uuid.as_bytes())
    }

    fn read(r: &mut BlobReader<'_>) -> Result<Self, CacheError> {
        let header_size = r.read_u32()?;
        let header_version = r.read_u32()?;
        let vendor_id = r.read_u32()?;
        let device_id = r.read_u32()?;
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(r.read_bytes(16)?);
        Ok(Self {
            header_size,
            header_version,
            vendor_id,
            device_id,
            uuid: CacheUuid::from_bytes(uuid),
        })
    }

    /// Checks every field against the running device, in header order.
    pub fn validate(&self, expected: &DeviceIdentity) -> Result<(), CacheError> {
        if self.header_size != HEADER_SIZE {
            return Err(CacheError::InvalidHeader {
                reason: format!(
                    "header size {} does not match {}",
                    self.header_size, HEADER_SIZE
                ),
            });
        }
        if self.header_version != HEADER_VERSION {
            return Err(mismatch(
                "header_version",
                HEADER_VERSION,
                self.header_version,
            ));
        }
        if self.vendor_id != expected.vendor_id {
            return Err(mismatch("vendor_id", expected.vendor_id, self.vendor_id));
        }
        if self.device_id != expected.device_id {
            return Err(mismatch("device_id", expected.device_id, self.device_id));
        }
        if self.uuid != expected.uuid {
            return Err(CacheError::HeaderMismatch {
                field: "uuid",
                expected: expected.uuid.to_string(),
                actual: self.uuid.to_string(),
            });
        }
        Ok(())
    }
}

fn mismatch(field: &'static str, expected: u32, actual: u32) -> CacheError {
    CacheError::HeaderMismatch {
        field,
        expected: format!("{expected:#x}"),
        actual: format!("{actual:#x}"),
    }
}

/// Reads the header and entry count without validating them.
pub fn read_header(data: &[u8]) -> Result<(CacheHeader, u32), CacheError> {
    let mut r = BlobReader::new(data);
    let header = CacheHeader::read(&mut r)?;
    let count = r.read_u32()?;
    Ok((header, count))
}

/// Metadata as persisted: the parameter table travels separately, sized by
/// `nr_params`.
#[derive(Serialize, Deserialize)]
struct StageInfoWire {
    dispatch_grf_start_reg: u32,
    total_scratch: u32,
    total_shared: u32,
    nr_pull_params: u32,
    num_cbufs: u32,
    system_values: Vec<u32>,
    nr_params: u32,
}

fn encode_info(info: &StageInfo) -> Result<Vec<u8>, CacheError> {
    let wire = StageInfoWire {
        dispatch_grf_start_reg: info.dispatch_grf_start_reg,
        total_scratch: info.total_scratch,
        total_shared: info.total_shared,
        nr_pull_params: info.nr_pull_params,
        num_cbufs: info.num_cbufs,
        system_values: info.system_values.clone(),
        nr_params: u32::try_from(info.params.len()).map_err(|_| CacheError::Serialization {
            reason: "parameter table too large".to_string(),
        })?,
    };
    to_bincode(&wire)
}

fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })
}

/// Decodes a size-prefixed field. The value must fill the field exactly.
fn from_bincode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    let (value, used) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    if used != bytes.len() {
        return Err(CacheError::Serialization {
            reason: format!("{} trailing bytes in entry field", bytes.len() - used),
        });
    }
    Ok(value)
}

/// Writes one entry. Returns `Ok(false)` if the writer ran out of room; the
/// caller rolls back.
pub fn write_program(w: &mut BlobWriter, program: &CompiledProgram) -> Result<bool, CacheError> {
    let info = encode_info(program.info())?;
    let xfb = program.xfb().map(to_bincode).transpose()?;

    w.write_sized(&program.key().to_bytes());
    program
        .code_region()
        .with_bytes(|code| w.write_sized(code));
    w.write_sized(program.constant_data());

    w.write_sized(&info);
    for param in &program.info().params {
        w.write_u32(*param);
    }

    match &xfb {
        Some(bytes) => w.write_sized(bytes),
        None => w.write_u32(0),
    };

    let bind_map = program.bind_map();
    w.write_len(bind_map.surfaces.len());
    w.write_len(bind_map.samplers.len());
    for binding in bind_map.surfaces.iter().chain(&bind_map.samplers) {
        w.write_bytes(&binding.to_le_bytes());
    }

    Ok(!w.out_of_memory())
}

/// Reads one entry.
pub fn read_entry(r: &mut BlobReader<'_>) -> Result<(CacheKey, CompiledOutput), CacheError> {
    let key = CacheKey::from_bytes(r.read_sized()?)?;
    let code = r.read_sized()?.to_vec();
    let constant_data = r.read_sized()?.to_vec();

    let wire: StageInfoWire = from_bincode(r.read_sized()?)?;
    let params = read_u32_array(r, wire.nr_params)?;

    let xfb_size = r.read_u32()? as usize;
    let xfb = if xfb_size == 0 {
        None
    } else {
        Some(from_bincode::<XfbInfo>(r.read_bytes(xfb_size)?)?)
    };

    let surface_count = r.read_u32()?;
    let sampler_count = r.read_u32()?;
    let surfaces = read_bindings(r, surface_count)?;
    let samplers = read_bindings(r, sampler_count)?;

    let output = CompiledOutput {
        code,
        constant_data,
        info: StageInfo {
            dispatch_grf_start_reg: wire.dispatch_grf_start_reg,
            total_scratch: wire.total_scratch,
            total_shared: wire.total_shared,
            nr_pull_params: wire.nr_pull_params,
            num_cbufs: wire.num_cbufs,
            system_values: wire.system_values,
            params,
        },
        xfb,
        bind_map: BindMap { surfaces, samplers },
    };
    Ok((key, output))
}

fn read_u32_array(r: &mut BlobReader<'_>, count: u32) -> Result<Vec<u32>, CacheError> {
    let bytes = r.read_bytes(count as usize * 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_bindings(r: &mut BlobReader<'_>, count: u32) -> Result<Vec<Binding>, CacheError> {
    let bytes = r.read_bytes(count as usize * Binding::ENCODED_LEN)?;
    Ok(bytes
        .chunks_exact(Binding::ENCODED_LEN)
        .filter_map(Binding::from_le_bytes)
        .collect())
}

/// Encodes one program as a standalone record.
pub fn encode_program(program: &CompiledProgram) -> Result<Vec<u8>, CacheError> {
    let mut w = BlobWriter::new();
    write_program(&mut w, program)?;
    Ok(w.into_inner())
}

/// Decodes a record produced by [`encode_program`].
pub fn decode_program(data: &[u8]) -> Result<(CacheKey, CompiledOutput), CacheError> {
    read_entry(&mut BlobReader::new(data))
}

/// Result of serializing a cache.
#[derive(Debug)]
pub struct SerializedCache {
    /// The blob. Always well-formed: header, count, whole entries.
    pub data: Vec<u8>,
    /// Number of entries in `data`.
    pub entry_count: u32,
    /// Size a buffer would need to hold every entry.
    pub required: usize,
}

impl SerializedCache {
    /// True if every entry fit.
    pub fn is_complete(&self) -> bool {
        !self.data.is_empty() && self.data.len() == self.required
    }
}

/// Serializes `cache`, stopping at the first entry that would exceed `limit`.
///
/// An entry is either written whole or not at all. If the header and count
/// do not fit, `data` is empty.
pub fn serialize(cache: &ProgramCache, limit: Option<usize>) -> SerializedCache {
    let programs = cache.entries();
    let mut w = match limit {
        Some(limit) => BlobWriter::with_limit(limit),
        None => BlobWriter::new(),
    };

    let mut required = HEADER_SIZE as usize + 4;
    let header = CacheHeader::for_identity(cache.identity());
    let count_slot = if header.write(&mut w) {
        w.reserve_u32()
    } else {
        None
    };

    let mut count = 0u32;
    let mut truncated = count_slot.is_none();
    for program in &programs {
        if truncated {
            match encode_program(program) {
                Ok(bytes) => required += bytes.len(),
                Err(e) => tracing::warn!(key = ?program.key(), error = %e, "skipping unencodable entry"),
            }
            continue;
        }

        let save = w.len();
        match write_program(&mut w, program) {
            Ok(true) => {
                count += 1;
                required += w.len() - save;
            }
            Ok(false) => {
                w.truncate(save);
                truncated = true;
                if let Ok(bytes) = encode_program(program) {
                    required += bytes.len();
                }
            }
            Err(e) => {
                w.truncate(save);
                tracing::warn!(key = ?program.key(), error = %e, "skipping unencodable entry");
            }
        }
    }

    let data = match count_slot {
        Some(slot) => {
            w.overwrite_u32(slot, count);
            w.into_inner()
        }
        None => Vec::new(),
    };

    if truncated {
        tracing::debug!(
            written = data.len(),
            required,
            entries = count,
            total = programs.len(),
            "cache serialization incomplete"
        );
    }

    SerializedCache {
        data,
        entry_count: count,
        required,
    }
}

/// Result of loading a blob into a cache.
#[derive(Debug)]
pub enum LoadOutcome {
    /// The cache is disabled; nothing was read.
    Disabled,
    /// The header was unreadable or did not match; nothing was applied.
    Rejected(CacheError),
    /// Every entry was read and applied.
    Loaded {
        /// Entries applied.
        entries: usize,
    },
    /// Loading stopped at a bad entry; earlier entries were kept.
    Partial {
        /// Entries applied before the failure.
        entries: usize,
        /// Why loading stopped.
        error: CacheError,
    },
}

impl LoadOutcome {
    /// Number of entries applied.
    pub fn entries(&self) -> usize {
        match self {
            LoadOutcome::Loaded { entries } | LoadOutcome::Partial { entries, .. } => *entries,
            LoadOutcome::Disabled | LoadOutcome::Rejected(_) => 0,
        }
    }
}

/// Loads a blob into `cache`.
///
/// The header is validated before any entry is applied. Entries go through
/// the same path as fresh uploads, so an entry whose key is already present
/// keeps the existing program.
pub fn load(cache: &ProgramCache, data: &[u8]) -> LoadOutcome {
    if !cache.is_enabled() {
        return LoadOutcome::Disabled;
    }

    let mut r = BlobReader::new(data);
    let checked = CacheHeader::read(&mut r).and_then(|header| {
        let count = r.read_u32()?;
        header.validate(cache.identity())?;
        Ok(count)
    });
    let count = match checked {
        Ok(count) => count,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting cache blob");
            return LoadOutcome::Rejected(e);
        }
    };

    let mut applied = 0;
    for _ in 0..count {
        let result = read_entry(&mut r).and_then(|(key, output)| cache.upload(key, output));
        match result {
            Ok(_) => applied += 1,
            Err(error) => {
                tracing::warn!(applied, %error, "cache blob load stopped early");
                return LoadOutcome::Partial {
                    entries: applied,
                    error,
                };
            }
        }
    }

    tracing::debug!(entries = applied, "loaded cache blob");
    LoadOutcome::Loaded { entries: applied }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheId;
    use crate::metadata::{XfbBuffer, XfbOutput};
    use crate::uploader::{ArenaUploader, Uploader};
    use std::sync::Arc;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(0x8086, 0x591b, CacheUuid::from_bytes([3; 16]))
    }

    fn uploader() -> Arc<dyn Uploader> {
        Arc::new(ArenaUploader::new(4096, 64))
    }

    fn full_output() -> CompiledOutput {
        CompiledOutput {
            code: vec![0xde, 0xad, 0xbe, 0xef],
            constant_data: vec![1, 2, 3],
            info: StageInfo {
                dispatch_grf_start_reg: 2,
                total_scratch: 1024,
                total_shared: 0,
                nr_pull_params: 1,
                num_cbufs: 2,
                system_values: vec![5, 6],
                params: vec![100, 200, 300],
            },
            xfb: Some(XfbInfo {
                buffers: vec![XfbBuffer {
                    stride: 16,
                    varying_count: 1,
                }],
                outputs: vec![XfbOutput {
                    buffer: 0,
                    offset: 0,
                    location: 3,
                    component_mask: 0xf,
                }],
            }),
            bind_map: BindMap {
                surfaces: vec![
                    Binding {
                        set: 0,
                        binding: 0,
                        index: 0,
                        plane: 0,
                    },
                    Binding {
                        set: 1,
                        binding: 2,
                        index: 3,
                        plane: 1,
                    },
                ],
                samplers: vec![Binding {
                    set: 0,
                    binding: 4,
                    index: 0,
                    plane: 0,
                }],
            },
        }
    }

    #[test]
    fn record_roundtrip_preserves_everything() {
        let up = uploader();
        let key = CacheKey::from_raw(CacheId::Fragment, vec![1, 2, 3]);
        let program = CompiledProgram::create(key.clone(), full_output(), &up).unwrap();
        let bytes = encode_program(&program).unwrap();
        let (k, output) = decode_program(&bytes).unwrap();
        assert_eq!(k, key);
        assert_eq!(output, full_output());
    }

    #[test]
    fn record_without_xfb_writes_zero_size() {
        let up = uploader();
        let output = CompiledOutput {
            code: vec![1],
            ..Default::default()
        };
        let program =
            CompiledProgram::create(CacheKey::from_raw(CacheId::Vertex, vec![]), output.clone(), &up)
                .unwrap();
        let bytes = encode_program(&program).unwrap();
        let (_, back) = decode_program(&bytes).unwrap();
        assert_eq!(back, output);
        assert!(back.xfb.is_none());
    }

    #[test]
    fn truncated_record_fails() {
        let up = uploader();
        let program = CompiledProgram::create(
            CacheKey::from_raw(CacheId::Fragment, vec![1]),
            full_output(),
            &up,
        )
        .unwrap();
        let bytes = encode_program(&program).unwrap();
        for cut in [0, 3, 10, bytes.len() - 1] {
            assert!(decode_program(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    fn write_entry_with_padding(
        w: &mut BlobWriter,
        key: &CacheKey,
        output: &CompiledOutput,
        info_pad: usize,
        xfb_pad: usize,
    ) {
        w.write_sized(&key.to_bytes());
        w.write_sized(&output.code);
        w.write_sized(&output.constant_data);
        let mut info = encode_info(&output.info).unwrap();
        info.extend(std::iter::repeat(0).take(info_pad));
        w.write_sized(&info);
        for param in &output.info.params {
            w.write_u32(*param);
        }
        let mut xfb = to_bincode(output.xfb.as_ref().unwrap()).unwrap();
        xfb.extend(std::iter::repeat(0).take(xfb_pad));
        w.write_sized(&xfb);
        w.write_len(output.bind_map.surfaces.len());
        w.write_len(output.bind_map.samplers.len());
        for binding in output.bind_map.surfaces.iter().chain(&output.bind_map.samplers) {
            w.write_bytes(&binding.to_le_bytes());
        }
    }

    #[test]
    fn padded_entry_fields_are_rejected() {
        let key = CacheKey::from_raw(CacheId::Fragment, vec![4]);
        for (info_pad, xfb_pad, ok) in [(0, 0, true), (1, 0, false), (0, 2, false)] {
            let mut w = BlobWriter::new();
            write_entry_with_padding(&mut w, &key, &full_output(), info_pad, xfb_pad);
            let result = decode_program(&w.into_inner());
            assert_eq!(result.is_ok(), ok, "info_pad {info_pad} xfb_pad {xfb_pad}");
            if !ok {
                assert!(matches!(result, Err(CacheError::Serialization { .. })));
            }
        }
    }

    #[test]
    fn padded_metadata_stops_load_as_partial() {
        let mut w = BlobWriter::new();
        assert!(CacheHeader::for_identity(&identity()).write(&mut w));
        w.write_u32(2);
        let good = CacheKey::from_raw(CacheId::Fragment, vec![1]);
        let damaged = CacheKey::from_raw(CacheId::Fragment, vec![2]);
        write_entry_with_padding(&mut w, &good, &full_output(), 0, 0);
        write_entry_with_padding(&mut w, &damaged, &full_output(), 3, 0);

        let cache = ProgramCache::new(identity(), uploader(), true);
        match load(&cache, &w.into_inner()) {
            LoadOutcome::Partial { entries, error } => {
                assert_eq!(entries, 1);
                assert!(matches!(error, CacheError::Serialization { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(cache.contains(&good));
        assert!(!cache.contains(&damaged));
    }

    #[test]
    fn header_validation_order() {
        let id = identity();
        let mut header = CacheHeader::for_identity(&id);
        assert!(header.validate(&id).is_ok());

        header.vendor_id = 0x1002;
        header.device_id = 0;
        match header.validate(&id) {
            Err(CacheError::HeaderMismatch { field, .. }) => assert_eq!(field, "vendor_id"),
            other => panic!("unexpected {other:?}"),
        }

        let mut header = CacheHeader::for_identity(&id);
        header.header_version = 9;
        header.vendor_id = 0x1002;
        match header.validate(&id) {
            Err(CacheError::HeaderMismatch { field, .. }) => assert_eq!(field, "header_version"),
            other => panic!("unexpected {other:?}"),
        }

        header.header_size = 16;
        assert!(matches!(
            header.validate(&id),
            Err(CacheError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn uuid_mismatch_reported() {
        let id = identity();
        let mut header = CacheHeader::for_identity(&id);
        header.uuid = CacheUuid::from_bytes([4; 16]);
        match header.validate(&id) {
            Err(CacheError::HeaderMismatch { field, .. }) => assert_eq!(field, "uuid"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn header_bytes_are_header_size_long() {
        let mut w = BlobWriter::new();
        assert!(CacheHeader::for_identity(&identity()).write(&mut w));
        assert_eq!(w.len(), HEADER_SIZE as usize);
    }

    #[test]
    fn read_header_of_serialized_cache() {
        let cache = ProgramCache::new(identity(), uploader(), true);
        let blob = serialize(&cache, None);
        let (header, count) = read_header(&blob.data).unwrap();
        assert_eq!(header.identity(), identity());
        assert_eq!(count, 0);
        assert!(blob.is_complete());
    }
}
