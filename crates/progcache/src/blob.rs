//! Linear byte buffers for the persisted cache format.
//!
//! All integers are little-endian `u32`. A writer may be bounded: once a
//! write would exceed the bound, it sets a sticky out-of-memory flag and
//! drops that write and every later one, so callers check once at the end of
//! a record and roll back with [`BlobWriter::truncate`].

use crate::error::CacheError;

/// Append-only output buffer with an optional size bound.
#[derive(Debug, Default)]
pub struct BlobWriter {
    data: Vec<u8>,
    limit: Option<usize>,
    out_of_memory: bool,
}

impl BlobWriter {
    /// An unbounded writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer that refuses to grow past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit: Some(limit),
            out_of_memory: false,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True once any write has been refused.
    pub fn out_of_memory(&self) -> bool {
        self.out_of_memory
    }

    fn has_room(&mut self, len: usize) -> bool {
        if self.out_of_memory {
            return false;
        }
        if let Some(limit) = self.limit {
            if self.data.len() + len > limit {
                self.out_of_memory = true;
                return false;
            }
        }
        true
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        if !self.has_room(bytes.len()) {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }

    /// Appends a `u32`.
    pub fn write_u32(&mut self, value: u32) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Appends a length as `u32`. Lengths over `u32::MAX` are refused.
    pub fn write_len(&mut self, len: usize) -> bool {
        match u32::try_from(len) {
            Ok(v) => self.write_u32(v),
            Err(_) => {
                self.out_of_memory = true;
                false
            }
        }
    }

    /// Appends a `u32` length prefix followed by the bytes.
    pub fn write_sized(&mut self, bytes: &[u8]) -> bool {
        self.write_len(bytes.len()) && self.write_bytes(bytes)
    }

    /// Reserves a `u32` slot to be filled later. Returns its offset.
    pub fn reserve_u32(&mut self) -> Option<usize> {
        let offset = self.data.len();
        self.write_u32(0).then_some(offset)
    }

    /// Overwrites a slot previously returned by [`BlobWriter::reserve_u32`].
    pub fn overwrite_u32(&mut self, offset: usize, value: u32) {
        if let Some(slot) = self.data.get_mut(offset..offset + 4) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Rolls the buffer back to `len` bytes and clears the out-of-memory flag.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
        self.out_of_memory = false;
    }

    /// Consumes the writer.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Cursor over an input buffer. Every read is bounds-checked.
#[derive(Debug)]
pub struct BlobReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    /// Starts reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CacheError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CacheError::Truncated {
                offset: self.pos,
                needed: len,
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Reads a `u32`.
    pub fn read_u32(&mut self) -> Result<u32, CacheError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a `u32` length prefix followed by that many bytes.
    pub fn read_sized(&mut self) -> Result<&'a [u8], CacheError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }
}
