//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Most cache operations are fail-safe: a rejected blob leaves the cache
/// untouched and a corrupt disk record is a miss. Only a failed upload is
/// surfaced to the caller as an error.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing disk cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The code uploader could not reserve backing storage.
    #[error("code uploader exhausted: requested {requested} bytes with {limit} byte limit")]
    OutOfMemory {
        /// Bytes requested by the failed allocation.
        requested: usize,
        /// The configured limit.
        limit: usize,
    },

    /// A blob or record header is structurally invalid.
    #[error("invalid cache header: {reason}")]
    InvalidHeader {
        /// Description of the header problem.
        reason: String,
    },

    /// A header field does not match the running device.
    #[error("cache header {field} mismatch: expected {expected}, got {actual}")]
    HeaderMismatch {
        /// Name of the mismatched field.
        field: &'static str,
        /// Value expected by the runtime.
        expected: String,
        /// Value found in the blob.
        actual: String,
    },

    /// A read ran past the end of the input.
    #[error("truncated cache data: needed {needed} bytes at offset {offset}")]
    Truncated {
        /// Offset at which the read was attempted.
        offset: usize,
        /// Number of bytes the read required.
        needed: usize,
    },

    /// A key or metadata table could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A persisted key names a stage this build does not know.
    #[error("unknown cache stage id {0}")]
    UnknownStage(u32),
}
