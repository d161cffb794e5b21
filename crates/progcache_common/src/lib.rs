//! Shared foundational types used across the progcache crates.
//!
//! This crate provides content hashing for integrity checks, fixed-width
//! cryptographic digests for the disk cache, and the device identity that
//! gates whether a persisted cache blob may be reused.

#![warn(missing_docs)]

pub mod digest;
pub mod hash;
pub mod identity;

pub use digest::Digest;
pub use hash::ContentHash;
pub use identity::{CacheUuid, DeviceIdentity, ParseUuidError};
