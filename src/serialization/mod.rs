//! Postcard-based record serialization with versioned envelopes.
//!
//! Every stored record follows this format:
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (4 bytes)│POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "DLVK"              u32                postcard::to_allocvec(T)
//! ```
//!
//! Encoding is deterministic: the same value always produces identical
//! bytes. Conditional writes rely on this, because a backend compares the
//! stored bytes against the bytes the caller read.
//!
//! # Example
//!
//! ```rust
//! use delivery_kit::serialization::{decode_record, encode_record};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Counter {
//!     id: u64,
//!     hits: u32,
//! }
//!
//! # fn main() -> delivery_kit::Result<()> {
//! let counter = Counter { id: 1, hits: 3 };
//! let bytes = encode_record(&counter)?;
//! let decoded: Counter = decode_record(&bytes)?;
//! assert_eq!(counter, decoded);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header for delivery-kit records: b"DLVK"
pub const RECORD_MAGIC: [u8; 4] = *b"DLVK";

/// Current schema version.
///
/// Increment when a stored type changes shape (fields added, removed,
/// reordered or retyped; enum variants changed).
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope around every stored record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordEnvelope<T> {
    /// Magic header: must be b"DLVK"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The stored record
    pub payload: T,
}

impl<T> RecordEnvelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: RECORD_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize a value with envelope for storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = RecordEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        log::error!("Record serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a stored value with validation.
///
/// Checks, in order: the envelope decodes, the magic is b"DLVK", the
/// version matches [`CURRENT_SCHEMA_VERSION`].
///
/// # Errors
///
/// - `Error::DeserializationError`: Corrupted Postcard payload
/// - `Error::InvalidRecord`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
pub fn decode_record<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: RecordEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        log::error!("Record deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != RECORD_MAGIC {
        log::warn!(
            "Invalid record: expected magic {:?}, got {:?}",
            RECORD_MAGIC,
            envelope.magic
        );
        return Err(Error::InvalidRecord(format!(
            "Invalid magic: expected {:?}, got {:?}",
            RECORD_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        log::warn!(
            "Record version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION,
            envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}
