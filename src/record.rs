//! Core trait implemented by every persisted record.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::hash::Hash;

/// Trait that all records kept in a [`StoreBackend`](crate::backend::StoreBackend) implement.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use delivery_kit::Record;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// pub struct Courier {
///     pub id: String,
///     pub name: String,
/// }
///
/// impl Record for Courier {
///     type Key = String;
///
///     fn record_key(&self) -> Self::Key {
///         self.id.clone()
///     }
///
///     fn record_prefix() -> &'static str {
///         "courier"
///     }
/// }
/// ```
pub trait Record: Send + Sync + Serialize + DeserializeOwned + Clone {
    /// Type of the record's key.
    type Key: Display + Clone + Send + Sync + Eq + Hash + 'static;

    /// Return the record's unique key within its prefix.
    fn record_key(&self) -> Self::Key;

    /// Namespace for this record type.
    ///
    /// Final storage key format: `"{prefix}:{key}"`
    fn record_prefix() -> &'static str;

    /// Encode the record for storage.
    ///
    /// Always goes through the versioned envelope in [`crate::serialization`],
    /// so equal records produce equal bytes.
    fn encode(&self) -> Result<Vec<u8>> {
        crate::serialization::encode_record(self)
    }

    /// Decode a stored record, validating magic and schema version.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidRecord`: Bad magic
    /// - `Error::VersionMismatch`: Schema version changed
    /// - `Error::DeserializationError`: Corrupted payload
    fn decode(bytes: &[u8]) -> Result<Self> {
        crate::serialization::decode_record(bytes)
    }

    /// Optional: Validate record after decoding.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Serialize, Deserialize)]
    struct TestRecord {
        id: String,
        value: String,
    }

    impl Record for TestRecord {
        type Key = String;

        fn record_key(&self) -> Self::Key {
            self.id.clone()
        }

        fn record_prefix() -> &'static str {
            "test"
        }
    }

    #[test]
    fn test_encode_decode() {
        let record = TestRecord {
            id: "test_1".to_string(),
            value: "data".to_string(),
        };

        let bytes = record.encode().expect("encode");
        let decoded = TestRecord::decode(&bytes).expect("decode");

        assert_eq!(record.id, decoded.id);
        assert_eq!(record.value, decoded.value);
    }

    #[test]
    fn test_record_key() {
        let record = TestRecord {
            id: "record_123".to_string(),
            value: "test".to_string(),
        };

        assert_eq!(record.record_key(), "record_123");
        assert_eq!(TestRecord::record_prefix(), "test");
    }
}
