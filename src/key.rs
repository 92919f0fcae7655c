//! Storage key management utilities.

use crate::record::Record;
use std::fmt::Display;

/// Builder for storage keys.
pub struct KeyBuilder;

impl KeyBuilder {
    /// Build full storage key from record type and key.
    pub fn build<T: Record>(id: &T::Key) -> String {
        format!("{}:{}", T::record_prefix(), id)
    }

    /// Build storage key with custom prefix.
    pub fn build_with_prefix(prefix: &str, id: &dyn Display) -> String {
        format!("{}:{}", prefix, id)
    }

    /// Build composite key from multiple parts.
    pub fn build_composite(parts: &[&str]) -> String {
        parts.join(":")
    }

    /// Scan prefix covering every record of type `T` whose key starts with `parts`.
    ///
    /// Always ends in `:` so that `+1000` never matches `+10000`.
    pub fn scan_prefix<T: Record>(parts: &[&str]) -> String {
        if parts.is_empty() {
            format!("{}:", T::record_prefix())
        } else {
            format!("{}:{}:", T::record_prefix(), parts.join(":"))
        }
    }
}
