//! Storage backend implementations.

use crate::error::Result;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, RedisConfig};

/// Trait for storage backend implementations.
///
/// Abstracts the persisted key/value space the engines run on. Every
/// cross-request invariant in the crate is enforced through
/// [`compare_and_swap`](StoreBackend::compare_and_swap) and
/// [`incr`](StoreBackend::incr), never through in-process locks, so any
/// backend that implements those two atomically is safe to share between
/// processes.
///
/// **IMPORTANT:** All methods use `&self` instead of `&mut self` to allow concurrent access.
/// Backend implementations should use interior mutability or external storage.
///
/// **ASYNC:** All methods are async and must be awaited.
#[allow(async_fn_in_trait)]
pub trait StoreBackend: Send + Sync + Clone {
    /// Retrieve value by key.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs (connection lost, etc.)
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store value unconditionally with optional TTL.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove value.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically replace the value at `key` if its current contents equal `expected`.
    ///
    /// - `expected = None` requires the key to be absent (insert-if-absent).
    /// - `new = None` deletes the key on success.
    ///
    /// An existing TTL on the key is preserved.
    ///
    /// # Returns
    /// - `Ok(true)` - the swap happened
    /// - `Ok(false)` - the current value did not match, nothing was written
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool>;

    /// Atomically add `delta` to the integer counter at `key` and return the new value.
    ///
    /// Missing counters start at zero.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs or the key holds a non-counter value
    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    /// Return every live key/value pair whose key starts with `prefix`.
    ///
    /// Order is unspecified.
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Check if key exists (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if backend error occurs
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Health check - verify backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if backend is not accessible
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
