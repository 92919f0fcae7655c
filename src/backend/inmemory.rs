//! In-memory storage backend (default, thread-safe, async).
//!
//! Uses DashMap for concurrent access with per-key sharding. Conditional
//! writes go through the entry API, which holds the shard write lock for
//! the whole read-compare-write, so they are atomic with respect to every
//! other operation on the same key.

use super::StoreBackend;
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// In-memory entry with optional expiration.
struct StoredEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        StoredEntry { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// Thread-safe async in-memory storage backend.
///
/// Clones share the same underlying map, so one backend can be handed to
/// several engines and collaborators.
///
/// # Example
///
/// ```no_run
/// use delivery_kit::backend::{InMemoryBackend, StoreBackend};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("key1", b"value".to_vec(), None).await?;
///
///     // Only one of two racing writers observing the same value wins.
///     let won = backend
///         .compare_and_swap("key1", Some(b"value"), Some(b"next".to_vec()))
///         .await?;
///     assert!(won);
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, StoredEntry>>,
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                debug!("InMemory GET {} -> HIT", key);
                return Ok(Some(entry.data.clone()));
            }
        }

        // Drop the entry only if it is still the expired one.
        self.store.remove_if(key, |_, entry| entry.is_expired());
        debug!("InMemory GET {} -> MISS", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.store
            .insert(key.to_string(), StoredEntry::new(value, ttl));
        debug!("InMemory SET {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        debug!("InMemory DELETE {}", key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool> {
        let swapped = match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = !occupied.get().is_expired();
                let matches = if live {
                    Some(occupied.get().data.as_slice()) == expected
                } else {
                    expected.is_none()
                };

                if !matches {
                    false
                } else {
                    match new {
                        Some(data) if live => {
                            occupied.get_mut().data = data;
                        }
                        Some(data) => {
                            // Expired slot reused as a fresh insert.
                            occupied.insert(StoredEntry::new(data, None));
                        }
                        None => {
                            occupied.remove();
                        }
                    }
                    true
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    false
                } else {
                    if let Some(data) = new {
                        vacant.insert(StoredEntry::new(data, None));
                    }
                    true
                }
            }
        };

        debug!("InMemory CAS {} -> {}", key, if swapped { "OK" } else { "STALE" });
        Ok(swapped)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry::new(0i64.to_le_bytes().to_vec(), None));

        let current: [u8; 8] = entry.data.as_slice().try_into().map_err(|_| {
            Error::BackendError(format!("Key {} does not hold a counter", key))
        })?;
        let next = i64::from_le_bytes(current) + delta;
        entry.data = next.to_le_bytes().to_vec();

        debug!("InMemory INCR {} -> {}", key, next);
        Ok(next)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let results: Vec<(String, Vec<u8>)> = self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.is_expired())
            .map(|entry| (entry.key().clone(), entry.data.clone()))
            .collect();

        debug!("InMemory SCAN {}* -> {} keys", prefix, results.len());
        Ok(results)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Some(entry) = self.store.get(key) {
            return Ok(!entry.is_expired());
        }

        Ok(false)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
