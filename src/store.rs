//! Typed record access over a [`StoreBackend`].
//!
//! [`RecordStore`] is the only place that turns a read-modify-write into a
//! conditional write. `update` and `upsert` re-read the record, re-run the
//! caller's closure on the fresh value and compare-and-swap the result, so a
//! closure's checks always hold for the exact value that gets replaced.

use crate::backend::StoreBackend;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::key::KeyBuilder;
use crate::observability::{EngineMetrics, NoOpMetrics};
use crate::record::Record;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Typed view of one record type inside a backend.
pub struct RecordStore<T: Record, B: StoreBackend> {
    backend: B,
    config: StoreConfig,
    metrics: Arc<dyn EngineMetrics>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record, B: StoreBackend> Clone for RecordStore<T, B> {
    fn clone(&self) -> Self {
        RecordStore {
            backend: self.backend.clone(),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
            _marker: PhantomData,
        }
    }
}

impl<T: Record, B: StoreBackend> RecordStore<T, B> {
    pub fn new(backend: B) -> Self {
        RecordStore {
            backend,
            config: StoreConfig::default(),
            metrics: Arc::new(NoOpMetrics),
            _marker: PhantomData,
        }
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Full storage key for `id`.
    pub fn key(id: &T::Key) -> String {
        KeyBuilder::build::<T>(id)
    }

    fn decode(bytes: &[u8]) -> Result<T> {
        let record = T::decode(bytes)?;
        record.validate()?;
        Ok(record)
    }

    /// Load a record.
    ///
    /// # Errors
    /// Returns `Err` on backend failure or if the stored bytes do not decode.
    pub async fn get(&self, id: &T::Key) -> Result<Option<T>> {
        let key = Self::key(id);
        match self.backend.get(&key).await? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a record only if its key is free.
    ///
    /// # Returns
    /// - `Ok(true)` - the record was written
    /// - `Ok(false)` - a record with the same key already exists
    pub async fn insert(&self, record: &T) -> Result<bool> {
        let key = Self::key(&record.record_key());
        let bytes = record.encode()?;
        let inserted = self.backend.compare_and_swap(&key, None, Some(bytes)).await?;
        debug!("insert {} -> {}", key, inserted);
        Ok(inserted)
    }

    /// Store a record unconditionally.
    ///
    /// Only for records whose key nobody else can know yet (fresh random ids).
    pub async fn put(&self, record: &T, ttl: Option<Duration>) -> Result<()> {
        let key = Self::key(&record.record_key());
        let bytes = record.encode()?;
        self.backend.set(&key, bytes, ttl).await
    }

    pub async fn delete(&self, id: &T::Key) -> Result<()> {
        self.backend.delete(&Self::key(id)).await
    }

    /// Delete `record` only if the stored value still equals it.
    pub async fn delete_if_unchanged(&self, record: &T) -> Result<bool> {
        let key = Self::key(&record.record_key());
        let expected = record.encode()?;
        self.backend
            .compare_and_swap(&key, Some(&expected), None)
            .await
    }

    /// Atomically replace an existing record with `f(current)`.
    ///
    /// `f` may run several times; an `Err` from it aborts without writing.
    ///
    /// # Errors
    /// - `Error::NotFound`: no record under `id`
    /// - `Error::Contention`: retries exhausted
    /// - anything `f` returns
    pub async fn update<F>(&self, id: &T::Key, mut f: F) -> Result<T>
    where
        F: FnMut(T) -> Result<T>,
    {
        let key = Self::key(id);
        self.upsert(id, |current| match current {
            Some(record) => f(record),
            None => Err(Error::NotFound(key.clone())),
        })
        .await
    }

    /// Atomically create or replace the record under `id` with `f(current)`.
    ///
    /// `f` may run several times; an `Err` from it aborts without writing.
    /// Returning a value equal to the stored one skips the write.
    pub async fn upsert<F>(&self, id: &T::Key, mut f: F) -> Result<T>
    where
        F: FnMut(Option<T>) -> Result<T>,
    {
        let key = Self::key(id);
        let mut attempt = 0u32;

        loop {
            let stored = self.backend.get(&key).await?;
            let current = match &stored {
                Some(bytes) => Some(Self::decode(bytes)?),
                None => None,
            };

            let next = f(current)?;
            if next.record_key() != *id {
                return Err(Error::InvalidRecord(format!(
                    "update of {} produced a record keyed {}",
                    key,
                    next.record_key()
                )));
            }

            let encoded = next.encode()?;
            if stored.as_deref() == Some(encoded.as_slice()) {
                return Ok(next);
            }

            if self
                .backend
                .compare_and_swap(&key, stored.as_deref(), Some(encoded))
                .await?
            {
                return Ok(next);
            }

            attempt += 1;
            if attempt > self.config.max_cas_retries {
                warn!("Giving up on {} after {} CAS retries", key, attempt - 1);
                return Err(Error::Contention { key });
            }
            self.metrics.record_cas_retry(&key, attempt);
            self.backoff(attempt).await;
        }
    }

    async fn backoff(&self, attempt: u32) {
        if self.config.retry_backoff.is_zero() {
            tokio::task::yield_now().await;
        } else {
            let delay = self.config.retry_backoff * 2_u32.pow(attempt.min(6) - 1);
            tokio::time::sleep(delay).await;
        }
    }

    /// Every record of this type whose key starts with `parts`.
    ///
    /// Order is unspecified.
    pub async fn scan(&self, parts: &[&str]) -> Result<Vec<T>> {
        let prefix = KeyBuilder::scan_prefix::<T>(parts);
        let entries = self.backend.scan_prefix(&prefix).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (_key, bytes) in entries {
            records.push(Self::decode(&bytes)?);
        }
        Ok(records)
    }
}
