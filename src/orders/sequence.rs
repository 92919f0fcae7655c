//! Human-readable order numbers from an atomic counter.

use crate::backend::StoreBackend;
use crate::error::{Error, Result};
use crate::key::KeyBuilder;

/// Hands out `PREFIX-000001`, `PREFIX-000002`, ...
///
/// The counter lives in the backend and is advanced with an atomic
/// increment, so numbers are never reused across processes.
#[derive(Clone)]
pub struct OrderSequence<B: StoreBackend> {
    backend: B,
    key: String,
    prefix: String,
    width: usize,
}

impl<B: StoreBackend> OrderSequence<B> {
    pub fn new(backend: B, prefix: impl Into<String>, width: usize) -> Self {
        let prefix = prefix.into();
        OrderSequence {
            key: KeyBuilder::build_with_prefix("counter", &format!("order_number:{}", prefix)),
            backend,
            prefix,
            width,
        }
    }

    /// Draw the next order number.
    ///
    /// # Errors
    /// Returns `Err` if the backend counter cannot be advanced.
    pub async fn next(&self) -> Result<String> {
        let n = self.backend.incr(&self.key, 1).await?;
        if n <= 0 {
            return Err(Error::BackendError(format!(
                "order counter {} returned {}",
                self.key, n
            )));
        }
        Ok(format_order_number(&self.prefix, self.width, n as u64))
    }
}

pub fn format_order_number(prefix: &str, width: usize, n: u64) -> String {
    format!("{}-{:0width$}", prefix, n, width = width)
}
