//! Collaborator implementations on top of a [`StoreBackend`].

use super::{Catalog, Channel, Notifier, Product, UserDirectory, UserRecord, VerificationMessage};
use crate::backend::StoreBackend;
use crate::error::{Error, Result};
use crate::store::RecordStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Catalog whose products live in the same backend as the orders.
///
/// Stock changes go through compare-and-swap, so concurrent checkouts
/// against one product can never take more than is in stock.
#[derive(Clone)]
pub struct StoreCatalog<B: StoreBackend> {
    products: RecordStore<Product, B>,
}

impl<B: StoreBackend> StoreCatalog<B> {
    pub fn new(backend: B) -> Self {
        StoreCatalog {
            products: RecordStore::new(backend),
        }
    }

    /// Create or replace a product.
    pub async fn add_product(&self, product: &Product) -> Result<()> {
        self.products.put(product, None).await
    }
}

impl<B: StoreBackend> Catalog for StoreCatalog<B> {
    async fn get_product(&self, id: &str) -> Result<Option<Product>> {
        self.products.get(&id.to_string()).await
    }

    async fn decrement_stock(&self, id: &str, quantity: u32) -> Result<Product> {
        self.products
            .update(&id.to_string(), |mut product| {
                if !product.available {
                    return Err(Error::InsufficientStock {
                        product_id: product.id,
                        requested: quantity,
                        available: 0,
                    });
                }
                if product.stock < quantity {
                    return Err(Error::InsufficientStock {
                        product_id: product.id,
                        requested: quantity,
                        available: product.stock,
                    });
                }
                product.stock -= quantity;
                Ok(product)
            })
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("product {}", id)),
                other => other,
            })
    }

    async fn increment_stock(&self, id: &str, quantity: u32) -> Result<()> {
        self.products
            .update(&id.to_string(), |mut product| {
                product.stock = product.stock.saturating_add(quantity);
                Ok(product)
            })
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("product {}", id)),
                other => other,
            })?;
        Ok(())
    }
}

/// User directory backed by user records in the store.
#[derive(Clone)]
pub struct StoreDirectory<B: StoreBackend> {
    users: RecordStore<UserRecord, B>,
}

impl<B: StoreBackend> StoreDirectory<B> {
    pub fn new(backend: B) -> Self {
        StoreDirectory {
            users: RecordStore::new(backend),
        }
    }

    pub async fn add_user(&self, user: &UserRecord) -> Result<()> {
        self.users.put(user, None).await
    }
}

impl<B: StoreBackend> UserDirectory for StoreDirectory<B> {
    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        self.users.get(&id.to_string()).await
    }
}

/// One message accepted by a [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel: Channel,
    pub address: String,
    pub message: VerificationMessage,
}

/// Notifier that keeps every message in memory.
///
/// Channels can be switched off to simulate provider outages.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failing: Arc<Mutex<HashSet<Channel>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send on `channel` fail until [`heal_channel`](Self::heal_channel).
    pub fn fail_channel(&self, channel: Channel) {
        self.failing.lock().insert(channel);
    }

    pub fn heal_channel(&self, channel: Channel) {
        self.failing.lock().remove(&channel);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Code in the most recent message sent to `address`.
    pub fn last_code_to(&self, address: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|m| m.address == address)
            .map(|m| m.message.code.clone())
    }
}

impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        channel: Channel,
        address: &str,
        message: &VerificationMessage,
    ) -> Result<()> {
        if self.failing.lock().contains(&channel) {
            return Err(Error::BackendError(format!("{} provider unavailable", channel)));
        }
        self.sent.lock().push(SentMessage {
            channel,
            address: address.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}

/// Notifier that only writes a structured log line. The code itself is never logged.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(
        &self,
        channel: Channel,
        address: &str,
        message: &VerificationMessage,
    ) -> Result<()> {
        let line = serde_json::json!({
            "channel": channel,
            "to": address,
            "purpose": message.purpose,
            "expires_at": message.expires_at,
        });
        info!("notify {}", serde_json::to_string(&line)?);
        Ok(())
    }
}
