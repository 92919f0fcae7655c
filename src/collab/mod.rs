//! External collaborators consumed by the engines.
//!
//! The core never owns products, users or message transport. It talks to
//! them through [`Catalog`], [`UserDirectory`] and [`Notifier`]. The
//! [`memory`] module provides record-store backed implementations used by
//! tests, benches and single-node deployments.

use crate::error::Result;
use crate::otp::Purpose;
use crate::record::Record;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod memory;

pub use memory::{LogNotifier, RecordingNotifier, SentMessage, StoreCatalog, StoreDirectory};

/// Notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog view of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub store_id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub stock: u32,
    pub available: bool,
    /// Preparation time; engines fall back to a configured default when absent.
    pub prep_minutes: Option<u32>,
}

impl Record for Product {
    type Key = String;

    fn record_key(&self) -> Self::Key {
        self.id.clone()
    }

    fn record_prefix() -> &'static str {
        "product"
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Store,
    Courier,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Store => "store",
            Role::Courier => "courier",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative approval of a non-customer account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// Directory view of a user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub role: Role,
    pub approval: ApprovalState,
    pub active: bool,
}

impl Record for UserRecord {
    type Key = String;

    fn record_key(&self) -> Self::Key {
        self.id.clone()
    }

    fn record_prefix() -> &'static str {
        "user"
    }
}

/// Payload handed to a [`Notifier`] when a code is issued.
///
/// Wording and templates are the notifier's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMessage {
    pub code: String,
    pub purpose: Purpose,
    pub expires_at: DateTime<Utc>,
}

/// Product price and stock.
///
/// `decrement_stock` must be atomic: either the full quantity is taken
/// from available stock or nothing changes.
#[allow(async_fn_in_trait)]
pub trait Catalog: Send + Sync {
    /// # Errors
    /// Returns `Err` if the catalog is unreachable.
    async fn get_product(&self, id: &str) -> Result<Option<Product>>;

    /// Take `quantity` units and return the product as of the decrement.
    ///
    /// # Errors
    /// - `Error::NotFound`: unknown product
    /// - `Error::InsufficientStock`: not enough stock, or product unavailable
    async fn decrement_stock(&self, id: &str, quantity: u32) -> Result<Product>;

    /// Return `quantity` units to stock.
    ///
    /// # Errors
    /// - `Error::NotFound`: unknown product
    async fn increment_stock(&self, id: &str, quantity: u32) -> Result<()>;
}

/// Read access to user accounts. Never cached by the engines.
#[allow(async_fn_in_trait)]
pub trait UserDirectory: Send + Sync {
    /// # Errors
    /// Returns `Err` if the directory is unreachable.
    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>>;
}

/// Single-shot message transport.
///
/// The core never retries; each call is recorded as success or failure.
#[allow(async_fn_in_trait)]
pub trait Notifier: Send + Sync {
    /// # Errors
    /// Any `Err` counts as a failed delivery on `channel`.
    async fn send(&self, channel: Channel, address: &str, message: &VerificationMessage)
        -> Result<()>;
}
