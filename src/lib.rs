//! # delivery-kit
//!
//! Order lifecycle and one-time-code verification for delivery platforms,
//! built on atomic conditional writes.
//!
//! ## Features
//!
//! - **Order state machine:** one transition table, role permissions as data
//! - **Exclusive courier claim:** compare-and-swap, exactly one winner
//! - **No oversell:** per-line atomic stock decrement with compensation
//! - **Verification codes:** single use, attempt-limited, sliding-window rate limit
//! - **Backend Agnostic:** in-memory and Redis backends behind one trait
//! - **No in-process locks:** every invariant holds across processes
//!
//! ## Quick Start
//!
//! ```ignore
//! use delivery_kit::backend::InMemoryBackend;
//! use delivery_kit::collab::{RecordingNotifier, StoreCatalog, StoreDirectory};
//! use delivery_kit::orders::{CheckoutRequest, OrderEngine, PaymentMethod, ShippingAddress};
//! use delivery_kit::otp::{IssueRequest, OtpService, Purpose};
//!
//! let backend = InMemoryBackend::new();
//!
//! // Orders
//! let engine = OrderEngine::new(
//!     backend.clone(),
//!     StoreCatalog::new(backend.clone()),
//!     StoreDirectory::new(backend.clone()),
//! );
//! let order = engine
//!     .checkout(
//!         CheckoutRequest::new("customer-1")
//!             .item("taco", 2)
//!             .ship_to(ShippingAddress::new("Main", "12", "Quito"))
//!             .pay_with(PaymentMethod::Card),
//!     )
//!     .await?;
//! engine.claim(&order.order_number, "courier-7").await?;
//!
//! // Verification codes
//! let otp = OtpService::new(backend, RecordingNotifier::new());
//! otp.issue(IssueRequest::new("+1000000000", Purpose::Registration)).await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod clock;
pub mod collab;
pub mod config;
pub mod error;
pub mod key;
pub mod observability;
pub mod orders;
pub mod otp;
pub mod record;
pub mod serialization;
pub mod store;

// Re-exports for convenience
pub use backend::StoreBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OrderConfig, OtpConfig, StoreConfig};
pub use error::{Error, ErrorKind, Result};
pub use orders::{OrderEngine, OrderState, PermittedStates, RolePolicy};
pub use otp::{OtpService, Purpose};
pub use record::Record;
pub use store::RecordStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
