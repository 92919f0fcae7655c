//! Error types for the order and verification core.

use crate::collab::Channel;
use crate::orders::OrderState;
use std::fmt;
use std::time::Duration;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
///
/// The transport layer maps kinds to status semantics; the core only
/// guarantees that every rejection carries exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed input. Always recoverable by the caller.
    Validation,
    /// The caller's role or identity may not perform the action.
    AuthorizationDenied,
    /// A state or claim race was lost, or the record is in the wrong state.
    Conflict,
    /// A policy limit was hit (stock, rate limit, attempts).
    ResourceExhausted,
    /// A referenced order, code, product or user does not exist.
    NotFound,
    /// Every notification channel failed. Transient, environmental.
    DeliveryFailure,
    /// Storage or codec failure.
    Internal,
}

/// Error types for the core.
///
/// Every rejected operation returns one of these variants; nothing is
/// swallowed. Use [`Error::kind`] to classify.
#[derive(Debug, Clone)]
pub enum Error {
    /// Missing or malformed input.
    ValidationError(String),

    /// The acting role may not request this action.
    AuthorizationDenied(String),

    /// The requested state is not reachable from the current one.
    InvalidTransition {
        /// State the order was in.
        from: OrderState,
        /// State that was requested.
        to: OrderState,
    },

    /// Another courier already holds the order.
    AlreadyClaimed {
        order_number: String,
    },

    /// The order is not in a claimable state.
    NotClaimable {
        order_number: String,
        state: OrderState,
    },

    /// Line items reference products from more than one store.
    CrossStoreOrder {
        product_id: String,
        expected_store: String,
        found_store: String,
    },

    /// The order reached a terminal state and can no longer change.
    OrderClosed {
        order_number: String,
        state: OrderState,
    },

    /// The order already carries a rating.
    AlreadyRated {
        order_number: String,
    },

    /// Stock could not cover the requested quantity, or the product is
    /// not available for sale (`available` is then 0).
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    /// Too many codes issued for the subject inside the sliding window.
    RateLimited {
        /// Time until the oldest issuance leaves the window.
        retry_after: Duration,
    },

    /// Resend requested before the minimum interval elapsed.
    TooSoon {
        retry_after: Duration,
    },

    /// The code has used up its verification attempts.
    AttemptsExhausted,

    /// The supplied code did not match.
    IncorrectCode {
        remaining_attempts: u32,
    },

    /// No live code exists for the subject and purpose.
    NotFoundOrExpired,

    /// A referenced entity does not exist.
    NotFound(String),

    /// Rating requested on an order that has not been delivered.
    NotDeliverable {
        order_number: String,
        state: OrderState,
    },

    /// The caller does not own the order.
    NotOwner,

    /// The courier failed role, approval or activity checks.
    InvalidCourier(String),

    /// Every requested delivery channel failed.
    DeliveryFailed {
        channels: Vec<Channel>,
    },

    /// Compare-and-swap retries were exhausted under contention.
    Contention {
        key: String,
    },

    /// A record could not be encoded.
    SerializationError(String),

    /// A stored record could not be decoded.
    DeserializationError(String),

    /// Stored bytes are not a delivery-kit envelope.
    InvalidRecord(String),

    /// Stored record was written with a different schema version.
    VersionMismatch {
        expected: u32,
        found: u32,
    },

    /// Storage backend failure.
    BackendError(String),

    /// Invalid configuration.
    ConfigError(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ValidationError(_) | Error::IncorrectCode { .. } | Error::InvalidCourier(_) => {
                ErrorKind::Validation
            }
            Error::AuthorizationDenied(_) | Error::NotOwner => ErrorKind::AuthorizationDenied,
            Error::InvalidTransition { .. }
            | Error::AlreadyClaimed { .. }
            | Error::NotClaimable { .. }
            | Error::CrossStoreOrder { .. }
            | Error::OrderClosed { .. }
            | Error::AlreadyRated { .. }
            | Error::NotDeliverable { .. }
            | Error::Contention { .. } => ErrorKind::Conflict,
            Error::InsufficientStock { .. }
            | Error::RateLimited { .. }
            | Error::TooSoon { .. }
            | Error::AttemptsExhausted => ErrorKind::ResourceExhausted,
            Error::NotFound(_) | Error::NotFoundOrExpired => ErrorKind::NotFound,
            Error::DeliveryFailed { .. } => ErrorKind::DeliveryFailure,
            Error::SerializationError(_)
            | Error::DeserializationError(_)
            | Error::InvalidRecord(_)
            | Error::VersionMismatch { .. }
            | Error::BackendError(_)
            | Error::ConfigError(_) => ErrorKind::Internal,
        }
    }

    /// True for outcomes that are part of normal operation and must not be
    /// reported as faults.
    pub fn is_expected(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Internal | ErrorKind::DeliveryFailure)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::AuthorizationDenied(msg) => write!(f, "Authorization denied: {}", msg),
            Error::InvalidTransition { from, to } => {
                write!(f, "Invalid state transition: {} -> {}", from, to)
            }
            Error::AlreadyClaimed { order_number } => {
                write!(f, "Order {} already has a courier", order_number)
            }
            Error::NotClaimable {
                order_number,
                state,
            } => write!(
                f,
                "Order {} cannot be claimed in state {}",
                order_number, state
            ),
            Error::CrossStoreOrder {
                product_id,
                expected_store,
                found_store,
            } => write!(
                f,
                "Product {} belongs to store {}, order is for store {}",
                product_id, found_store, expected_store
            ),
            Error::OrderClosed {
                order_number,
                state,
            } => write!(f, "Order {} is closed ({})", order_number, state),
            Error::AlreadyRated { order_number } => {
                write!(f, "Order {} has already been rated", order_number)
            }
            Error::InsufficientStock {
                product_id,
                requested,
                available,
            } => write!(
                f,
                "Insufficient stock for {}: requested {}, available {}",
                product_id, requested, available
            ),
            Error::RateLimited { retry_after } => write!(
                f,
                "Issuance limit reached, retry in {}s",
                retry_after.as_secs()
            ),
            Error::TooSoon { retry_after } => write!(
                f,
                "Resend requested too soon, retry in {}s",
                retry_after.as_secs()
            ),
            Error::AttemptsExhausted => write!(f, "Maximum verification attempts reached"),
            Error::IncorrectCode { remaining_attempts } => write!(
                f,
                "Incorrect code, {} attempts remaining",
                remaining_attempts
            ),
            Error::NotFoundOrExpired => write!(f, "Verification code not found or expired"),
            Error::NotFound(what) => write!(f, "Not found: {}", what),
            Error::NotDeliverable {
                order_number,
                state,
            } => write!(
                f,
                "Order {} is {}, only delivered orders can be rated",
                order_number, state
            ),
            Error::NotOwner => write!(f, "Caller does not own this order"),
            Error::InvalidCourier(msg) => write!(f, "Invalid courier: {}", msg),
            Error::DeliveryFailed { channels } => {
                let names: Vec<&str> = channels.iter().map(|c| c.as_str()).collect();
                write!(f, "Delivery failed on every channel ({})", names.join(", "))
            }
            Error::Contention { key } => write!(f, "Too much contention on {}", key),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            Error::VersionMismatch { expected, found } => write!(
                f,
                "Record version mismatch: expected {}, found {}",
                expected, found
            ),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("Redis error: {}", e))
    }
}
