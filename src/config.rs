//! Engine configuration.
//!
//! Every struct has production defaults, `with_*` builder overrides and a
//! `from_env()` constructor reading `DELIVERY_*` variables. Unset variables
//! keep the default; unparsable ones are a [`Error::ConfigError`].

use crate::error::{Error, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::ConfigError(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Storage access settings shared by every record store.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Compare-and-swap retries before an update gives up with `Error::Contention`.
    pub max_cas_retries: u32,

    /// Base delay between retries, doubled per attempt (zero = just yield).
    pub retry_backoff: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_cas_retries: 32,
            retry_backoff: Duration::from_millis(1),
        }
    }
}

impl StoreConfig {
    pub fn with_max_cas_retries(mut self, retries: u32) -> Self {
        self.max_cas_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Read `DELIVERY_CAS_MAX_RETRIES` and `DELIVERY_CAS_BACKOFF_MS`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(retries) = env_parse::<u32>("DELIVERY_CAS_MAX_RETRIES")? {
            config.max_cas_retries = retries;
        }
        if let Some(ms) = env_parse::<u64>("DELIVERY_CAS_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Order lifecycle settings.
#[derive(Clone, Debug)]
pub struct OrderConfig {
    /// Prefix of human-readable order numbers (`YEGA-000001`).
    pub order_number_prefix: String,

    /// Zero-padding width of the numeric part.
    pub order_number_width: usize,

    /// Subtotal at or above which shipping is free.
    pub free_shipping_threshold: Decimal,

    /// Shipping fee below the threshold.
    pub flat_shipping_fee: Decimal,

    /// Lower bound for the preparation+delivery estimate.
    pub min_eta_minutes: u32,

    /// Fixed delivery time added on top of preparation.
    pub delivery_buffer_minutes: u32,

    /// Preparation time assumed for products that declare none.
    pub default_prep_minutes: u32,

    /// Maximum length of order notes and rating comments, in characters.
    pub max_text_len: usize,

    /// When true, a successful claim also moves the order to `en_route`.
    pub claim_advances_state: bool,
}

impl Default for OrderConfig {
    fn default() -> Self {
        OrderConfig {
            order_number_prefix: "YEGA".to_string(),
            order_number_width: 6,
            free_shipping_threshold: Decimal::from(50),
            flat_shipping_fee: Decimal::from(5),
            min_eta_minutes: 30,
            delivery_buffer_minutes: 15,
            default_prep_minutes: 15,
            max_text_len: 500,
            claim_advances_state: false,
        }
    }
}

impl OrderConfig {
    pub fn with_order_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.order_number_prefix = prefix.into();
        self
    }

    pub fn with_shipping(mut self, free_threshold: Decimal, flat_fee: Decimal) -> Self {
        self.free_shipping_threshold = free_threshold;
        self.flat_shipping_fee = flat_fee;
        self
    }

    pub fn with_claim_advances_state(mut self, advance: bool) -> Self {
        self.claim_advances_state = advance;
        self
    }

    /// Read `DELIVERY_ORDER_PREFIX`, `DELIVERY_FREE_SHIPPING_THRESHOLD`,
    /// `DELIVERY_FLAT_SHIPPING_FEE` and `DELIVERY_CLAIM_ADVANCES_STATE`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(prefix) = std::env::var("DELIVERY_ORDER_PREFIX") {
            if prefix.trim().is_empty() {
                return Err(Error::ConfigError(
                    "DELIVERY_ORDER_PREFIX must not be empty".to_string(),
                ));
            }
            config.order_number_prefix = prefix.trim().to_string();
        }
        if let Some(threshold) = env_parse::<Decimal>("DELIVERY_FREE_SHIPPING_THRESHOLD")? {
            config.free_shipping_threshold = threshold;
        }
        if let Some(fee) = env_parse::<Decimal>("DELIVERY_FLAT_SHIPPING_FEE")? {
            config.flat_shipping_fee = fee;
        }
        if let Some(advance) = env_parse::<bool>("DELIVERY_CLAIM_ADVANCES_STATE")? {
            config.claim_advances_state = advance;
        }
        Ok(config)
    }
}

/// One-time-code settings.
#[derive(Clone, Debug)]
pub struct OtpConfig {
    /// Lifetime of an issued code.
    pub code_ttl: Duration,

    /// Verification attempts accepted per code.
    pub max_attempts: u32,

    /// Issuances allowed per subject and purpose inside `rate_window`.
    pub max_issuances_per_window: usize,

    /// Length of the sliding issuance window.
    pub rate_window: Duration,

    /// Minimum interval between a resend and the previous issuance.
    pub resend_interval: Duration,

    /// Storage-level expiry for code records (None = purge only via cleanup).
    pub record_ttl: Option<Duration>,
}

impl Default for OtpConfig {
    fn default() -> Self {
        OtpConfig {
            code_ttl: Duration::from_secs(10 * 60),
            max_attempts: 5,
            max_issuances_per_window: 5,
            rate_window: Duration::from_secs(60 * 60),
            resend_interval: Duration::from_secs(60),
            record_ttl: None,
        }
    }
}

impl OtpConfig {
    pub fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl = ttl;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_rate_limit(mut self, max_issuances: usize, window: Duration) -> Self {
        self.max_issuances_per_window = max_issuances;
        self.rate_window = window;
        self
    }

    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = Some(ttl);
        self
    }

    /// Read `DELIVERY_OTP_TTL_SECS`, `DELIVERY_OTP_MAX_ATTEMPTS`,
    /// `DELIVERY_OTP_MAX_PER_WINDOW`, `DELIVERY_OTP_WINDOW_SECS`,
    /// `DELIVERY_OTP_RESEND_SECS` and `DELIVERY_OTP_RECORD_TTL_SECS`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("DELIVERY_OTP_TTL_SECS")? {
            config.code_ttl = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>("DELIVERY_OTP_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(max) = env_parse::<usize>("DELIVERY_OTP_MAX_PER_WINDOW")? {
            config.max_issuances_per_window = max;
        }
        if let Some(secs) = env_parse::<u64>("DELIVERY_OTP_WINDOW_SECS")? {
            config.rate_window = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("DELIVERY_OTP_RESEND_SECS")? {
            config.resend_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("DELIVERY_OTP_RECORD_TTL_SECS")? {
            config.record_ttl = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }
}
