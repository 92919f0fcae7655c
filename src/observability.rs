//! Observability hooks for order and verification events.
//!
//! Implement [`EngineMetrics`] to feed engine activity into a monitoring
//! system:
//!
//! ```ignore
//! use delivery_kit::observability::EngineMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl EngineMetrics for PrometheusMetrics {
//!     fn record_checkout(&self, _order_number: &str, _duration: Duration) {
//!         // counter!("orders_created").inc();
//!     }
//!     // ... implement other methods
//! }
//!
//! // let engine = OrderEngine::new(backend, catalog, directory)
//! //     .with_metrics(Arc::new(PrometheusMetrics));
//! ```
//!
//! Every hook has a default body that logs through the `log` crate, which is
//! what [`LogMetrics`] uses. [`NoOpMetrics`] discards everything and is the
//! default for engines and stores.
//!
//! Lost races and policy rejections are reported at `debug!` level: they are
//! expected outcomes, not faults.

use std::time::Duration;

/// Trait for engine metrics collection.
pub trait EngineMetrics: Send + Sync {
    /// An order was created.
    fn record_checkout(&self, order_number: &str, duration: Duration) {
        debug!("Checkout {} took {:?}", order_number, duration);
    }

    /// An order changed state.
    fn record_transition(&self, order_number: &str, from: &str, to: &str) {
        debug!("Order {} moved {} -> {}", order_number, from, to);
    }

    /// A courier claim was attempted.
    fn record_claim(&self, order_number: &str, won: bool) {
        debug!(
            "Claim on {} {}",
            order_number,
            if won { "won" } else { "lost" }
        );
    }

    /// A verification code was issued.
    fn record_code_issued(&self, purpose: &str, channels: usize) {
        debug!("Code issued for {} over {} channel(s)", purpose, channels);
    }

    /// A verification attempt completed.
    fn record_verification(&self, purpose: &str, success: bool) {
        debug!(
            "Verification for {} {}",
            purpose,
            if success { "succeeded" } else { "failed" }
        );
    }

    /// A compare-and-swap lost a race and is being retried.
    fn record_cas_retry(&self, key: &str, attempt: u32) {
        debug!("CAS retry {} on {}", attempt, key);
    }

    /// An operation failed with an unexpected error.
    fn record_error(&self, operation: &str, error: &str) {
        warn!("{} failed: {}", operation, error);
    }
}

/// Metrics that only log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMetrics;

impl EngineMetrics for LogMetrics {}

/// Default metrics implementation (no-op).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMetrics;

impl EngineMetrics for NoOpMetrics {
    fn record_checkout(&self, _order_number: &str, _duration: Duration) {}
    fn record_transition(&self, _order_number: &str, _from: &str, _to: &str) {}
    fn record_claim(&self, _order_number: &str, _won: bool) {}
    fn record_code_issued(&self, _purpose: &str, _channels: usize) {}
    fn record_verification(&self, _purpose: &str, _success: bool) {}
    fn record_cas_retry(&self, _key: &str, _attempt: u32) {}
    fn record_error(&self, _operation: &str, _error: &str) {}
}
