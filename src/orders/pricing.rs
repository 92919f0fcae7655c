//! Totals, shipping and delivery estimate.

use super::model::LineItem;
use crate::config::OrderConfig;
use rust_decimal::Decimal;

/// Shipping cost as a function of the order subtotal.
pub trait ShippingPolicy: Send + Sync {
    fn shipping_cost(&self, subtotal: Decimal) -> Decimal;
}

/// Free at or above a threshold, flat fee below it.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRateShipping {
    pub free_threshold: Decimal,
    pub flat_fee: Decimal,
}

impl FlatRateShipping {
    pub fn from_config(config: &OrderConfig) -> Self {
        FlatRateShipping {
            free_threshold: config.free_shipping_threshold,
            flat_fee: config.flat_shipping_fee,
        }
    }
}

impl Default for FlatRateShipping {
    fn default() -> Self {
        Self::from_config(&OrderConfig::default())
    }
}

impl ShippingPolicy for FlatRateShipping {
    fn shipping_cost(&self, subtotal: Decimal) -> Decimal {
        if subtotal >= self.free_threshold {
            Decimal::ZERO
        } else {
            self.flat_fee
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

pub fn totals(items: &[LineItem], shipping: &dyn ShippingPolicy) -> Totals {
    let subtotal: Decimal = items.iter().map(|item| item.line_subtotal).sum();
    let shipping_cost = shipping.shipping_cost(subtotal);
    Totals {
        subtotal,
        shipping_cost,
        total: subtotal + shipping_cost,
    }
}

pub fn line_subtotal(quantity: u32, unit_price: Decimal) -> Decimal {
    Decimal::from(quantity) * unit_price
}

/// Minutes until delivery: per-line preparation plus the delivery buffer,
/// never below the configured floor. `None` preparation uses the default.
pub fn eta_minutes<I>(prep_minutes: I, config: &OrderConfig) -> u32
where
    I: IntoIterator<Item = Option<u32>>,
{
    let prep: u32 = prep_minutes
        .into_iter()
        .map(|m| m.unwrap_or(config.default_prep_minutes))
        .fold(0u32, u32::saturating_add);
    prep.saturating_add(config.delivery_buffer_minutes)
        .max(config.min_eta_minutes)
}
