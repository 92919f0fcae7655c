//! Order records and request types.

use crate::collab::Role;
use crate::error::{Error, Result};
use crate::record::Record;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    EnRoute,
    Delivered,
    Cancelled,
}

impl OrderState {
    /// Every state, in lifecycle order.
    pub const ALL: [OrderState; 7] = [
        OrderState::Pending,
        OrderState::Confirmed,
        OrderState::Preparing,
        OrderState::Ready,
        OrderState::EnRoute,
        OrderState::Delivered,
        OrderState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Confirmed => "confirmed",
            OrderState::Preparing => "preparing",
            OrderState::Ready => "ready",
            OrderState::EnRoute => "en_route",
            OrderState::Delivered => "delivered",
            OrderState::Cancelled => "cancelled",
        }
    }

    /// Human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            OrderState::Pending => "Pending",
            OrderState::Confirmed => "Confirmed",
            OrderState::Preparing => "Preparing",
            OrderState::Ready => "Ready for pickup",
            OrderState::EnRoute => "On the way",
            OrderState::Delivered => "Delivered",
            OrderState::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Delivered | OrderState::Cancelled)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OrderState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::ValidationError(format!("Unknown order state '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

/// Delivery address. Street, number and city are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub number: String,
    pub city: String,
    pub postal_code: Option<String>,
    pub references: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ShippingAddress {
    pub fn new(
        street: impl Into<String>,
        number: impl Into<String>,
        city: impl Into<String>,
    ) -> Self {
        ShippingAddress {
            street: street.into(),
            number: number.into(),
            city: city.into(),
            postal_code: None,
            references: None,
            latitude: None,
            longitude: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("street", &self.street),
            ("number", &self.number),
            ("city", &self.city),
        ] {
            if value.trim().is_empty() {
                return Err(Error::ValidationError(format!(
                    "Shipping address {} is required",
                    field
                )));
            }
        }
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(Error::ValidationError(format!("Invalid latitude {}", lat)));
            }
        }
        if let Some(lng) = self.longitude {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(Error::ValidationError(format!("Invalid longitude {}", lng)));
            }
        }
        Ok(())
    }
}

/// One line of an order. Price and subtotal are frozen at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub line_subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub score: u8,
    pub comment: Option<String>,
    pub rated_at: DateTime<Utc>,
}

/// One purchase, keyed by its order number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_number: String,
    pub customer_id: String,
    pub store_id: String,
    pub courier_id: Option<String>,
    pub items: Vec<LineItem>,
    #[serde(with = "rust_decimal::serde::str")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub shipping_cost: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub address: ShippingAddress,
    pub note: Option<String>,
    pub state: OrderState,
    pub eta_minutes: u32,
    pub estimated_delivery_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub rating: Option<Rating>,
}

impl Record for Order {
    type Key = String;

    fn record_key(&self) -> Self::Key {
        self.order_number.clone()
    }

    fn record_prefix() -> &'static str {
        "order"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: String,
    pub quantity: u32,
}

/// Input to [`OrderEngine::checkout`](super::OrderEngine::checkout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub items: Vec<CheckoutItem>,
    pub address: Option<ShippingAddress>,
    pub payment_method: Option<PaymentMethod>,
    pub note: Option<String>,
}

impl CheckoutRequest {
    pub fn new(customer_id: impl Into<String>) -> Self {
        CheckoutRequest {
            customer_id: customer_id.into(),
            items: Vec::new(),
            address: None,
            payment_method: None,
            note: None,
        }
    }

    pub fn item(mut self, product_id: impl Into<String>, quantity: u32) -> Self {
        self.items.push(CheckoutItem {
            product_id: product_id.into(),
            quantity,
        });
        self
    }

    pub fn ship_to(mut self, address: ShippingAddress) -> Self {
        self.address = Some(address);
        self
    }

    pub fn pay_with(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Authenticated caller, as resolved by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Actor {
            id: id.into(),
            role,
        }
    }

    /// Whether this actor may see `order`.
    ///
    /// Couriers also see unassigned orders that are ready for pickup.
    pub fn can_view(&self, order: &Order) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Customer => order.customer_id == self.id,
            Role::Store => order.store_id == self.id,
            Role::Courier => match &order.courier_id {
                Some(courier) => *courier == self.id,
                None => order.state == OrderState::Ready,
            },
        }
    }
}

/// Criteria for [`OrderEngine::find_orders`](super::OrderEngine::find_orders). Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub customer_id: Option<String>,
    pub store_id: Option<String>,
    pub courier_id: Option<String>,
    pub state: Option<OrderState>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn customer(id: impl Into<String>) -> Self {
        OrderFilter {
            customer_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn store(id: impl Into<String>) -> Self {
        OrderFilter {
            store_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn courier(id: impl Into<String>) -> Self {
        OrderFilter {
            courier_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: OrderState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }

        eq(&self.customer_id, &order.customer_id)
            && eq(&self.store_id, &order.store_id)
            && self
                .courier_id
                .as_deref()
                .map_or(true, |c| order.courier_id.as_deref() == Some(c))
            && self.state.map_or(true, |s| order.state == s)
            && self.created_after.map_or(true, |t| order.created_at >= t)
            && self.created_before.map_or(true, |t| order.created_at < t)
    }
}
