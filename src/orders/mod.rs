//! Order lifecycle: checkout, state machine, courier assignment and rating.

pub mod engine;
pub mod model;
pub mod pricing;
pub mod sequence;
pub mod state_machine;

pub use engine::OrderEngine;
pub use model::{
    Actor, CheckoutItem, CheckoutRequest, LineItem, Order, OrderFilter, OrderState,
    PaymentMethod, Rating, ShippingAddress,
};
pub use pricing::{FlatRateShipping, ShippingPolicy, Totals};
pub use sequence::OrderSequence;
pub use state_machine::{PermittedStates, RolePolicy};
