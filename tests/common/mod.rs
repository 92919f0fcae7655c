//! Shared fixtures for integration tests.

#![allow(dead_code)]

use delivery_kit::backend::InMemoryBackend;
use delivery_kit::collab::{
    ApprovalState, Catalog, Product, Role, StoreCatalog, StoreDirectory, UserRecord,
};
use delivery_kit::orders::{
    Actor, CheckoutRequest, OrderEngine, OrderState, PaymentMethod, ShippingAddress,
};
use delivery_kit::{ManualClock, PermittedStates};
use rust_decimal::Decimal;
use std::sync::Arc;

pub type Engine =
    OrderEngine<InMemoryBackend, StoreCatalog<InMemoryBackend>, StoreDirectory<InMemoryBackend>>;

pub const STORE: &str = "store-1";
pub const OTHER_STORE: &str = "store-2";
pub const CUSTOMER: &str = "customer-1";
pub const OTHER_CUSTOMER: &str = "customer-2";
pub const COURIER: &str = "courier-1";
pub const OTHER_COURIER: &str = "courier-2";
pub const PENDING_COURIER: &str = "courier-pending";
pub const INACTIVE_COURIER: &str = "courier-inactive";

pub struct Fixture {
    pub backend: InMemoryBackend,
    pub engine: Arc<Engine>,
    pub catalog: StoreCatalog<InMemoryBackend>,
    pub directory: StoreDirectory<InMemoryBackend>,
    pub clock: ManualClock,
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn product(
    id: &str,
    store_id: &str,
    price: Decimal,
    stock: u32,
    prep_minutes: Option<u32>,
) -> Product {
    Product {
        id: id.to_string(),
        store_id: store_id.to_string(),
        name: format!("Product {}", id),
        price,
        stock,
        available: true,
        prep_minutes,
    }
}

fn user(id: &str, role: Role, approval: ApprovalState, active: bool) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        role,
        approval,
        active,
    }
}

/// Catalog:
/// - `A` store-1, 10.00, stock 10, 10 min prep
/// - `B` store-1, 5.00, stock 10, no prep time
/// - `C` store-2, 7.00, stock 10
/// - `D` store-1, unavailable
/// - `E` store-1, 3.00, stock 1
pub async fn fixture() -> Fixture {
    init_logger();

    let backend = InMemoryBackend::new();
    let catalog = StoreCatalog::new(backend.clone());
    let directory = StoreDirectory::new(backend.clone());
    let clock = ManualClock::default();

    for p in [
        product("A", STORE, Decimal::from(10), 10, Some(10)),
        product("B", STORE, Decimal::from(5), 10, None),
        product("C", OTHER_STORE, Decimal::from(7), 10, Some(5)),
        Product {
            available: false,
            ..product("D", STORE, Decimal::from(4), 10, None)
        },
        product("E", STORE, Decimal::from(3), 1, None),
    ] {
        catalog.add_product(&p).await.expect("Failed to add product");
    }

    for u in [
        user(CUSTOMER, Role::Customer, ApprovalState::Approved, true),
        user(OTHER_CUSTOMER, Role::Customer, ApprovalState::Approved, true),
        user(COURIER, Role::Courier, ApprovalState::Approved, true),
        user(OTHER_COURIER, Role::Courier, ApprovalState::Approved, true),
        user(PENDING_COURIER, Role::Courier, ApprovalState::Pending, true),
        user(INACTIVE_COURIER, Role::Courier, ApprovalState::Approved, false),
    ] {
        directory.add_user(&u).await.expect("Failed to add user");
    }

    let engine = OrderEngine::new(backend.clone(), catalog.clone(), directory.clone())
        .with_clock(Arc::new(clock.clone()));

    Fixture {
        backend,
        engine: Arc::new(engine),
        catalog,
        directory,
        clock,
    }
}

pub fn address() -> ShippingAddress {
    ShippingAddress::new("Av. Amazonas", "N24-03", "Quito")
}

pub fn checkout(customer: &str, items: &[(&str, u32)]) -> CheckoutRequest {
    items.iter().fold(
        CheckoutRequest::new(customer)
            .ship_to(address())
            .pay_with(PaymentMethod::Cash),
        |request, (product_id, quantity)| request.item(*product_id, *quantity),
    )
}

pub async fn stock(catalog: &StoreCatalog<InMemoryBackend>, id: &str) -> u32 {
    catalog
        .get_product(id)
        .await
        .expect("Failed to read product")
        .expect("Product missing")
        .stock
}

/// Place a one-line order and walk it to `target` as admin.
pub async fn order_in_state(fx: &Fixture, target: OrderState) -> String {
    let order = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("A", 1)]))
        .await
        .expect("Checkout failed");

    let path: &[OrderState] = match target {
        OrderState::Pending => &[],
        OrderState::Confirmed => &[OrderState::Confirmed],
        OrderState::Preparing => &[OrderState::Confirmed, OrderState::Preparing],
        OrderState::Ready => &[
            OrderState::Confirmed,
            OrderState::Preparing,
            OrderState::Ready,
        ],
        OrderState::EnRoute => &[
            OrderState::Confirmed,
            OrderState::Preparing,
            OrderState::Ready,
            OrderState::EnRoute,
        ],
        OrderState::Delivered => &[
            OrderState::Confirmed,
            OrderState::Preparing,
            OrderState::Ready,
            OrderState::EnRoute,
            OrderState::Delivered,
        ],
        OrderState::Cancelled => &[OrderState::Cancelled],
    };

    for state in path {
        fx.engine
            .transition(&order.order_number, *state, &PermittedStates::Any)
            .await
            .expect("Admin transition failed");
    }
    order.order_number
}

pub fn store_actor() -> Actor {
    Actor::new(STORE, Role::Store)
}

pub fn courier_actor(id: &str) -> Actor {
    Actor::new(id, Role::Courier)
}
