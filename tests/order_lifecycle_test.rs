//! Integration tests for the order lifecycle engine.
//!
//! Runs against the in-memory backend with a manual clock:
//! - Checkout pricing, ETA, stock reservation and compensation
//! - State machine enforcement through roles and parties
//! - Courier claim and direct assignment
//! - Rating and queries

mod common;

use common::*;
use delivery_kit::collab::Role;
use delivery_kit::orders::{Actor, CheckoutRequest, OrderFilter, OrderState, PaymentMethod};
use delivery_kit::{Clock, Error, PermittedStates};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn test_checkout_prices_and_schedules_order() {
    let fx = fixture().await;

    let order = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("A", 2), ("B", 1)]).note("  ring twice  "))
        .await
        .expect("Checkout failed");

    assert_eq!(order.order_number, "YEGA-000001");
    assert_eq!(order.state, OrderState::Pending);
    assert_eq!(order.store_id, STORE);
    assert_eq!(order.customer_id, CUSTOMER);
    assert_eq!(order.courier_id, None);
    assert_eq!(order.subtotal, dec!(25));
    assert_eq!(order.shipping_cost, dec!(5));
    assert_eq!(order.total, dec!(30));
    assert_eq!(order.note.as_deref(), Some("ring twice"));

    // 10 min for A, default 15 for B, 15 min buffer
    assert_eq!(order.eta_minutes, 40);
    assert_eq!(
        order.estimated_delivery_at,
        order.created_at + chrono::Duration::minutes(40)
    );

    assert_eq!(order.items.len(), 2);
    assert_eq!(order.items[0].product_name, "Product A");
    assert_eq!(order.items[0].line_subtotal, dec!(20));
    assert_eq!(order.items[1].line_subtotal, dec!(5));

    assert_eq!(stock(&fx.catalog, "A").await, 8);
    assert_eq!(stock(&fx.catalog, "B").await, 9);

    let stored = fx
        .engine
        .get_order(&order.order_number)
        .await
        .expect("Failed to load order")
        .expect("Order missing");
    assert_eq!(stored, order);
}

#[tokio::test]
async fn test_order_numbers_are_sequential() {
    let fx = fixture().await;

    let first = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("B", 1)]))
        .await
        .expect("Checkout failed");
    let second = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("B", 1)]))
        .await
        .expect("Checkout failed");

    assert_eq!(first.order_number, "YEGA-000001");
    assert_eq!(second.order_number, "YEGA-000002");
}

#[tokio::test]
async fn test_free_shipping_at_threshold() {
    let fx = fixture().await;

    let order = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("A", 5)]))
        .await
        .expect("Checkout failed");

    assert_eq!(order.subtotal, dec!(50));
    assert_eq!(order.shipping_cost, Decimal::ZERO);
    assert_eq!(order.total, dec!(50));
}

#[tokio::test]
async fn test_minimum_eta_applies() {
    let fx = fixture().await;

    let order = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("E", 1)]))
        .await
        .expect("Checkout failed");

    // 15 default prep + 15 buffer
    assert_eq!(order.eta_minutes, 30);
}

#[tokio::test]
async fn test_prices_are_frozen_at_checkout() {
    let fx = fixture().await;

    let order = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("A", 1)]))
        .await
        .expect("Checkout failed");

    let mut repriced = product("A", STORE, dec!(99), 9, Some(10));
    repriced.name = "Renamed".to_string();
    fx.catalog
        .add_product(&repriced)
        .await
        .expect("Failed to reprice");

    let stored = fx
        .engine
        .get_order(&order.order_number)
        .await
        .expect("Failed to load order")
        .expect("Order missing");
    assert_eq!(stored.items[0].unit_price, dec!(10));
    assert_eq!(stored.items[0].product_name, "Product A");
    assert_eq!(stored.total, dec!(15));
}

#[tokio::test]
async fn test_checkout_validation() {
    let fx = fixture().await;

    let cases = vec![
        ("no items", checkout(CUSTOMER, &[])),
        ("zero quantity", checkout(CUSTOMER, &[("A", 0)])),
        ("no customer", checkout("  ", &[("A", 1)])),
        (
            "no address",
            CheckoutRequest::new(CUSTOMER)
                .item("A", 1)
                .pay_with(PaymentMethod::Card),
        ),
        (
            "no payment",
            CheckoutRequest::new(CUSTOMER).item("A", 1).ship_to(address()),
        ),
        (
            "blank street",
            CheckoutRequest::new(CUSTOMER)
                .item("A", 1)
                .ship_to(delivery_kit::orders::ShippingAddress::new(" ", "1", "Quito"))
                .pay_with(PaymentMethod::Card),
        ),
        ("long note", checkout(CUSTOMER, &[("A", 1)]).note("x".repeat(501))),
    ];

    for (name, request) in cases {
        let result = fx.engine.checkout(request).await;
        assert!(
            matches!(result, Err(Error::ValidationError(_))),
            "{}: {:?}",
            name,
            result
        );
    }

    assert_eq!(stock(&fx.catalog, "A").await, 10);
}

#[tokio::test]
async fn test_checkout_rejects_mixed_stores() {
    let fx = fixture().await;

    let result = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("A", 1), ("C", 1)]))
        .await;

    match result {
        Err(Error::CrossStoreOrder {
            product_id,
            expected_store,
            found_store,
        }) => {
            assert_eq!(product_id, "C");
            assert_eq!(expected_store, STORE);
            assert_eq!(found_store, OTHER_STORE);
        }
        other => panic!("Expected CrossStoreOrder, got {:?}", other),
    }

    assert_eq!(stock(&fx.catalog, "A").await, 10);
    assert_eq!(stock(&fx.catalog, "C").await, 10);
}

#[tokio::test]
async fn test_failed_line_restores_earlier_lines() {
    let fx = fixture().await;

    let result = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("A", 2), ("B", 3), ("E", 5)]))
        .await;

    match result {
        Err(Error::InsufficientStock {
            product_id,
            requested,
            available,
        }) => {
            assert_eq!(product_id, "E");
            assert_eq!(requested, 5);
            assert_eq!(available, 1);
        }
        other => panic!("Expected InsufficientStock, got {:?}", other),
    }

    assert_eq!(stock(&fx.catalog, "A").await, 10);
    assert_eq!(stock(&fx.catalog, "B").await, 10);
    assert_eq!(stock(&fx.catalog, "E").await, 1);

    let orders = fx
        .engine
        .find_orders(&OrderFilter::default())
        .await
        .expect("Failed to list orders");
    assert!(orders.is_empty());
}

#[tokio::test]
async fn test_unavailable_product_reports_zero_stock() {
    let fx = fixture().await;

    let result = fx.engine.checkout(checkout(CUSTOMER, &[("D", 1)])).await;

    assert!(matches!(
        result,
        Err(Error::InsufficientStock { available: 0, .. })
    ));
    assert_eq!(stock(&fx.catalog, "D").await, 10);
}

#[tokio::test]
async fn test_unknown_product() {
    let fx = fixture().await;

    let result = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("A", 1), ("missing", 1)]))
        .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(stock(&fx.catalog, "A").await, 10);
}

// ============================================================================
// State machine
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_by_parties() {
    let fx = fixture().await;

    let order = fx
        .engine
        .checkout(checkout(CUSTOMER, &[("A", 1)]))
        .await
        .expect("Checkout failed");
    let number = order.order_number.as_str();
    let store = store_actor();

    for state in [
        OrderState::Confirmed,
        OrderState::Preparing,
        OrderState::Ready,
    ] {
        let updated = fx
            .engine
            .transition_as(number, &store, state)
            .await
            .expect("Store transition failed");
        assert_eq!(updated.state, state);
    }

    fx.engine.claim(number, COURIER).await.expect("Claim failed");

    let courier = courier_actor(COURIER);
    fx.clock.advance(chrono::Duration::minutes(5));
    let en_route = fx
        .engine
        .transition_as(number, &courier, OrderState::EnRoute)
        .await
        .expect("En route failed");
    assert_eq!(en_route.updated_at, fx.clock.now());

    fx.clock.advance(chrono::Duration::minutes(20));
    let delivered = fx
        .engine
        .transition_as(number, &courier, OrderState::Delivered)
        .await
        .expect("Delivery failed");

    assert_eq!(delivered.state, OrderState::Delivered);
    assert_eq!(delivered.delivered_at, Some(fx.clock.now()));
    assert_eq!(delivered.courier_id.as_deref(), Some(COURIER));
}

#[tokio::test]
async fn test_invalid_transition_leaves_order_unchanged() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Pending).await;
    let before = fx
        .engine
        .get_order(&number)
        .await
        .expect("Failed to load order")
        .expect("Order missing");

    let result = fx
        .engine
        .transition(&number, OrderState::Delivered, &PermittedStates::Any)
        .await;

    match result {
        Err(Error::InvalidTransition { from, to }) => {
            assert_eq!(from, OrderState::Pending);
            assert_eq!(to, OrderState::Delivered);
        }
        other => panic!("Expected InvalidTransition, got {:?}", other),
    }

    let after = fx
        .engine
        .get_order(&number)
        .await
        .expect("Failed to load order")
        .expect("Order missing");
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_roles_are_limited_to_their_states() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Pending).await;

    // couriers never confirm, customers never use the generic path
    for actor in [
        courier_actor(COURIER),
        Actor::new(CUSTOMER, Role::Customer),
    ] {
        let result = fx
            .engine
            .transition_as(&number, &actor, OrderState::Confirmed)
            .await;
        assert!(
            matches!(result, Err(Error::AuthorizationDenied(_))),
            "{:?}: {:?}",
            actor,
            result
        );
    }

    // permission is checked before the table
    let result = fx
        .engine
        .transition_as(&number, &store_actor(), OrderState::Delivered)
        .await;
    assert!(matches!(result, Err(Error::AuthorizationDenied(_))));
}

#[tokio::test]
async fn test_store_must_own_order() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Pending).await;

    let result = fx
        .engine
        .transition_as(
            &number,
            &Actor::new(OTHER_STORE, Role::Store),
            OrderState::Confirmed,
        )
        .await;
    assert!(matches!(result, Err(Error::AuthorizationDenied(_))));

    let admin = fx
        .engine
        .transition_as(&number, &Actor::new("root", Role::Admin), OrderState::Confirmed)
        .await
        .expect("Admin transition failed");
    assert_eq!(admin.state, OrderState::Confirmed);
}

#[tokio::test]
async fn test_unassigned_courier_cannot_move_order() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Ready).await;

    let result = fx
        .engine
        .transition_as(&number, &courier_actor(COURIER), OrderState::EnRoute)
        .await;
    assert!(matches!(result, Err(Error::AuthorizationDenied(_))));
}

#[tokio::test]
async fn test_terminal_states_have_no_exits() {
    let fx = fixture().await;

    for terminal in [OrderState::Delivered, OrderState::Cancelled] {
        let number = order_in_state(&fx, terminal).await;
        for target in OrderState::ALL {
            let result = fx
                .engine
                .transition(&number, target, &PermittedStates::Any)
                .await;
            assert!(
                matches!(result, Err(Error::InvalidTransition { .. })),
                "{} -> {}: {:?}",
                terminal,
                target,
                result
            );
        }
    }
}

#[tokio::test]
async fn test_store_can_cancel_until_ready() {
    let fx = fixture().await;

    for state in [
        OrderState::Pending,
        OrderState::Confirmed,
        OrderState::Preparing,
        OrderState::Ready,
    ] {
        let number = order_in_state(&fx, state).await;
        let cancelled = fx
            .engine
            .transition_as(&number, &store_actor(), OrderState::Cancelled)
            .await
            .expect("Store cancel failed");
        assert_eq!(cancelled.state, OrderState::Cancelled);
    }

    let number = order_in_state(&fx, OrderState::EnRoute).await;
    let result = fx
        .engine
        .transition(&number, OrderState::Cancelled, &PermittedStates::Any)
        .await;
    assert!(matches!(result, Err(Error::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_transition_unknown_order() {
    let fx = fixture().await;

    let result = fx
        .engine
        .transition("YEGA-999999", OrderState::Confirmed, &PermittedStates::Any)
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

// ============================================================================
// Customer cancellation
// ============================================================================

#[tokio::test]
async fn test_customer_cancels_pending_order() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Pending).await;

    let result = fx.engine.cancel_by_customer(&number, OTHER_CUSTOMER).await;
    assert!(matches!(result, Err(Error::NotOwner)));

    let cancelled = fx
        .engine
        .cancel_by_customer(&number, CUSTOMER)
        .await
        .expect("Cancel failed");
    assert_eq!(cancelled.state, OrderState::Cancelled);

    let again = fx.engine.cancel_by_customer(&number, CUSTOMER).await;
    assert!(matches!(again, Err(Error::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_customer_cannot_cancel_confirmed_order() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Confirmed).await;

    let result = fx.engine.cancel_by_customer(&number, CUSTOMER).await;
    assert!(matches!(result, Err(Error::AuthorizationDenied(_))));
}

// ============================================================================
// Claim
// ============================================================================

#[tokio::test]
async fn test_claim_ready_order() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Ready).await;

    let claimed = fx.engine.claim(&number, COURIER).await.expect("Claim failed");
    assert_eq!(claimed.courier_id.as_deref(), Some(COURIER));
    assert_eq!(claimed.state, OrderState::Ready);

    let second = fx.engine.claim(&number, OTHER_COURIER).await;
    match second {
        Err(Error::AlreadyClaimed { order_number }) => assert_eq!(order_number, number),
        other => panic!("Expected AlreadyClaimed, got {:?}", other),
    }

    let stored = fx
        .engine
        .get_order(&number)
        .await
        .expect("Failed to load order")
        .expect("Order missing");
    assert_eq!(stored.courier_id.as_deref(), Some(COURIER));
}

#[tokio::test]
async fn test_claim_requires_ready() {
    let fx = fixture().await;

    for state in [
        OrderState::Pending,
        OrderState::Confirmed,
        OrderState::Preparing,
        OrderState::Cancelled,
    ] {
        let number = order_in_state(&fx, state).await;
        let result = fx.engine.claim(&number, COURIER).await;
        match result {
            Err(Error::NotClaimable { state: found, .. }) => assert_eq!(found, state),
            other => panic!("Expected NotClaimable for {}, got {:?}", state, other),
        }
    }
}

#[tokio::test]
async fn test_claim_can_advance_state() {
    let fx = fixture().await;
    let engine = common::Engine::new(
        fx.backend.clone(),
        fx.catalog.clone(),
        fx.directory.clone(),
    )
    .with_config(delivery_kit::OrderConfig::default().with_claim_advances_state(true));

    let number = order_in_state(&fx, OrderState::Ready).await;
    let claimed = engine.claim(&number, COURIER).await.expect("Claim failed");

    assert_eq!(claimed.state, OrderState::EnRoute);
    assert_eq!(claimed.courier_id.as_deref(), Some(COURIER));
}

// ============================================================================
// Direct assignment
// ============================================================================

#[tokio::test]
async fn test_assign_courier_to_ready_order() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Ready).await;

    let assigned = fx
        .engine
        .assign_courier(&number, COURIER, Role::Store)
        .await
        .expect("Assign failed");

    assert_eq!(assigned.courier_id.as_deref(), Some(COURIER));
    assert_eq!(assigned.state, OrderState::EnRoute);
}

#[tokio::test]
async fn test_assign_courier_keeps_earlier_state() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Preparing).await;

    let assigned = fx
        .engine
        .assign_courier(&number, COURIER, Role::Admin)
        .await
        .expect("Assign failed");
    assert_eq!(assigned.state, OrderState::Preparing);

    let reassigned = fx
        .engine
        .assign_courier(&number, OTHER_COURIER, Role::Admin)
        .await
        .expect("Reassign failed");
    assert_eq!(reassigned.courier_id.as_deref(), Some(OTHER_COURIER));
}

#[tokio::test]
async fn test_assign_courier_checks_courier() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Ready).await;

    for courier in ["nobody", CUSTOMER, PENDING_COURIER, INACTIVE_COURIER] {
        let result = fx.engine.assign_courier(&number, courier, Role::Store).await;
        assert!(
            matches!(result, Err(Error::InvalidCourier(_))),
            "{}: {:?}",
            courier,
            result
        );
    }

    let stored = fx
        .engine
        .get_order(&number)
        .await
        .expect("Failed to load order")
        .expect("Order missing");
    assert_eq!(stored.courier_id, None);
    assert_eq!(stored.state, OrderState::Ready);
}

#[tokio::test]
async fn test_assign_courier_rules() {
    let fx = fixture().await;

    let number = order_in_state(&fx, OrderState::Ready).await;
    let result = fx.engine.assign_courier(&number, COURIER, Role::Courier).await;
    assert!(matches!(result, Err(Error::AuthorizationDenied(_))));

    let closed = order_in_state(&fx, OrderState::Delivered).await;
    let result = fx.engine.assign_courier(&closed, COURIER, Role::Admin).await;
    assert!(matches!(result, Err(Error::OrderClosed { .. })));
}

// ============================================================================
// Rating
// ============================================================================

#[tokio::test]
async fn test_rate_delivered_order() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Delivered).await;

    let rated = fx
        .engine
        .rate(&number, CUSTOMER, 5, Some("  great  ".to_string()))
        .await
        .expect("Rating failed");

    let rating = rated.rating.expect("Rating missing");
    assert_eq!(rating.score, 5);
    assert_eq!(rating.comment.as_deref(), Some("great"));
    assert_eq!(rating.rated_at, fx.clock.now());

    let again = fx.engine.rate(&number, CUSTOMER, 1, None).await;
    assert!(matches!(again, Err(Error::AlreadyRated { .. })));
}

#[tokio::test]
async fn test_rate_rejections() {
    let fx = fixture().await;

    let preparing = order_in_state(&fx, OrderState::Preparing).await;
    let result = fx.engine.rate(&preparing, CUSTOMER, 4, None).await;
    assert!(matches!(result, Err(Error::NotDeliverable { .. })));

    let delivered = order_in_state(&fx, OrderState::Delivered).await;
    let result = fx.engine.rate(&delivered, OTHER_CUSTOMER, 4, None).await;
    assert!(matches!(result, Err(Error::NotOwner)));

    for score in [0, 6] {
        let result = fx.engine.rate(&delivered, CUSTOMER, score, None).await;
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }

    let result = fx
        .engine
        .rate(&delivered, CUSTOMER, 4, Some("x".repeat(501)))
        .await;
    assert!(matches!(result, Err(Error::ValidationError(_))));
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_find_orders_newest_first() {
    let fx = fixture().await;

    let first = order_in_state(&fx, OrderState::Pending).await;
    fx.clock.advance(chrono::Duration::minutes(1));
    let second = order_in_state(&fx, OrderState::Confirmed).await;
    fx.clock.advance(chrono::Duration::minutes(1));
    let other = fx
        .engine
        .checkout(checkout(OTHER_CUSTOMER, &[("C", 1)]))
        .await
        .expect("Checkout failed");

    let mine: Vec<String> = fx
        .engine
        .find_orders(&OrderFilter::customer(CUSTOMER))
        .await
        .expect("Query failed")
        .into_iter()
        .map(|o| o.order_number)
        .collect();
    assert_eq!(mine, vec![second.clone(), first.clone()]);

    let store2 = fx
        .engine
        .find_orders(&OrderFilter::store(OTHER_STORE))
        .await
        .expect("Query failed");
    assert_eq!(store2.len(), 1);
    assert_eq!(store2[0].order_number, other.order_number);

    let confirmed = fx
        .engine
        .find_orders(&OrderFilter::store(STORE).with_state(OrderState::Confirmed))
        .await
        .expect("Query failed");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].order_number, second);
}

#[tokio::test]
async fn test_claimable_orders() {
    let fx = fixture().await;

    let open = order_in_state(&fx, OrderState::Ready).await;
    let taken = order_in_state(&fx, OrderState::Ready).await;
    order_in_state(&fx, OrderState::Preparing).await;
    fx.engine.claim(&taken, COURIER).await.expect("Claim failed");

    let claimable = fx.engine.claimable_orders().await.expect("Query failed");
    assert_eq!(claimable.len(), 1);
    assert_eq!(claimable[0].order_number, open);

    let mine = fx
        .engine
        .find_orders(&OrderFilter::courier(COURIER))
        .await
        .expect("Query failed");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].order_number, taken);
}

#[tokio::test]
async fn test_get_order_for_checks_visibility() {
    let fx = fixture().await;
    let number = order_in_state(&fx, OrderState::Preparing).await;

    for actor in [
        Actor::new(CUSTOMER, Role::Customer),
        store_actor(),
        Actor::new("root", Role::Admin),
    ] {
        let order = fx
            .engine
            .get_order_for(&number, &actor)
            .await
            .expect("Visible order rejected");
        assert!(order.is_some());
    }

    for actor in [
        Actor::new(OTHER_CUSTOMER, Role::Customer),
        Actor::new(OTHER_STORE, Role::Store),
        courier_actor(COURIER),
    ] {
        let result = fx.engine.get_order_for(&number, &actor).await;
        assert!(
            matches!(result, Err(Error::AuthorizationDenied(_))),
            "{:?}",
            actor
        );
    }

    fx.engine
        .transition(&number, OrderState::Ready, &PermittedStates::Any)
        .await
        .expect("Transition failed");
    let visible = fx
        .engine
        .get_order_for(&number, &courier_actor(COURIER))
        .await
        .expect("Ready order hidden from courier");
    assert!(visible.is_some());

    let missing = fx
        .engine
        .get_order_for("YEGA-999999", &store_actor())
        .await
        .expect("Lookup failed");
    assert!(missing.is_none());
}
