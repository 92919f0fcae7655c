//! Order lifecycle engine.

use super::model::{Actor, CheckoutRequest, LineItem, Order, OrderFilter, OrderState, PaymentMethod, Rating, ShippingAddress};
use super::pricing::{self, FlatRateShipping, ShippingPolicy};
use super::sequence::OrderSequence;
use super::state_machine::{apply_transition, PermittedStates, RolePolicy};
use crate::backend::StoreBackend;
use crate::clock::{Clock, SystemClock};
use crate::collab::{ApprovalState, Catalog, Role, UserDirectory};
use crate::config::{OrderConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::observability::{EngineMetrics, NoOpMetrics};
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Instant;

/// Order numbers drawn before checkout gives up on a key collision.
const MAX_NUMBER_DRAWS: usize = 3;

/// Owns the order state machine, the courier claim protocol and stock
/// reservation at checkout.
///
/// Every mutation is a compare-and-swap on the order record, so concurrent
/// requests from any number of processes see a consistent lifecycle.
///
/// # Example
///
/// ```ignore
/// use delivery_kit::backend::InMemoryBackend;
/// use delivery_kit::collab::{StoreCatalog, StoreDirectory};
/// use delivery_kit::orders::{CheckoutRequest, OrderEngine, PaymentMethod, ShippingAddress};
///
/// let backend = InMemoryBackend::new();
/// let engine = OrderEngine::new(
///     backend.clone(),
///     StoreCatalog::new(backend.clone()),
///     StoreDirectory::new(backend),
/// );
///
/// let order = engine
///     .checkout(
///         CheckoutRequest::new("customer-1")
///             .item("taco", 2)
///             .ship_to(ShippingAddress::new("Main", "12", "Quito"))
///             .pay_with(PaymentMethod::Cash),
///     )
///     .await?;
/// ```
pub struct OrderEngine<B: StoreBackend, C: Catalog, D: UserDirectory> {
    orders: RecordStore<Order, B>,
    sequence: OrderSequence<B>,
    catalog: C,
    directory: D,
    config: OrderConfig,
    roles: RolePolicy,
    shipping: Arc<dyn ShippingPolicy>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn EngineMetrics>,
}

impl<B: StoreBackend, C: Catalog, D: UserDirectory> OrderEngine<B, C, D> {
    pub fn new(backend: B, catalog: C, directory: D) -> Self {
        let config = OrderConfig::default();
        OrderEngine {
            orders: RecordStore::new(backend.clone()),
            sequence: OrderSequence::new(
                backend,
                config.order_number_prefix.clone(),
                config.order_number_width,
            ),
            catalog,
            directory,
            shipping: Arc::new(FlatRateShipping::from_config(&config)),
            roles: RolePolicy::default(),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoOpMetrics),
            config,
        }
    }

    /// Replace the configuration. Also resets shipping to the config's flat rate.
    pub fn with_config(mut self, config: OrderConfig) -> Self {
        self.sequence = OrderSequence::new(
            self.orders.backend().clone(),
            config.order_number_prefix.clone(),
            config.order_number_width,
        );
        self.shipping = Arc::new(FlatRateShipping::from_config(&config));
        self.config = config;
        self
    }

    pub fn with_store_config(mut self, config: StoreConfig) -> Self {
        self.orders = self.orders.with_config(config);
        self
    }

    pub fn with_shipping_policy(mut self, policy: Arc<dyn ShippingPolicy>) -> Self {
        self.shipping = policy;
        self
    }

    pub fn with_role_policy(mut self, roles: RolePolicy) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.orders = self.orders.with_metrics(Arc::clone(&metrics));
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &OrderConfig {
        &self.config
    }

    pub fn role_policy(&self) -> &RolePolicy {
        &self.roles
    }

    // ------------------------------------------------------------------
    // Checkout
    // ------------------------------------------------------------------

    /// Create an order in `pending`, taking stock for every line.
    ///
    /// Stock is decremented line by line; if any later step fails, every
    /// decrement already made is returned before the error surfaces.
    ///
    /// # Errors
    /// - `Error::ValidationError`: empty items, zero quantity, missing address or payment
    /// - `Error::NotFound`: unknown product
    /// - `Error::CrossStoreOrder`: products from more than one store
    /// - `Error::InsufficientStock`: a line exceeds stock or the product is unavailable
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Order> {
        let timer = Instant::now();

        let (address, payment_method) = self.validate_checkout(&request)?;
        let store_id = match self.resolve_store(&request).await {
            Ok(store_id) => store_id,
            Err(e) => {
                self.report_rejection("checkout", &request.customer_id, &e);
                return Err(e);
            }
        };

        let mut taken: Vec<(String, u32)> = Vec::with_capacity(request.items.len());
        let placed = self
            .place_order(&request, address, payment_method, store_id, &mut taken)
            .await;

        match placed {
            Ok(order) => {
                info!(
                    "Order {} placed by {} at store {} (total {})",
                    order.order_number, order.customer_id, order.store_id, order.total
                );
                self.metrics
                    .record_checkout(&order.order_number, timer.elapsed());
                Ok(order)
            }
            Err(e) => {
                self.release_stock(&taken).await;
                self.report_rejection("checkout", &request.customer_id, &e);
                Err(e)
            }
        }
    }

    fn validate_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<(ShippingAddress, PaymentMethod)> {
        if request.customer_id.trim().is_empty() {
            return Err(Error::ValidationError("customer id is required".to_string()));
        }
        if request.items.is_empty() {
            return Err(Error::ValidationError(
                "an order needs at least one item".to_string(),
            ));
        }
        for item in &request.items {
            if item.product_id.trim().is_empty() {
                return Err(Error::ValidationError("product id is required".to_string()));
            }
            if item.quantity == 0 {
                return Err(Error::ValidationError(format!(
                    "quantity for {} must be at least 1",
                    item.product_id
                )));
            }
        }

        let address = request
            .address
            .clone()
            .ok_or_else(|| Error::ValidationError("shipping address is required".to_string()))?;
        address.validate()?;

        let payment_method = request
            .payment_method
            .ok_or_else(|| Error::ValidationError("payment method is required".to_string()))?;

        self.check_text_len("note", request.note.as_deref())?;

        Ok((address, payment_method))
    }

    fn check_text_len(&self, field: &str, text: Option<&str>) -> Result<()> {
        match text {
            Some(text) if text.chars().count() > self.config.max_text_len => {
                Err(Error::ValidationError(format!(
                    "{} exceeds {} characters",
                    field, self.config.max_text_len
                )))
            }
            _ => Ok(()),
        }
    }

    /// Store of the first product; every other product must share it.
    async fn resolve_store(&self, request: &CheckoutRequest) -> Result<String> {
        let mut store_id: Option<String> = None;

        for item in &request.items {
            let product = self
                .catalog
                .get_product(&item.product_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("product {}", item.product_id)))?;

            let expected = store_id.get_or_insert_with(|| product.store_id.clone());
            if *expected != product.store_id {
                return Err(Error::CrossStoreOrder {
                    product_id: product.id,
                    expected_store: expected.clone(),
                    found_store: product.store_id,
                });
            }
        }

        store_id.ok_or_else(|| Error::ValidationError("an order needs at least one item".to_string()))
    }

    async fn place_order(
        &self,
        request: &CheckoutRequest,
        address: ShippingAddress,
        payment_method: PaymentMethod,
        store_id: String,
        taken: &mut Vec<(String, u32)>,
    ) -> Result<Order> {
        let mut items = Vec::with_capacity(request.items.len());
        let mut prep = Vec::with_capacity(request.items.len());

        for item in &request.items {
            let product = self
                .catalog
                .decrement_stock(&item.product_id, item.quantity)
                .await?;
            taken.push((item.product_id.clone(), item.quantity));

            if product.store_id != store_id {
                return Err(Error::CrossStoreOrder {
                    product_id: product.id,
                    expected_store: store_id,
                    found_store: product.store_id,
                });
            }

            prep.push(product.prep_minutes);
            items.push(LineItem {
                line_subtotal: pricing::line_subtotal(item.quantity, product.price),
                product_id: product.id,
                product_name: product.name,
                quantity: item.quantity,
                unit_price: product.price,
            });
        }

        let totals = pricing::totals(&items, self.shipping.as_ref());
        let eta_minutes = pricing::eta_minutes(prep, &self.config);
        let now = self.clock.now();

        let mut order = Order {
            order_number: String::new(),
            customer_id: request.customer_id.clone(),
            store_id,
            courier_id: None,
            items,
            subtotal: totals.subtotal,
            shipping_cost: totals.shipping_cost,
            total: totals.total,
            payment_method,
            address,
            note: request
                .note
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            state: OrderState::Pending,
            eta_minutes,
            estimated_delivery_at: now + chrono::Duration::minutes(i64::from(eta_minutes)),
            created_at: now,
            updated_at: now,
            delivered_at: None,
            rating: None,
        };

        for _ in 0..MAX_NUMBER_DRAWS {
            order.order_number = self.sequence.next().await?;
            if self.orders.insert(&order).await? {
                return Ok(order);
            }
            warn!(
                "Order number {} is already taken, drawing another",
                order.order_number
            );
        }

        Err(Error::Contention {
            key: "order number".to_string(),
        })
    }

    /// Return stock taken by an aborted checkout, newest first.
    async fn release_stock(&self, taken: &[(String, u32)]) {
        for (product_id, quantity) in taken.iter().rev() {
            match self.catalog.increment_stock(product_id, *quantity).await {
                Ok(()) => debug!("Restored {} x {}", quantity, product_id),
                Err(e) => {
                    error!(
                        "Failed to restore {} x {} after aborted checkout: {}",
                        quantity, product_id, e
                    );
                    self.metrics
                        .record_error("stock compensation", &e.to_string());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Move an order to `requested` if `permitted` allows it and the
    /// transition table has the edge.
    ///
    /// # Errors
    /// - `Error::AuthorizationDenied`: `requested` is outside `permitted`
    /// - `Error::InvalidTransition`: no edge from the current state
    /// - `Error::NotFound`: unknown order
    pub async fn transition(
        &self,
        order_number: &str,
        requested: OrderState,
        permitted: &PermittedStates,
    ) -> Result<Order> {
        self.transition_guarded(order_number, requested, permitted, |_| Ok(()))
            .await
    }

    /// Transition on behalf of an actor: the role's permitted states come
    /// from the [`RolePolicy`], and the actor must be a party to the order
    /// (owning store, assigned courier, owning customer) unless admin.
    pub async fn transition_as(
        &self,
        order_number: &str,
        actor: &Actor,
        requested: OrderState,
    ) -> Result<Order> {
        let permitted = self.roles.permitted(actor.role);
        self.transition_guarded(order_number, requested, &permitted, |order| {
            let is_party = match actor.role {
                Role::Admin => true,
                Role::Store => order.store_id == actor.id,
                Role::Courier => order.courier_id.as_deref() == Some(actor.id.as_str()),
                Role::Customer => order.customer_id == actor.id,
            };
            if is_party {
                Ok(())
            } else {
                Err(Error::AuthorizationDenied(format!(
                    "{} {} is not a party to order {}",
                    actor.role, actor.id, order.order_number
                )))
            }
        })
        .await
    }

    /// Cancel-before-confirm for the customer who placed the order.
    ///
    /// # Errors
    /// - `Error::NotOwner`: another customer's order
    /// - `Error::AuthorizationDenied`: the store already confirmed it
    /// - `Error::InvalidTransition`: the order is already closed
    pub async fn cancel_by_customer(&self, order_number: &str, customer_id: &str) -> Result<Order> {
        let permitted = PermittedStates::only(&[OrderState::Cancelled]);
        self.transition_guarded(order_number, OrderState::Cancelled, &permitted, |order| {
            if order.customer_id != customer_id {
                return Err(Error::NotOwner);
            }
            if order.state != OrderState::Pending && !order.state.is_terminal() {
                return Err(Error::AuthorizationDenied(format!(
                    "order {} is {}, customers may only cancel pending orders",
                    order.order_number, order.state
                )));
            }
            Ok(())
        })
        .await
    }

    async fn transition_guarded<G>(
        &self,
        order_number: &str,
        requested: OrderState,
        permitted: &PermittedStates,
        guard: G,
    ) -> Result<Order>
    where
        G: Fn(&Order) -> Result<()>,
    {
        let now = self.clock.now();
        let mut from = None;

        let result = self
            .orders
            .update(&order_number.to_string(), |mut order| {
                guard(&order)?;
                from = Some(apply_transition(&mut order, requested, permitted, now)?);
                Ok(order)
            })
            .await;

        match result {
            Ok(order) => {
                if let Some(from) = from {
                    info!("Order {} {} -> {}", order_number, from, order.state);
                    self.metrics
                        .record_transition(order_number, from.as_str(), order.state.as_str());
                }
                Ok(order)
            }
            Err(e) => {
                self.report_rejection("transition", order_number, &e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Courier assignment
    // ------------------------------------------------------------------

    /// Courier self-assignment.
    ///
    /// Succeeds only if, in one atomic step, the order is `ready` and has
    /// no courier. Of any number of concurrent claims exactly one wins.
    ///
    /// # Errors
    /// - `Error::AlreadyClaimed`: a courier is already set
    /// - `Error::NotClaimable`: the order is not `ready`
    pub async fn claim(&self, order_number: &str, courier_id: &str) -> Result<Order> {
        if courier_id.trim().is_empty() {
            return Err(Error::ValidationError("courier id is required".to_string()));
        }

        let now = self.clock.now();
        let advance = self.config.claim_advances_state;

        let result = self
            .orders
            .update(&order_number.to_string(), |mut order| {
                if order.courier_id.is_some() {
                    return Err(Error::AlreadyClaimed {
                        order_number: order.order_number,
                    });
                }
                if order.state != OrderState::Ready {
                    return Err(Error::NotClaimable {
                        order_number: order.order_number,
                        state: order.state,
                    });
                }
                order.courier_id = Some(courier_id.to_string());
                if advance {
                    apply_transition(&mut order, OrderState::EnRoute, &PermittedStates::Any, now)?;
                } else {
                    order.updated_at = now;
                }
                Ok(order)
            })
            .await;

        self.metrics.record_claim(order_number, result.is_ok());
        match result {
            Ok(order) => {
                info!("Order {} claimed by courier {}", order_number, courier_id);
                Ok(order)
            }
            Err(e) => {
                self.report_rejection("claim", order_number, &e);
                Err(e)
            }
        }
    }

    /// Store or admin sets the courier directly.
    ///
    /// The courier is checked against the directory on every call. An order
    /// still in `ready` moves to `en_route` in the same write.
    ///
    /// # Errors
    /// - `Error::AuthorizationDenied`: `by_role` is neither store nor admin
    /// - `Error::InvalidCourier`: unknown user, not a courier, not approved or inactive
    /// - `Error::OrderClosed`: the order is delivered or cancelled
    pub async fn assign_courier(
        &self,
        order_number: &str,
        courier_id: &str,
        by_role: Role,
    ) -> Result<Order> {
        if !matches!(by_role, Role::Store | Role::Admin) {
            return Err(Error::AuthorizationDenied(format!(
                "{} may not assign couriers",
                by_role
            )));
        }
        if let Err(e) = self.check_courier(courier_id).await {
            self.report_rejection("assign courier", order_number, &e);
            return Err(e);
        }

        let now = self.clock.now();
        let result = self
            .orders
            .update(&order_number.to_string(), |mut order| {
                if order.state.is_terminal() {
                    return Err(Error::OrderClosed {
                        order_number: order.order_number,
                        state: order.state,
                    });
                }
                order.courier_id = Some(courier_id.to_string());
                if order.state == OrderState::Ready {
                    apply_transition(&mut order, OrderState::EnRoute, &PermittedStates::Any, now)?;
                } else {
                    order.updated_at = now;
                }
                Ok(order)
            })
            .await;

        match result {
            Ok(order) => {
                info!(
                    "Courier {} assigned to order {} by {} (now {})",
                    courier_id, order_number, by_role, order.state
                );
                Ok(order)
            }
            Err(e) => {
                self.report_rejection("assign courier", order_number, &e);
                Err(e)
            }
        }
    }

    async fn check_courier(&self, courier_id: &str) -> Result<()> {
        let user = self
            .directory
            .get_user(courier_id)
            .await?
            .ok_or_else(|| Error::InvalidCourier(format!("user {} does not exist", courier_id)))?;

        if user.role != Role::Courier {
            return Err(Error::InvalidCourier(format!(
                "user {} is a {}, not a courier",
                courier_id, user.role
            )));
        }
        if user.approval != ApprovalState::Approved {
            return Err(Error::InvalidCourier(format!(
                "courier {} is not approved",
                courier_id
            )));
        }
        if !user.active {
            return Err(Error::InvalidCourier(format!(
                "courier {} is inactive",
                courier_id
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rating
    // ------------------------------------------------------------------

    /// Attach the customer's rating to a delivered order. A rating is final.
    ///
    /// # Errors
    /// - `Error::ValidationError`: score outside 1..=5 or comment too long
    /// - `Error::NotOwner`: caller did not place the order
    /// - `Error::NotDeliverable`: order is not delivered
    /// - `Error::AlreadyRated`: order already carries a rating
    pub async fn rate(
        &self,
        order_number: &str,
        customer_id: &str,
        score: u8,
        comment: Option<String>,
    ) -> Result<Order> {
        if !(1..=5).contains(&score) {
            return Err(Error::ValidationError(format!(
                "rating must be between 1 and 5, got {}",
                score
            )));
        }
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self.check_text_len("comment", comment.as_deref())?;

        let now = self.clock.now();
        let result = self
            .orders
            .update(&order_number.to_string(), |mut order| {
                if order.customer_id != customer_id {
                    return Err(Error::NotOwner);
                }
                if order.state != OrderState::Delivered {
                    return Err(Error::NotDeliverable {
                        order_number: order.order_number,
                        state: order.state,
                    });
                }
                if order.rating.is_some() {
                    return Err(Error::AlreadyRated {
                        order_number: order.order_number,
                    });
                }
                order.rating = Some(Rating {
                    score,
                    comment: comment.clone(),
                    rated_at: now,
                });
                order.updated_at = now;
                Ok(order)
            })
            .await;

        match result {
            Ok(order) => {
                info!("Order {} rated {} by {}", order_number, score, customer_id);
                Ok(order)
            }
            Err(e) => {
                self.report_rejection("rate", order_number, &e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_order(&self, order_number: &str) -> Result<Option<Order>> {
        self.orders.get(&order_number.to_string()).await
    }

    /// Load an order on behalf of `actor`.
    ///
    /// # Errors
    /// - `Error::AuthorizationDenied`: the order exists but `actor` may not see it
    pub async fn get_order_for(&self, order_number: &str, actor: &Actor) -> Result<Option<Order>> {
        match self.get_order(order_number).await? {
            Some(order) if !actor.can_view(&order) => Err(Error::AuthorizationDenied(format!(
                "{} {} may not view order {}",
                actor.role, actor.id, order_number
            ))),
            found => Ok(found),
        }
    }

    /// Orders matching `filter`, newest first.
    pub async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .scan(&[])
            .await?
            .into_iter()
            .filter(|order| filter.matches(order))
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_number.cmp(&a.order_number))
        });
        Ok(orders)
    }

    /// Ready orders without a courier, newest first.
    pub async fn claimable_orders(&self) -> Result<Vec<Order>> {
        let ready = OrderFilter::default().with_state(OrderState::Ready);
        Ok(self
            .find_orders(&ready)
            .await?
            .into_iter()
            .filter(|order| order.courier_id.is_none())
            .collect())
    }

    fn report_rejection(&self, operation: &str, subject: &str, error: &Error) {
        if error.is_expected() {
            debug!("{} on {} rejected: {}", operation, subject, error);
        } else {
            warn!("{} on {} failed: {}", operation, subject, error);
            self.metrics.record_error(operation, &error.to_string());
        }
    }
}
