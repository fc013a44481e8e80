//! Order lifecycle: the single authority for status changes.
//!
//! [`OrderService::update_status`] validates a move against the transition
//! table, commits it with a compare-and-swap on the previous status and then
//! fires the side effects. When another writer commits first the call fails
//! with [`ServiceError::InvalidTransition`] naming the status actually stored,
//! so a duplicate webhook can never apply the same transition twice.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use model::{Delivery, Order, OrderStatus, PaymentStatus};
use repository::{
    DeliveriesRepository, MemoryStore, OrdersRepository, RepositoryError, TenantSettingsRepository,
};
use tracing::{info, instrument, warn};

pub mod effects;
pub mod error;
pub mod transitions;

pub use effects::{Collaborators, SideEffects};
pub use error::{DispatchError, ServiceError};
pub use transitions::{allowed_transitions, can_transition, is_terminal};

/// The repositories the lifecycle reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrdersRepository>,
    pub deliveries: Arc<dyn DeliveriesRepository>,
    pub settings: Arc<dyn TenantSettingsRepository>,
}

impl Stores {
    /// All three repositories backed by one in-memory store.
    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            orders: Arc::new(store.clone()),
            deliveries: Arc::new(store.clone()),
            settings: Arc::new(store.clone()),
        }
    }
}

/// Business operations on orders used by the webhook processor and the admin API.
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn get_order(&self, order_id: &str) -> Result<Order, ServiceError>;

    /// Resolves the merchant reference a payment provider echoes back.
    async fn find_by_merchant_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, ServiceError>;

    /// Stores the provider transaction id and payment outcome. Overwriting
    /// the same pair again is harmless.
    async fn record_payment_outcome(
        &self,
        order_id: &str,
        payment_ref: &str,
        outcome: PaymentStatus,
    ) -> Result<(), ServiceError>;

    /// Moves the order to `status` and runs the side effects. Returns the
    /// order as it stands after any follow-up transitions.
    async fn update_status(&self, order_id: &str, status: OrderStatus)
    -> Result<Order, ServiceError>;

    /// Manually dispatches a courier for a PAID order that has none yet.
    async fn dispatch_delivery(&self, order_id: &str) -> Result<Delivery, DispatchError>;

    /// Courier jobs recorded for the order.
    async fn list_deliveries(&self, order_id: &str) -> Result<Vec<Delivery>, ServiceError>;
}

pub struct OrderServiceImpl {
    stores: Stores,
    effects: SideEffects,
}

impl OrderServiceImpl {
    pub fn new(stores: Stores, clients: Collaborators) -> Self {
        Self {
            effects: SideEffects::new(stores.clone(), clients),
            stores,
        }
    }

    async fn load(&self, order_id: &str) -> Result<Order, ServiceError> {
        match self.stores.orders.get_by_id(order_id).await {
            Ok(order) => Ok(order),
            Err(RepositoryError::NotFound) => Err(ServiceError::NotFound(order_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// One validated, committed transition plus its side effects.
    /// Returns the updated order and the follow-up status requested by the effects.
    async fn apply_transition(
        &self,
        order_id: &str,
        target: OrderStatus,
    ) -> Result<(Order, Option<OrderStatus>), ServiceError> {
        let order = self.load(order_id).await?;
        let from = order.status;
        if !can_transition(from, target) {
            return Err(ServiceError::InvalidTransition { from, to: target });
        }

        let committed = match self
            .stores
            .orders
            .compare_and_set_status(order_id, from, target)
            .await
        {
            Ok(committed) => committed,
            Err(RepositoryError::NotFound) => {
                return Err(ServiceError::NotFound(order_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if !committed {
            let current = self.load(order_id).await?;
            return Err(ServiceError::InvalidTransition {
                from: current.status,
                to: target,
            });
        }
        info!(order_id, %from, to = %target, "Order status changed");

        let order = Order {
            status: target,
            updated_at: Utc::now(),
            ..order
        };
        let follow_up = self.effects.on_status_changed(&order, target).await;
        Ok((order, follow_up))
    }

    /// Applies follow-up transitions requested by side effects. Failures are
    /// logged; the caller's transition is already committed.
    async fn settle(&self, mut order: Order, mut next: Option<OrderStatus>) -> Order {
        while let Some(target) = next.take() {
            match self.apply_transition(&order.id, target).await {
                Ok((updated, follow_up)) => {
                    order = updated;
                    next = follow_up;
                }
                Err(e) => {
                    warn!(order_id = %order.id, to = %target, error = %e, "Follow-up transition failed");
                }
            }
        }
        order
    }
}

#[async_trait]
impl OrderService for OrderServiceImpl {
    #[instrument(skip(self))]
    async fn get_order(&self, order_id: &str) -> Result<Order, ServiceError> {
        self.load(order_id).await
    }

    #[instrument(skip(self))]
    async fn find_by_merchant_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, ServiceError> {
        Ok(self.stores.orders.find_by_merchant_reference(reference).await?)
    }

    #[instrument(skip(self))]
    async fn record_payment_outcome(
        &self,
        order_id: &str,
        payment_ref: &str,
        outcome: PaymentStatus,
    ) -> Result<(), ServiceError> {
        match self
            .stores
            .orders
            .record_payment_outcome(order_id, payment_ref, outcome)
            .await
        {
            Ok(()) => Ok(()),
            Err(RepositoryError::NotFound) => Err(ServiceError::NotFound(order_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<Order, ServiceError> {
        let (order, follow_up) = self.apply_transition(order_id, status).await?;
        Ok(self.settle(order, follow_up).await)
    }

    #[instrument(skip(self))]
    async fn dispatch_delivery(&self, order_id: &str) -> Result<Delivery, DispatchError> {
        let order = match self.stores.orders.get_by_id(order_id).await {
            Ok(order) => order,
            Err(RepositoryError::NotFound) => {
                return Err(DispatchError::NotFound(order_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if order.status != OrderStatus::Paid {
            return Err(DispatchError::NotPaid(order.status));
        }
        if let Some(existing) = order.delivery_id.clone() {
            return Err(DispatchError::AlreadyDispatched(existing));
        }

        let settings = self.stores.settings.get(&order.tenant_id).await?;
        let delivery = self.effects.dispatch(&order, settings.as_ref()).await?;

        match self.apply_transition(order_id, OrderStatus::Preparing).await {
            Ok((order, follow_up)) => {
                self.settle(order, follow_up).await;
            }
            Err(e) => warn!(order_id, error = %e, "Dispatched but could not move order to PREPARING"),
        }
        Ok(delivery)
    }

    #[instrument(skip(self))]
    async fn list_deliveries(&self, order_id: &str) -> Result<Vec<Delivery>, ServiceError> {
        self.load(order_id).await?;
        Ok(self.stores.deliveries.get_by_order_id(order_id).await?)
    }
}
