//! Side effects fired after a committed status change: customer
//! notification, POS sync, courier dispatch on PAID and courier
//! cancellation on CANCELED.
//!
//! They run concurrently and each one handles its own failure, so a broken
//! channel never suppresses the others or touches the stored status.

use std::sync::Arc;

use chrono::{Duration, Utc};
use integrations::{
    ClientError, DeliveryClient, NotificationSender, PosClient, StatusMessage,
};
use model::{Delivery, Order, OrderStatus, TenantSettings};
use repository::RepositoryError;
use tracing::{debug, error, info, warn};

use crate::{DispatchError, Stores};

/// A dispatch claim older than this is considered abandoned. Well above the
/// worst case of a fully retried quote plus create.
const DISPATCH_CLAIM_TTL_MINUTES: i64 = 5;

/// Customer-facing templates; `{order}` is replaced with the order id.
/// PENDING and PAID are silent: confirmation is sent once at checkout.
const NOTIFICATIONS: &[(OrderStatus, &str, &str)] = &[
    (
        OrderStatus::Preparing,
        "Your order is being prepared",
        "Good news! The kitchen has started preparing order {order}.",
    ),
    (
        OrderStatus::Ready,
        "Your order is ready",
        "Order {order} is ready and waiting for the courier.",
    ),
    (
        OrderStatus::OutForDelivery,
        "Your order is on its way",
        "A courier has picked up order {order} and is heading to you.",
    ),
    (
        OrderStatus::Delivered,
        "Your order has been delivered",
        "Order {order} has been delivered. Enjoy your meal!",
    ),
    (
        OrderStatus::Canceled,
        "Your order has been canceled",
        "Order {order} has been canceled. If you were charged, the payment will be refunded.",
    ),
];

/// Renders the customer message for `status`, if that status is announced.
pub fn notification_for(order: &Order, status: OrderStatus) -> Option<StatusMessage> {
    NOTIFICATIONS
        .iter()
        .find(|(s, _, _)| *s == status)
        .map(|(_, subject, body)| StatusMessage {
            subject: (*subject).to_string(),
            body: body.replace("{order}", &order.id),
        })
}

/// Storyous vocabulary for each order status.
pub const fn pos_status(status: OrderStatus) -> Option<&'static str> {
    match status {
        OrderStatus::Pending => None,
        OrderStatus::Paid => Some("accepted"),
        OrderStatus::Preparing => Some("preparing"),
        OrderStatus::Ready => Some("ready"),
        OrderStatus::OutForDelivery => Some("dispatched"),
        OrderStatus::Delivered => Some("delivered"),
        OrderStatus::Canceled => Some("cancelled"),
    }
}

/// Outbound collaborators used by the side effects.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn NotificationSender>,
    pub pos: Arc<dyn PosClient>,
    pub delivery: Arc<dyn DeliveryClient>,
}

pub struct SideEffects {
    stores: Stores,
    clients: Collaborators,
}

impl SideEffects {
    pub fn new(stores: Stores, clients: Collaborators) -> Self {
        Self { stores, clients }
    }

    /// Runs every side effect for `order`, which has just moved to `status`.
    /// Returns the follow-up status the lifecycle should apply next, if any.
    pub async fn on_status_changed(&self, order: &Order, status: OrderStatus) -> Option<OrderStatus> {
        let settings = match self.stores.settings.get(&order.tenant_id).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(order_id = %order.id, tenant_id = %order.tenant_id, error = %e, "Failed to load tenant settings");
                None
            }
        };
        let settings = settings.as_ref();

        let (_, _, follow_up, _) = tokio::join!(
            self.notify(order, status),
            self.sync_pos(order, status, settings),
            self.dispatch_if_paid(order, status, settings),
            self.cancel_if_canceled(order, status),
        );
        follow_up
    }

    async fn notify(&self, order: &Order, status: OrderStatus) {
        let Some(message) = notification_for(order, status) else {
            return;
        };
        if let Err(e) = self
            .clients
            .notifier
            .send_status_update(order, status, &message)
            .await
        {
            warn!(order_id = %order.id, %status, error = %e, "Status notification failed");
        }
    }

    async fn sync_pos(&self, order: &Order, status: OrderStatus, settings: Option<&TenantSettings>) {
        let Some(settings) = settings.filter(|s| s.pos_enabled) else {
            debug!(order_id = %order.id, "POS sync disabled for tenant");
            return;
        };
        match order.external_order_ref.as_deref() {
            Some(external_id) => {
                let Some(mapped) = pos_status(status) else {
                    return;
                };
                if let Err(e) = self.clients.pos.sync_status(settings, external_id, mapped).await {
                    warn!(order_id = %order.id, %status, error = %e, "POS status sync failed");
                }
            }
            None if status == OrderStatus::Paid => self.push_to_pos(order, settings).await,
            None => {}
        }
    }

    /// Creates the order in the POS and stores the POS order id on it.
    async fn push_to_pos(&self, order: &Order, settings: &TenantSettings) {
        let external_id = match self.clients.pos.create_order(settings, order).await {
            Ok(id) => id,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Pushing order to POS failed");
                return;
            }
        };
        match self
            .stores
            .orders
            .record_external_order_ref(&order.id, &external_id)
            .await
        {
            Ok(true) => info!(order_id = %order.id, %external_id, "POS order linked"),
            Ok(false) => {
                warn!(order_id = %order.id, %external_id, "Order already linked to a POS order")
            }
            Err(e) => {
                error!(order_id = %order.id, %external_id, error = %e, "Failed to store POS order id")
            }
        }
    }

    async fn dispatch_if_paid(
        &self,
        order: &Order,
        status: OrderStatus,
        settings: Option<&TenantSettings>,
    ) -> Option<OrderStatus> {
        if status != OrderStatus::Paid {
            return None;
        }
        match self.dispatch(order, settings).await {
            Ok(_) => Some(OrderStatus::Preparing),
            Err(DispatchError::NotConfigured { reason, .. }) => {
                info!(order_id = %order.id, %reason, "Delivery not dispatched automatically");
                None
            }
            Err(DispatchError::InProgress(_)) => {
                info!(order_id = %order.id, "Courier dispatch already in progress");
                None
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Delivery dispatch failed; order stays PAID");
                None
            }
        }
    }

    async fn cancel_if_canceled(&self, order: &Order, status: OrderStatus) {
        if status != OrderStatus::Canceled {
            return;
        }
        if let Some(delivery_id) = order.delivery_id.as_deref() {
            self.cancel_courier(order, delivery_id, "order canceled").await;
        }
    }

    async fn cancel_courier(&self, order: &Order, delivery_id: &str, reason: &str) {
        match self.clients.delivery.cancel(delivery_id, reason).await {
            Ok(()) => info!(order_id = %order.id, delivery_id, reason, "Courier canceled"),
            Err(e) => {
                warn!(order_id = %order.id, delivery_id, error = %e, "Courier cancellation failed")
            }
        }
    }

    async fn release_claim(&self, order_id: &str) {
        if let Err(e) = self.stores.orders.release_dispatch(order_id).await {
            warn!(order_id, error = %e, "Failed to release dispatch claim");
        }
    }

    /// Requests a courier and records the delivery on the order.
    ///
    /// The order is claimed before the provider is called, so concurrent
    /// dispatches for one order book at most one courier.
    pub async fn dispatch(
        &self,
        order: &Order,
        settings: Option<&TenantSettings>,
    ) -> Result<Delivery, DispatchError> {
        let not_configured = |reason: String| DispatchError::NotConfigured {
            tenant_id: order.tenant_id.clone(),
            reason,
        };

        let settings = settings.ok_or_else(|| not_configured("no tenant settings".into()))?;
        if !settings.delivery_enabled {
            return Err(not_configured("delivery is disabled".into()));
        }
        let pickup = settings
            .pickup
            .complete()
            .map_err(|field| not_configured(format!("pickup address is missing {field}")))?;

        let stale_before = Utc::now() - Duration::minutes(DISPATCH_CLAIM_TTL_MINUTES);
        match self.stores.orders.claim_dispatch(&order.id, stale_before).await {
            Ok(true) => {}
            Ok(false) => return Err(DispatchError::InProgress(order.id.clone())),
            Err(RepositoryError::NotFound) => return Err(DispatchError::NotFound(order.id.clone())),
            Err(e) => return Err(e.into()),
        }

        let dispatched = match self.clients.delivery.dispatch(order, &pickup).await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                self.release_claim(&order.id).await;
                return Err(match e {
                    ClientError::NotConfigured(reason) => not_configured(reason),
                    e => DispatchError::Provider(e),
                });
            }
        };

        let delivery = Delivery {
            id: dispatched.delivery_id,
            order_id: order.id.clone(),
            provider: dispatched.provider,
            tracking_url: dispatched.tracking_url,
            status: "dispatched".to_string(),
            created_at: Utc::now(),
        };
        match self.stores.orders.record_delivery_id(&delivery).await {
            Ok(true) => {
                info!(order_id = %order.id, delivery_id = %delivery.id, "Delivery dispatched");
                Ok(delivery)
            }
            Ok(false) => {
                self.cancel_courier(order, &delivery.id, "order already has a delivery")
                    .await;
                let existing = self.stores.orders.get_by_id(&order.id).await?.delivery_id;
                Err(DispatchError::AlreadyDispatched(existing.unwrap_or_default()))
            }
            Err(e) => {
                error!(order_id = %order.id, delivery_id = %delivery.id, error = %e, "Failed to record delivery");
                self.cancel_courier(order, &delivery.id, "delivery could not be recorded")
                    .await;
                self.release_claim(&order.id).await;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Customer, DropoffAddress, OrderDraft};

    fn order() -> Order {
        Order::create(
            "order-9",
            OrderDraft {
                tenant_id: "tenant-1".into(),
                currency: "EUR".into(),
                customer: Customer::default(),
                dropoff: DropoffAddress::default(),
                items: vec![],
                tax_cents: 0,
                delivery_fee_cents: 0,
                payment_provider: None,
            },
        )
    }

    #[test]
    fn test_pending_and_paid_are_silent() {
        assert!(notification_for(&order(), OrderStatus::Pending).is_none());
        assert!(notification_for(&order(), OrderStatus::Paid).is_none());
    }

    #[test]
    fn test_announced_statuses_have_messages() {
        for status in [
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
            OrderStatus::Canceled,
        ] {
            let message = notification_for(&order(), status).unwrap();
            assert!(message.body.contains("order-9"), "{status}");
            assert!(!message.body.contains("{order}"));
        }
    }

    #[test]
    fn test_pos_mapping() {
        assert_eq!(pos_status(OrderStatus::Pending), None);
        assert_eq!(pos_status(OrderStatus::Paid), Some("accepted"));
        assert_eq!(pos_status(OrderStatus::OutForDelivery), Some("dispatched"));
        assert_eq!(pos_status(OrderStatus::Canceled), Some("cancelled"));
    }
}
