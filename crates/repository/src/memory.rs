//! In-memory store for orders, deliveries and tenant settings, with
//! thread-safe access. Used by tests and by `storage_backend = memory`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{Delivery, Order, OrderStatus, PaymentStatus, TenantSettings};
use tokio::sync::RwLock;

use crate::{
    DeliveriesRepository, OrdersRepository, RepositoryError, TenantSettingsRepository,
};

/// Thread-safe in-memory store implementing every repository trait.
///
/// Cloning shares the underlying maps. Locks are always taken in the order
/// orders, claims, deliveries.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    claims: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    deliveries: Arc<RwLock<Vec<Delivery>>>,
    tenants: Arc<RwLock<HashMap<String, TenantSettings>>>,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrdersRepository for MemoryStore {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut map = self.orders.write().await;
        if let Some(payment_ref) = &order.payment_ref {
            if map.values().any(|o| o.payment_ref.as_ref() == Some(payment_ref)) {
                return Err(RepositoryError::DuplicatePaymentRef(payment_ref.clone()));
            }
        }
        map.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_by_id(&self, order_id: &str) -> Result<Order, RepositoryError> {
        let map = self.orders.read().await;
        map.get(order_id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn find_by_merchant_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let map = self.orders.read().await;
        Ok(map.get(reference).cloned())
    }

    async fn compare_and_set_status(
        &self,
        order_id: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool, RepositoryError> {
        let mut map = self.orders.write().await;
        let order = map.get_mut(order_id).ok_or(RepositoryError::NotFound)?;
        if order.status != expected {
            return Ok(false);
        }
        order.status = new;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_payment_outcome(
        &self,
        order_id: &str,
        payment_ref: &str,
        outcome: PaymentStatus,
    ) -> Result<(), RepositoryError> {
        let mut map = self.orders.write().await;
        let taken = map
            .values()
            .any(|o| o.id != order_id && o.payment_ref.as_deref() == Some(payment_ref));
        if taken {
            return Err(RepositoryError::DuplicatePaymentRef(payment_ref.to_string()));
        }
        let order = map.get_mut(order_id).ok_or(RepositoryError::NotFound)?;
        order.payment_ref = Some(payment_ref.to_string());
        order.payment_status = outcome;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_dispatch(
        &self,
        order_id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let orders = self.orders.read().await;
        let order = orders.get(order_id).ok_or(RepositoryError::NotFound)?;
        if order.delivery_id.is_some() {
            return Ok(false);
        }
        let mut claims = self.claims.write().await;
        if claims.get(order_id).is_some_and(|at| *at >= stale_before) {
            return Ok(false);
        }
        claims.insert(order_id.to_string(), Utc::now());
        Ok(true)
    }

    async fn release_dispatch(&self, order_id: &str) -> Result<(), RepositoryError> {
        self.claims.write().await.remove(order_id);
        Ok(())
    }

    async fn record_delivery_id(&self, delivery: &Delivery) -> Result<bool, RepositoryError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&delivery.order_id)
            .ok_or(RepositoryError::NotFound)?;
        if order.delivery_id.is_some() {
            return Ok(false);
        }
        let mut claims = self.claims.write().await;
        let mut deliveries = self.deliveries.write().await;
        if deliveries.iter().any(|d| d.order_id == delivery.order_id) {
            return Ok(false);
        }

        deliveries.push(delivery.clone());
        claims.remove(&delivery.order_id);
        order.delivery_id = Some(delivery.id.clone());
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_external_order_ref(
        &self,
        order_id: &str,
        external_ref: &str,
    ) -> Result<bool, RepositoryError> {
        let mut map = self.orders.write().await;
        let order = map.get_mut(order_id).ok_or(RepositoryError::NotFound)?;
        if order.external_order_ref.is_some() {
            return Ok(false);
        }
        order.external_order_ref = Some(external_ref.to_string());
        order.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl DeliveriesRepository for MemoryStore {
    async fn get_by_order_id(&self, order_id: &str) -> Result<Vec<Delivery>, RepositoryError> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .iter()
            .filter(|d| d.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TenantSettingsRepository for MemoryStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantSettings>, RepositoryError> {
        Ok(self.tenants.read().await.get(tenant_id).cloned())
    }

    async fn upsert(&self, settings: &TenantSettings) -> Result<(), RepositoryError> {
        self.tenants
            .write()
            .await
            .insert(settings.tenant_id.clone(), settings.clone());
        Ok(())
    }
}
