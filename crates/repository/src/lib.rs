//! # Data Repository Layer
//!
//! This module provides repository traits for orders, deliveries and tenant
//! settings, with a PostgreSQL implementation ([`postgres`]) and an in-memory
//! implementation ([`memory`]) used by tests and local runs.
//!
//! The order repository never exposes a plain "set status" operation: the only
//! way to change a status is [`OrdersRepository::compare_and_set_status`],
//! which succeeds only if the stored status still equals the expected one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{Delivery, Order, OrderStatus, PaymentStatus, TenantSettings};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgDeliveriesRepository, PgOrdersRepository, PgTenantSettingsRepository};

/// SQLSTATE codes that indicate a condition worth retrying.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "53300", // too_many_connections
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
];

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// Failed to obtain a connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// The payment reference is already attached to another order.
    #[error("Payment reference {0} already belongs to another order")]
    DuplicatePaymentRef(String),
    /// A stored value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    /// Whether the failure is likely to go away on retry (connection loss,
    /// pool exhaustion, serialization conflicts).
    pub fn is_transient(&self) -> bool {
        match self {
            RepositoryError::Db(e) => is_transient_pg(e),
            RepositoryError::Pool(e) => match e {
                deadpool_postgres::PoolError::Backend(e) => is_transient_pg(e),
                deadpool_postgres::PoolError::Timeout(_) | deadpool_postgres::PoolError::Closed => {
                    true
                }
                _ => false,
            },
            RepositoryError::NotFound
            | RepositoryError::DuplicatePaymentRef(_)
            | RepositoryError::Corrupt(_) => false,
        }
    }
}

fn is_transient_pg(e: &tokio_postgres::Error) -> bool {
    if e.is_closed() {
        return true;
    }
    match e.code() {
        Some(state) => {
            let code = state.code();
            code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&code)
        }
        // No SQLSTATE means the server never answered: I/O or protocol failure.
        None => e.as_db_error().is_none(),
    }
}

/// # OrdersRepository
///
/// Repository interface for the order aggregate (order row plus its items).
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Insert a new order with its items.
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Get a full order by ID.
    async fn get_by_id(&self, order_id: &str) -> Result<Order, RepositoryError>;

    /// Look up the order a payment provider refers to. The merchant reference
    /// is the order ID echoed back by the provider.
    async fn find_by_merchant_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Atomically set `new` if the stored status is still `expected`.
    ///
    /// Returns `Ok(false)` when the status changed underneath the caller, and
    /// [`RepositoryError::NotFound`] when the order does not exist.
    async fn compare_and_set_status(
        &self,
        order_id: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool, RepositoryError>;

    /// Record the provider transaction id and outcome of a payment attempt.
    async fn record_payment_outcome(
        &self,
        order_id: &str,
        payment_ref: &str,
        outcome: PaymentStatus,
    ) -> Result<(), RepositoryError>;

    /// Reserve the order for a courier dispatch.
    ///
    /// Succeeds only while the order has no delivery and no other dispatch
    /// holds a claim made at or after `stale_before`. Returns `Ok(false)` when
    /// the order is taken, and [`RepositoryError::NotFound`] when it does not exist.
    async fn claim_dispatch(
        &self,
        order_id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Drop the dispatch claim after the provider call failed.
    async fn release_dispatch(&self, order_id: &str) -> Result<(), RepositoryError>;

    /// Store the delivery and attach its id to the order in one transaction,
    /// clearing the dispatch claim. Write-once: returns `Ok(false)` and writes
    /// nothing if the order already has a delivery.
    async fn record_delivery_id(&self, delivery: &Delivery) -> Result<bool, RepositoryError>;

    /// Store the POS order id. Write-once: returns `Ok(false)` if one is already set.
    async fn record_external_order_ref(
        &self,
        order_id: &str,
        external_ref: &str,
    ) -> Result<bool, RepositoryError>;
}

/// # DeliveriesRepository
///
/// Read access to dispatched courier jobs. Rows are written together with
/// the order through [`OrdersRepository::record_delivery_id`].
#[async_trait]
pub trait DeliveriesRepository: Send + Sync {
    async fn get_by_order_id(&self, order_id: &str) -> Result<Vec<Delivery>, RepositoryError>;
}

/// # TenantSettingsRepository
///
/// Per-tenant integration settings (pickup address, delivery and POS switches).
#[async_trait]
pub trait TenantSettingsRepository: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantSettings>, RepositoryError>;

    async fn upsert(&self, settings: &TenantSettings) -> Result<(), RepositoryError>;
}
