use integrations::ClientError;
use model::OrderStatus;
use repository::RepositoryError;
use thiserror::Error;

/// Errors returned by [`crate::OrderService`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Order {0} not found")]
    NotFound(String),
    /// The requested move is not in the transition table, or another writer
    /// changed the status first.
    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Database error: {0}")]
    Db(#[from] RepositoryError),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Db(e) => e.is_transient(),
            ServiceError::NotFound(_) | ServiceError::InvalidTransition { .. } => false,
        }
    }
}

/// Why a delivery could not be dispatched.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Order {0} not found")]
    NotFound(String),
    #[error("Order is {0}; only PAID orders can be dispatched")]
    NotPaid(OrderStatus),
    #[error("Order already has delivery {0}")]
    AlreadyDispatched(String),
    #[error("A courier dispatch is already in progress for order {0}")]
    InProgress(String),
    /// Delivery disabled, pickup address incomplete or provider credentials missing.
    #[error("Delivery is not configured for tenant {tenant_id}: {reason}")]
    NotConfigured { tenant_id: String, reason: String },
    #[error("Delivery provider failed: {0}")]
    Provider(#[source] ClientError),
    #[error("Database error: {0}")]
    Db(#[from] RepositoryError),
}
