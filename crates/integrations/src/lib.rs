//! Outbound integrations consumed by the order lifecycle: courier dispatch
//! (Wolt Drive), POS status sync (Storyous) and customer notifications.
//!
//! Each integration is a trait so the lifecycle can be exercised with fakes;
//! the production implementations are thin `reqwest` clients that run every
//! call through the shared [`RetryPolicy`].

use async_trait::async_trait;
use model::{Order, OrderStatus, PickupLocation, TenantSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod email;
pub mod retry;
pub mod storyous;
pub mod wolt;

pub use email::{HttpEmailSender, LogNotificationSender};
pub use retry::RetryPolicy;
pub use storyous::StoryousClient;
pub use wolt::WoltDriveClient;

/// Error type shared by all outbound clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (connect failure, timeout, DNS).
    #[error("{provider} request failed: {source}")]
    Network {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// The provider answered with a non-success status.
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    /// The provider answered 2xx but the body did not match the expected shape.
    #[error("{provider} response could not be decoded: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
    /// Credentials or tenant settings required for the call are missing.
    #[error("{0}")]
    NotConfigured(String),
}

impl ClientError {
    /// Network errors, 5xx and 429 are worth retrying; everything else is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network { source, .. } => !source.is_builder(),
            ClientError::Status { status, .. } => *status >= 500 || *status == 429,
            ClientError::Decode { .. } | ClientError::NotConfigured(_) => false,
        }
    }

    pub(crate) fn network(provider: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| ClientError::Network { provider, source }
    }
}

/// Reads a response, turning non-2xx statuses into [`ClientError::Status`].
pub(crate) async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}

/// A courier job accepted by the delivery provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchedDelivery {
    pub provider: String,
    pub delivery_id: String,
    pub tracking_url: Option<String>,
}

/// Subject and body of a customer-facing status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub subject: String,
    pub body: String,
}

/// Requests and cancels courier assignments.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn dispatch(
        &self,
        order: &Order,
        pickup: &PickupLocation,
    ) -> Result<DispatchedDelivery, ClientError>;

    async fn cancel(&self, delivery_id: &str, reason: &str) -> Result<(), ClientError>;
}

/// Pushes orders into the tenant's POS and mirrors their status there.
#[async_trait]
pub trait PosClient: Send + Sync {
    /// Creates the order in the POS and returns the POS order id.
    async fn create_order(
        &self,
        settings: &TenantSettings,
        order: &Order,
    ) -> Result<String, ClientError>;

    async fn sync_status(
        &self,
        settings: &TenantSettings,
        external_order_id: &str,
        pos_status: &str,
    ) -> Result<(), ClientError>;
}

/// Sends status updates to the customer. Best-effort.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_status_update(
        &self,
        order: &Order,
        status: OrderStatus,
        message: &StatusMessage,
    ) -> Result<(), ClientError>;
}

/// Builds the `reqwest` client shared by the integrations.
pub fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}
