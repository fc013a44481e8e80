//! Webhook processing pipeline shared by all providers: verify, parse, look
//! up the order, record the payment outcome, drive the state machine.

use std::fmt;
use std::sync::Arc;

use app_config::AppConfig;
use model::{OrderStatus, PaymentProvider, PaymentStatus};
use service::{OrderService, ServiceError};
use tracing::{debug, error, info, instrument, warn};

use crate::payload::parse;
use crate::signature::{SignatureEncoding, verify_signature};

/// Per-provider webhook secrets plus the skip-verification override.
#[derive(Clone, Default)]
pub struct WebhookSecrets {
    pub adyen: Option<String>,
    pub gopay: Option<String>,
    pub wepay: Option<String>,
    /// Accept every webhook without checking its signature. Never on by default.
    pub skip_verification: bool,
}

impl fmt::Debug for WebhookSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSecrets")
            .field("adyen", &self.adyen.as_ref().map(|_| "<redacted>"))
            .field("gopay", &self.gopay.as_ref().map(|_| "<redacted>"))
            .field("wepay", &self.wepay.as_ref().map(|_| "<redacted>"))
            .field("skip_verification", &self.skip_verification)
            .finish()
    }
}

impl WebhookSecrets {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            adyen: cfg.adyen_hmac_key.clone(),
            gopay: cfg.gopay_webhook_secret.clone(),
            wepay: cfg.wepay_webhook_secret.clone(),
            skip_verification: cfg.skip_signature_verification,
        }
    }

    fn secret(&self, provider: PaymentProvider) -> Option<&str> {
        match provider {
            PaymentProvider::Adyen => self.adyen.as_deref(),
            PaymentProvider::GoPay => self.gopay.as_deref(),
            PaymentProvider::WePay => self.wepay.as_deref(),
        }
    }

    /// Checks the signature header of a webhook. A missing secret or header fails closed.
    pub fn verify(&self, provider: PaymentProvider, body: &[u8], header: Option<&str>) -> bool {
        if self.skip_verification {
            warn!(%provider, "Webhook signature verification is DISABLED; accepting unverified request");
            return true;
        }
        let Some(secret) = self.secret(provider).filter(|s| !s.is_empty()) else {
            warn!(%provider, "No webhook secret configured; rejecting request");
            return false;
        };
        let Some(header) = header else {
            return false;
        };
        verify_signature(
            body,
            header,
            secret.as_bytes(),
            SignatureEncoding::for_provider(provider),
        )
    }
}

/// Why a well-formed, authenticated webhook changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event is not a payment outcome.
    NoPaymentOutcome,
    Malformed,
    UnknownOrder,
    /// The transition was already applied or is no longer legal.
    Duplicate,
    /// A non-transient failure; retrying would not help.
    Failed,
}

impl IgnoreReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            IgnoreReason::NoPaymentOutcome => "no_payment_outcome",
            IgnoreReason::Malformed => "malformed",
            IgnoreReason::UnknownOrder => "unknown_order",
            IgnoreReason::Duplicate => "duplicate",
            IgnoreReason::Failed => "failed",
        }
    }
}

/// Result of processing one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The order was moved; `status` is where it ended up after follow-ups.
    Applied { order_id: String, status: OrderStatus },
    Ignored(IgnoreReason),
    Unauthorized,
    /// Infrastructure failure; the provider should retry later.
    TransientFailure,
}

impl WebhookOutcome {
    /// Label used for the `webhook_events_total` metric.
    pub fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied { .. } => "applied",
            WebhookOutcome::Ignored(reason) => reason.as_str(),
            WebhookOutcome::Unauthorized => "unauthorized",
            WebhookOutcome::TransientFailure => "transient_failure",
        }
    }
}

fn failure(provider: PaymentProvider, step: &str, e: &ServiceError) -> WebhookOutcome {
    if e.is_transient() {
        warn!(%provider, step, error = %e, "Transient failure while processing webhook");
        WebhookOutcome::TransientFailure
    } else {
        error!(%provider, step, error = %e, "Webhook processing failed");
        WebhookOutcome::Ignored(IgnoreReason::Failed)
    }
}

pub struct WebhookProcessor {
    service: Arc<dyn OrderService>,
    secrets: WebhookSecrets,
}

impl WebhookProcessor {
    pub fn new(service: Arc<dyn OrderService>, secrets: WebhookSecrets) -> Self {
        Self { service, secrets }
    }

    /// Processes one delivery. `body` must be the raw request body.
    #[instrument(skip(self, body, signature))]
    pub async fn handle(
        &self,
        provider: PaymentProvider,
        body: &[u8],
        signature: Option<&str>,
    ) -> WebhookOutcome {
        if !self.secrets.verify(provider, body, signature) {
            warn!("Invalid webhook signature");
            return WebhookOutcome::Unauthorized;
        }

        let event = match parse(provider, body) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("Webhook carries no payment outcome");
                return WebhookOutcome::Ignored(IgnoreReason::NoPaymentOutcome);
            }
            Err(e) => {
                warn!(error = %e, "Malformed webhook payload");
                return WebhookOutcome::Ignored(IgnoreReason::Malformed);
            }
        };

        let order = match self
            .service
            .find_by_merchant_reference(&event.merchant_reference)
            .await
        {
            Ok(Some(order)) => order,
            Ok(None) => {
                info!(merchant_reference = %event.merchant_reference, "Webhook for unknown order");
                return WebhookOutcome::Ignored(IgnoreReason::UnknownOrder);
            }
            Err(e) => return failure(provider, "lookup", &e),
        };

        if let Some(amount) = event.amount_minor_units.filter(|a| *a != order.total_cents) {
            warn!(
                order_id = %order.id,
                reported = amount,
                expected = order.total_cents,
                "Webhook amount differs from order total"
            );
        }

        let outcome = PaymentStatus::from_success(event.success);
        if let Err(e) = self
            .service
            .record_payment_outcome(&order.id, &event.payment_ref, outcome)
            .await
        {
            return failure(provider, "record_payment", &e);
        }

        let target = if event.success {
            OrderStatus::Paid
        } else {
            OrderStatus::Canceled
        };
        match self.service.update_status(&order.id, target).await {
            Ok(updated) => {
                info!(
                    order_id = %updated.id,
                    event_type = %event.event_type,
                    payment_ref = %event.payment_ref,
                    status = %updated.status,
                    "Payment webhook applied"
                );
                WebhookOutcome::Applied {
                    order_id: updated.id,
                    status: updated.status,
                }
            }
            Err(e @ ServiceError::InvalidTransition { .. }) => {
                info!(order_id = %order.id, reason = %e, "Duplicate or out-of-order webhook ignored");
                WebhookOutcome::Ignored(IgnoreReason::Duplicate)
            }
            Err(ServiceError::NotFound(_)) => WebhookOutcome::Ignored(IgnoreReason::UnknownOrder),
            Err(e) => failure(provider, "update_status", &e),
        }
    }
}
