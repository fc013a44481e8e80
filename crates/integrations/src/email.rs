//! Customer notification senders.

use async_trait::async_trait;
use model::{Order, OrderStatus};
use serde::Serialize;
use tracing::{debug, info};

use crate::{ClientError, NotificationSender, StatusMessage, check_status};

const PROVIDER: &str = "email";

/// Sends status emails through an HTTP mail API (`POST {url}` with a bearer token).
pub struct HttpEmailSender {
    http: reqwest::Client,
    url: String,
    api_token: Option<String>,
    from: String,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpEmailSender {
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        api_token: Option<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            api_token,
            from: from.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for HttpEmailSender {
    async fn send_status_update(
        &self,
        order: &Order,
        status: OrderStatus,
        message: &StatusMessage,
    ) -> Result<(), ClientError> {
        if order.customer.email.trim().is_empty() {
            return Err(ClientError::NotConfigured(format!(
                "order {} has no customer email",
                order.id
            )));
        }

        let body = EmailRequest {
            from: &self.from,
            to: &order.customer.email,
            subject: &message.subject,
            text: &message.body,
        };
        let mut request = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(ClientError::network(PROVIDER))?;
        check_status(PROVIDER, response).await?;
        debug!(order_id = %order.id, %status, "Status email sent");
        Ok(())
    }
}

/// Logs notifications instead of sending them; used when no mail API is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send_status_update(
        &self,
        order: &Order,
        status: OrderStatus,
        message: &StatusMessage,
    ) -> Result<(), ClientError> {
        info!(
            order_id = %order.id,
            to = %order.customer.email,
            %status,
            subject = %message.subject,
            "Status notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Customer, DropoffAddress, OrderDraft};

    fn order(email: &str) -> Order {
        Order::create(
            "order-7",
            OrderDraft {
                tenant_id: "tenant-1".into(),
                currency: "CZK".into(),
                customer: Customer {
                    name: "Petr".into(),
                    email: email.into(),
                    phone: "+420777000111".into(),
                },
                dropoff: DropoffAddress::default(),
                items: vec![],
                tax_cents: 0,
                delivery_fee_cents: 0,
                payment_provider: None,
            },
        )
    }

    fn message() -> StatusMessage {
        StatusMessage {
            subject: "Your order is ready".into(),
            body: "Pick it up".into(),
        }
    }

    #[tokio::test]
    async fn test_log_sender_always_succeeds() {
        LogNotificationSender
            .send_status_update(&order("petr@example.com"), OrderStatus::Ready, &message())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_sender_rejects_missing_email() {
        let sender = HttpEmailSender::new(
            reqwest::Client::new(),
            "https://mail.test/send",
            None,
            "orders@pizza.test",
        );
        let err = sender
            .send_status_update(&order(" "), OrderStatus::Ready, &message())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConfigured(_)));
    }
}
