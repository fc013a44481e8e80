//! Wolt Drive client (venueless API): delivery fee quote, delivery order
//! creation and cancellation.

use async_trait::async_trait;
use model::{Order, PickupLocation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    ClientError, DeliveryClient, DispatchedDelivery, RetryPolicy, check_status,
};

const PROVIDER: &str = "wolt";

/// Wolt Drive REST client.
pub struct WoltDriveClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    merchant_id: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct Location {
    formatted_address: String,
}

#[derive(Debug, Serialize)]
struct ContactDetails {
    name: String,
    phone_number: String,
    send_tracking_link_sms: bool,
}

#[derive(Debug, Serialize)]
struct Stop {
    location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_details: Option<ContactDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct Money {
    amount: i64,
    currency: String,
}

#[derive(Debug, Serialize)]
struct Parcel {
    count: i32,
    description: String,
}

#[derive(Debug, Serialize)]
struct FeeRequest {
    pickup: Stop,
    dropoff: Stop,
}

#[derive(Debug, Serialize)]
struct DeliveryOrderRequest {
    pickup: Stop,
    dropoff: Stop,
    price: Money,
    merchant_order_reference_id: String,
    contents: Vec<Parcel>,
    is_no_contact: bool,
}

#[derive(Debug, Deserialize)]
struct FeeResponse {
    fee: FeeAmount,
    #[serde(default)]
    time_estimate_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FeeAmount {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct DeliveryOrderResponse {
    id: String,
    #[serde(default)]
    tracking: Option<Tracking>,
}

#[derive(Debug, Deserialize)]
struct Tracking {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    reason: &'a str,
}

impl WoltDriveClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        merchant_id: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            merchant_id,
            retry,
        }
    }

    fn credentials(&self) -> Result<(&str, &str), ClientError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ClientError::NotConfigured("wolt_api_key is not set".into()))?;
        let merchant_id = self
            .merchant_id
            .as_deref()
            .ok_or_else(|| ClientError::NotConfigured("wolt_merchant_id is not set".into()))?;
        Ok((api_key, merchant_id))
    }

    /// Sends a request built by `build`, retrying transient failures.
    async fn execute<B>(&self, operation: &str, build: B) -> Result<reqwest::Response, ClientError>
    where
        B: Fn() -> reqwest::RequestBuilder,
    {
        let build = &build;
        self.retry
            .run(operation, ClientError::is_retryable, move || async move {
                let response = build()
                    .send()
                    .await
                    .map_err(ClientError::network(PROVIDER))?;
                check_status(PROVIDER, response).await
            })
            .await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        response.json::<T>().await.map_err(|e| ClientError::Decode {
            provider: PROVIDER,
            message: e.to_string(),
        })
    }

    /// Asks Wolt for the delivery fee; also validates that both addresses are serviceable.
    #[instrument(skip_all, fields(order_id = %order.id))]
    async fn quote(&self, order: &Order, pickup: &PickupLocation) -> Result<(), ClientError> {
        let (api_key, merchant_id) = self.credentials()?;
        let url = format!("{}/merchants/{}/delivery-fee", self.base_url, merchant_id);
        let body = FeeRequest {
            pickup: pickup_stop(pickup),
            dropoff: dropoff_stop(order),
        };

        let response = self
            .execute("wolt.quote", || self.http.post(&url).bearer_auth(api_key).json(&body))
            .await?;
        let fee: FeeResponse = Self::decode(response).await?;
        info!(
            fee = fee.fee.amount,
            currency = %fee.fee.currency,
            eta_minutes = ?fee.time_estimate_minutes,
            "Wolt delivery quoted"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(order_id = %order.id))]
    async fn create(
        &self,
        order: &Order,
        pickup: &PickupLocation,
    ) -> Result<DispatchedDelivery, ClientError> {
        let (api_key, merchant_id) = self.credentials()?;
        let url = format!("{}/merchants/{}/delivery-order", self.base_url, merchant_id);
        let body = DeliveryOrderRequest {
            pickup: pickup_stop(pickup),
            dropoff: dropoff_stop(order),
            price: Money {
                amount: order.total_cents,
                currency: order.currency.clone(),
            },
            merchant_order_reference_id: order.id.clone(),
            contents: order
                .items
                .iter()
                .map(|item| Parcel {
                    count: item.quantity,
                    description: item.product_name.clone(),
                })
                .collect(),
            is_no_contact: false,
        };

        let response = self
            .execute("wolt.create_delivery", || {
                self.http.post(&url).bearer_auth(api_key).json(&body)
            })
            .await?;
        let created: DeliveryOrderResponse = Self::decode(response).await?;
        Ok(DispatchedDelivery {
            provider: PROVIDER.to_string(),
            delivery_id: created.id,
            tracking_url: created.tracking.and_then(|t| t.url),
        })
    }
}

fn pickup_stop(pickup: &PickupLocation) -> Stop {
    Stop {
        location: Location {
            formatted_address: format!("{}, {} {}", pickup.street, pickup.zip, pickup.city),
        },
        contact_details: Some(ContactDetails {
            name: pickup.name.clone(),
            phone_number: pickup.phone.clone(),
            send_tracking_link_sms: false,
        }),
        comment: None,
    }
}

fn dropoff_stop(order: &Order) -> Stop {
    Stop {
        location: Location {
            formatted_address: format!(
                "{}, {} {}",
                order.dropoff.street, order.dropoff.zip, order.dropoff.city
            ),
        },
        contact_details: Some(ContactDetails {
            name: order.customer.name.clone(),
            phone_number: order.customer.phone.clone(),
            send_tracking_link_sms: true,
        }),
        comment: order.dropoff.note.clone(),
    }
}

#[async_trait]
impl DeliveryClient for WoltDriveClient {
    async fn dispatch(
        &self,
        order: &Order,
        pickup: &PickupLocation,
    ) -> Result<DispatchedDelivery, ClientError> {
        self.quote(order, pickup).await?;
        let delivery = self.create(order, pickup).await?;
        info!(
            order_id = %order.id,
            delivery_id = %delivery.delivery_id,
            "Wolt delivery created"
        );
        Ok(delivery)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, delivery_id: &str, reason: &str) -> Result<(), ClientError> {
        let (api_key, _) = self.credentials()?;
        let url = format!("{}/order/{}/status/cancel", self.base_url, delivery_id);
        let body = CancelRequest { reason };

        self.execute("wolt.cancel_delivery", || {
            self.http.patch(&url).bearer_auth(api_key).json(&body)
        })
        .await?;
        info!("Wolt delivery canceled");
        Ok(())
    }
}
