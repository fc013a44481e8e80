//! Storyous POS client: pushes paid orders into the tenant's delivery queue
//! and mirrors later status changes onto them.

use async_trait::async_trait;
use model::{Order, TenantSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{ClientError, PosClient, RetryPolicy, check_status};

const PROVIDER: &str = "storyous";

pub struct StoryousClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct StateUpdate<'a> {
    state: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewOrder<'a> {
    source_order_id: &'a str,
    currency: &'a str,
    total_price_cents: i64,
    customer: NewOrderCustomer<'a>,
    delivery_address: String,
    note: Option<&'a str>,
    items: Vec<NewOrderItem<'a>>,
}

#[derive(Debug, Serialize)]
struct NewOrderCustomer<'a> {
    name: &'a str,
    phone: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewOrderItem<'a> {
    name: &'a str,
    amount: i32,
    unit_price_cents: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedOrder {
    order_id: String,
}

impl StoryousClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_token: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
            retry,
        }
    }

    fn token(&self) -> Result<&str, ClientError> {
        self.api_token
            .as_deref()
            .ok_or_else(|| ClientError::NotConfigured("storyous_api_token is not set".into()))
    }

    /// URL of the delivery order collection of a tenant's Storyous place.
    fn orders_url(&self, settings: &TenantSettings) -> Result<String, ClientError> {
        let merchant_id = settings.storyous_merchant_id.as_deref().ok_or_else(|| {
            ClientError::NotConfigured(format!(
                "tenant {} has no Storyous merchant id",
                settings.tenant_id
            ))
        })?;
        let place_id = settings.storyous_place_id.as_deref().ok_or_else(|| {
            ClientError::NotConfigured(format!(
                "tenant {} has no Storyous place id",
                settings.tenant_id
            ))
        })?;
        Ok(format!(
            "{}/delivery/{}/{}/orders",
            self.base_url, merchant_id, place_id
        ))
    }

    fn state_url(&self, settings: &TenantSettings, external_order_id: &str) -> Result<String, ClientError> {
        Ok(format!("{}/{}/state", self.orders_url(settings)?, external_order_id))
    }
}

fn new_order(order: &Order) -> NewOrder<'_> {
    NewOrder {
        source_order_id: &order.id,
        currency: &order.currency,
        total_price_cents: order.total_cents,
        customer: NewOrderCustomer {
            name: &order.customer.name,
            phone: &order.customer.phone,
        },
        delivery_address: format!(
            "{}, {} {}",
            order.dropoff.street, order.dropoff.zip, order.dropoff.city
        ),
        note: order.dropoff.note.as_deref(),
        items: order
            .items
            .iter()
            .map(|item| NewOrderItem {
                name: &item.product_name,
                amount: item.quantity,
                unit_price_cents: item.unit_price_cents,
            })
            .collect(),
    }
}

#[async_trait]
impl PosClient for StoryousClient {
    #[instrument(skip_all, fields(tenant_id = %settings.tenant_id, order_id = %order.id))]
    async fn create_order(
        &self,
        settings: &TenantSettings,
        order: &Order,
    ) -> Result<String, ClientError> {
        let token = self.token()?;
        let url = self.orders_url(settings)?;
        let body = new_order(order);

        let (http, url, body) = (&self.http, &url, &body);
        let response = self
            .retry
            .run("storyous.create_order", ClientError::is_retryable, move || async move {
                let response = http
                    .post(url)
                    .bearer_auth(token)
                    .json(body)
                    .send()
                    .await
                    .map_err(ClientError::network(PROVIDER))?;
                check_status(PROVIDER, response).await
            })
            .await?;
        let created: CreatedOrder = response.json().await.map_err(|e| ClientError::Decode {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
        info!(external_order_id = %created.order_id, "Order pushed to POS");
        Ok(created.order_id)
    }

    #[instrument(skip(self, settings), fields(tenant_id = %settings.tenant_id))]
    async fn sync_status(
        &self,
        settings: &TenantSettings,
        external_order_id: &str,
        pos_status: &str,
    ) -> Result<(), ClientError> {
        let token = self.token()?;
        let url = self.state_url(settings, external_order_id)?;
        let body = StateUpdate { state: pos_status };

        let (http, url, body) = (&self.http, &url, &body);
        self.retry
            .run("storyous.sync_status", ClientError::is_retryable, move || async move {
                let response = http
                    .put(url)
                    .bearer_auth(token)
                    .json(body)
                    .send()
                    .await
                    .map_err(ClientError::network(PROVIDER))?;
                check_status(PROVIDER, response).await
            })
            .await?;
        debug!("POS status synced");
        Ok(())
    }
}
