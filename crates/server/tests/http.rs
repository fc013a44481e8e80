use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use integrations::{
    ClientError, DeliveryClient, DispatchedDelivery, LogNotificationSender, PosClient,
};
use model::{
    Customer, Delivery, DropoffAddress, Order, OrderDraft, OrderItem, OrderStatus, PaymentProvider,
    PaymentStatus, PickupAddress, PickupLocation, TenantSettings,
};
use repository::{MemoryStore, OrdersRepository, RepositoryError, TenantSettingsRepository};
use serde_json::{Value, json};
use server::Server;
use service::{Collaborators, OrderServiceImpl, Stores};
use tower::ServiceExt;
use webhooks::{
    SignatureEncoding, WebhookProcessor, WebhookSecrets, compute_signature, format_signature,
};

const SECRET: &str = "whsec-test";

struct NoPos;

#[async_trait]
impl PosClient for NoPos {
    async fn create_order(&self, _: &TenantSettings, order: &Order) -> Result<String, ClientError> {
        Ok(format!("sty-{}", order.id))
    }

    async fn sync_status(&self, _: &TenantSettings, _: &str, _: &str) -> Result<(), ClientError> {
        Ok(())
    }
}

struct Wolt;

#[async_trait]
impl DeliveryClient for Wolt {
    async fn dispatch(
        &self,
        order: &Order,
        _: &PickupLocation,
    ) -> Result<DispatchedDelivery, ClientError> {
        Ok(DispatchedDelivery {
            provider: "wolt".into(),
            delivery_id: format!("wolt-{}", order.id),
            tracking_url: Some("https://track.test/abc".into()),
        })
    }

    async fn cancel(&self, _: &str, _: &str) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Delegates to a memory store but fails every lookup with a pool timeout.
struct FlakyOrders(MemoryStore);

fn pool_timeout() -> RepositoryError {
    RepositoryError::Pool(deadpool_postgres::PoolError::Timeout(
        deadpool::managed::TimeoutType::Wait,
    ))
}

#[async_trait]
impl OrdersRepository for FlakyOrders {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        OrdersRepository::insert(&self.0, order).await
    }
    async fn get_by_id(&self, id: &str) -> Result<Order, RepositoryError> {
        self.0.get_by_id(id).await
    }
    async fn find_by_merchant_reference(&self, _: &str) -> Result<Option<Order>, RepositoryError> {
        Err(pool_timeout())
    }
    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool, RepositoryError> {
        self.0.compare_and_set_status(id, expected, new).await
    }
    async fn record_payment_outcome(
        &self,
        id: &str,
        payment_ref: &str,
        outcome: PaymentStatus,
    ) -> Result<(), RepositoryError> {
        self.0.record_payment_outcome(id, payment_ref, outcome).await
    }
    async fn claim_dispatch(&self, id: &str, stale_before: DateTime<Utc>) -> Result<bool, RepositoryError> {
        self.0.claim_dispatch(id, stale_before).await
    }
    async fn release_dispatch(&self, id: &str) -> Result<(), RepositoryError> {
        self.0.release_dispatch(id).await
    }
    async fn record_delivery_id(&self, delivery: &Delivery) -> Result<bool, RepositoryError> {
        self.0.record_delivery_id(delivery).await
    }
    async fn record_external_order_ref(&self, id: &str, r: &str) -> Result<bool, RepositoryError> {
        self.0.record_external_order_ref(id, r).await
    }
}

fn order(id: &str) -> Order {
    Order::create(
        id,
        OrderDraft {
            tenant_id: "tenant-1".into(),
            currency: "EUR".into(),
            customer: Customer {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                phone: "+358401234567".into(),
            },
            dropoff: DropoffAddress {
                street: "Mannerheimintie 1".into(),
                city: "Helsinki".into(),
                zip: "00100".into(),
                note: None,
            },
            items: vec![OrderItem {
                product_name: "Margherita".into(),
                unit_price_cents: 1100,
                quantity: 1,
            }],
            tax_cents: 200,
            delivery_fee_cents: 200,
            payment_provider: None,
        },
    )
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    OrdersRepository::insert(&store, &order("order-1")).await.unwrap();
    store
        .upsert(&TenantSettings {
            tenant_id: "tenant-1".into(),
            pickup: PickupAddress {
                name: Some("Pizza Roma".into()),
                street: Some("Aleksanterinkatu 5".into()),
                city: Some("Helsinki".into()),
                zip: Some("00100".into()),
                phone: Some("+358400000000".into()),
            },
            delivery_enabled: true,
            ..Default::default()
        })
        .await
        .unwrap();
    store
}

fn build_app(stores: Stores) -> Router {
    let service = Arc::new(OrderServiceImpl::new(
        stores,
        Collaborators {
            notifier: Arc::new(LogNotificationSender),
            pos: Arc::new(NoPos),
            delivery: Arc::new(Wolt),
        },
    ));
    let secrets = WebhookSecrets {
        adyen: Some(SECRET.into()),
        gopay: Some(SECRET.into()),
        wepay: Some(SECRET.into()),
        skip_verification: false,
    };
    let processor = Arc::new(WebhookProcessor::new(service.clone(), secrets));
    Server::new(0, Duration::from_secs(1), service, processor)
        .unwrap()
        .router()
}

fn webhook(provider: PaymentProvider, body: &[u8], signature: Option<String>) -> Request<Body> {
    let mut builder = Request::post(format!("/webhooks/{provider}"))
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(webhooks::signature_header(provider), signature);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

fn sign(provider: PaymentProvider, body: &[u8]) -> Option<String> {
    Some(format_signature(
        &compute_signature(body, SECRET.as_bytes()),
        SignatureEncoding::for_provider(provider),
    ))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn adyen_authorisation() -> Vec<u8> {
    json!({
        "live": "false",
        "notificationItems": [{
            "NotificationRequestItem": {
                "eventCode": "AUTHORISATION",
                "success": "true",
                "pspReference": "psp-1",
                "merchantReference": "order-1",
                "amount": { "value": 1500, "currency": "EUR" }
            }
        }]
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn adyen_payment_then_duplicate() {
    let store = seeded_store().await;
    let app = build_app(Stores::memory(&store));
    let body = adyen_authorisation();

    let (status, text) = send(&app, webhook(PaymentProvider::Adyen, &body, sign(PaymentProvider::Adyen, &body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "[accepted]");

    let stored = store.get_by_id("order-1").await.unwrap();
    assert_eq!(stored.status, OrderStatus::Preparing);
    assert_eq!(stored.payment_ref.as_deref(), Some("psp-1"));
    assert_eq!(stored.payment_status, PaymentStatus::Success);
    assert_eq!(stored.delivery_id.as_deref(), Some("wolt-order-1"));

    let (status, text) = send(&app, webhook(PaymentProvider::Adyen, &body, sign(PaymentProvider::Adyen, &body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "[accepted]");
    assert_eq!(store.get_by_id("order-1").await.unwrap().status, OrderStatus::Preparing);
}

#[tokio::test]
async fn gopay_cancellation() {
    let store = seeded_store().await;
    let app = build_app(Stores::memory(&store));
    let body = json!({"id": 3000006620_i64, "order_number": "order-1", "state": "CANCELED"})
        .to_string()
        .into_bytes();

    let (status, text) = send(&app, webhook(PaymentProvider::GoPay, &body, sign(PaymentProvider::GoPay, &body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "OK");

    let stored = store.get_by_id("order-1").await.unwrap();
    assert_eq!(stored.status, OrderStatus::Canceled);
    assert_eq!(stored.delivery_id, None);
}

#[tokio::test]
async fn tampered_and_missing_signatures_are_rejected() {
    let store = seeded_store().await;
    let app = build_app(Stores::memory(&store));
    let body = adyen_authorisation();
    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] ^= 0x01;

    let (status, _) = send(&app, webhook(PaymentProvider::Adyen, &tampered, sign(PaymentProvider::Adyen, &body))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, webhook(PaymentProvider::Adyen, &body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(store.get_by_id("order-1").await.unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn wepay_envelopes() {
    let store = seeded_store().await;
    let app = build_app(Stores::memory(&store));
    let body = json!({"topic": "payments.completed", "payload": {"id": "pay-1", "reference_id": "order-404"}})
        .to_string()
        .into_bytes();

    let (status, text) = send(&app, webhook(PaymentProvider::WePay, &body, sign(PaymentProvider::WePay, &body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({"status": "accepted"}));

    let flaky = Stores {
        orders: Arc::new(FlakyOrders(store.clone())),
        ..Stores::memory(&store)
    };
    let app = build_app(flaky);
    let (status, text) = send(&app, webhook(PaymentProvider::WePay, &body, sign(PaymentProvider::WePay, &body))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({"status": "error"}));
}

#[tokio::test]
async fn admin_status_updates() {
    let store = seeded_store().await;
    let app = build_app(Stores::memory(&store));

    let patch = |status: &str| {
        Request::patch("/api/orders/order-1/status")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "status": status }).to_string()))
            .unwrap()
    };

    let (status, text) = send(&app, patch("READY")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        serde_json::from_str::<Value>(&text).unwrap(),
        json!({"error": "Cannot transition from PENDING to READY"})
    );

    let (status, text) = send(&app, patch("CANCELED")).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["status"], "CANCELED");

    let missing = Request::get("/api/orders/nope").body(Body::empty()).unwrap();
    let (status, _) = send(&app, missing).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_dispatch() {
    let store = seeded_store().await;
    let app = build_app(Stores::memory(&store));
    let dispatch = || {
        Request::post("/api/orders/order-1/dispatch")
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(&app, dispatch()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    store
        .compare_and_set_status("order-1", OrderStatus::Pending, OrderStatus::Paid)
        .await
        .unwrap();
    let (status, text) = send(&app, dispatch()).await;
    assert_eq!(status, StatusCode::OK);
    let delivery: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(delivery["id"], "wolt-order-1");
    assert_eq!(store.get_by_id("order-1").await.unwrap().status, OrderStatus::Preparing);

    let list = Request::get("/api/orders/order-1/deliveries").body(Body::empty()).unwrap();
    let (status, text) = send(&app, list).await;
    assert_eq!(status, StatusCode::OK);
    let deliveries: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(deliveries.as_array().map(Vec::len), Some(1));
    assert_eq!(deliveries[0]["tracking_url"], "https://track.test/abc");
}

#[tokio::test]
async fn health_and_metrics() {
    let store = seeded_store().await;
    let app = build_app(Stores::memory(&store));

    let (status, text) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "OK");

    let body = adyen_authorisation();
    send(&app, webhook(PaymentProvider::Adyen, &body, None)).await;

    let (status, text) = send(&app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("webhook_events_total"));
    assert!(text.contains(r#"outcome="unauthorized""#));
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn metrics_are_labelled_by_route_template() {
    let store = seeded_store().await;
    OrdersRepository::insert(&store, &order("order-2")).await.unwrap();
    let app = build_app(Stores::memory(&store));

    for id in ["order-1", "order-2"] {
        let (status, _) = send(&app, Request::get(format!("/api/orders/{id}")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
    }
    send(&app, Request::get("/no/such/route").body(Body::empty()).unwrap()).await;

    let (_, text) = send(&app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
    let series: Vec<&str> = text
        .lines()
        .filter(|l| l.starts_with("http_requests_total{"))
        .collect();
    assert!(series.iter().all(|l| !l.contains("order-") && !l.contains("/no/such/route")), "{series:?}");

    let orders: Vec<&&str> = series
        .iter()
        .filter(|l| l.contains(r#"endpoint="/api/orders/{id}""#))
        .collect();
    assert_eq!(orders.len(), 1, "{series:?}");
    assert!(orders[0].contains(r#"status="200""#));
    assert!(orders[0].ends_with(" 2"));
}
