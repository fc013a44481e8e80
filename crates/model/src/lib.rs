use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OrderStatus: lifecycle state of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Canceled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Canceled,
    ];

    /// Wire/database representation, e.g. `OUT_FOR_DELIVERY`.
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::Ready => "READY",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant: {}", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// PaymentStatus: outcome of the latest payment attempt, independent of [`OrderStatus`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub const fn from_success(success: bool) -> Self {
        if success {
            PaymentStatus::Success
        } else {
            PaymentStatus::Failed
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// PaymentProvider: the payment gateways the platform accepts webhooks from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Adyen,
    GoPay,
    WePay,
}

impl PaymentProvider {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentProvider::Adyen => "adyen",
            PaymentProvider::GoPay => "gopay",
            PaymentProvider::WePay => "wepay",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adyen" => Ok(PaymentProvider::Adyen),
            "gopay" => Ok(PaymentProvider::GoPay),
            "wepay" => Ok(PaymentProvider::WePay),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Customer: contact snapshot taken at checkout.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// DropoffAddress: where the courier delivers the order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DropoffAddress {
    pub street: String,
    pub city: String,
    pub zip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// OrderItem: product snapshot at order time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub product_name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
}

impl OrderItem {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

/// OrderDraft: checkout input from which an [`Order`] is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderDraft {
    pub tenant_id: String,
    pub currency: String,
    pub customer: Customer,
    pub dropoff: DropoffAddress,
    pub items: Vec<OrderItem>,
    pub tax_cents: i64,
    pub delivery_fee_cents: i64,
    #[serde(default)]
    pub payment_provider: Option<PaymentProvider>,
}

/// Order: the aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub id: String,
    pub tenant_id: String,
    pub status: OrderStatus,
    pub currency: String,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    pub payment_provider: Option<PaymentProvider>,
    pub payment_ref: Option<String>,
    pub payment_status: PaymentStatus,
    pub delivery_id: Option<String>,
    pub external_order_ref: Option<String>,
    pub customer: Customer,
    pub dropoff: DropoffAddress,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a PENDING order, computing the totals from the line items once.
    pub fn create(id: impl Into<String>, draft: OrderDraft) -> Self {
        let subtotal_cents: i64 = draft.items.iter().map(OrderItem::line_total_cents).sum();
        let now = Utc::now();
        Self {
            id: id.into(),
            tenant_id: draft.tenant_id,
            status: OrderStatus::Pending,
            currency: draft.currency,
            subtotal_cents,
            tax_cents: draft.tax_cents,
            delivery_fee_cents: draft.delivery_fee_cents,
            total_cents: subtotal_cents + draft.tax_cents + draft.delivery_fee_cents,
            payment_provider: draft.payment_provider,
            payment_ref: None,
            payment_status: PaymentStatus::Pending,
            delivery_id: None,
            external_order_ref: None,
            customer: draft.customer,
            dropoff: draft.dropoff,
            items: draft.items,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Delivery: a courier job dispatched for an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub order_id: String,
    pub provider: String,
    pub tracking_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// PickupAddress: tenant-configured pickup point; every field is required for dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PickupAddress {
    pub name: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
}

/// PickupLocation: a fully configured [`PickupAddress`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PickupLocation {
    pub name: String,
    pub street: String,
    pub city: String,
    pub zip: String,
    pub phone: String,
}

impl PickupAddress {
    /// Returns the complete location, or the name of the first missing field.
    pub fn complete(&self) -> Result<PickupLocation, &'static str> {
        fn field(value: &Option<String>, name: &'static str) -> Result<String, &'static str> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(name)
        }

        Ok(PickupLocation {
            name: field(&self.name, "name")?,
            street: field(&self.street, "street")?,
            city: field(&self.city, "city")?,
            zip: field(&self.zip, "zip")?,
            phone: field(&self.phone, "phone")?,
        })
    }
}

/// TenantSettings: per-tenant integration configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantSettings {
    pub tenant_id: String,
    pub pickup: PickupAddress,
    pub delivery_enabled: bool,
    pub pos_enabled: bool,
    pub storyous_merchant_id: Option<String>,
    pub storyous_place_id: Option<String>,
}

/// PaymentEvent: provider-agnostic result of parsing a payment webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentEvent {
    pub provider: PaymentProvider,
    pub event_type: String,
    pub success: bool,
    pub payment_ref: String,
    pub merchant_reference: String,
    pub amount_minor_units: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_draft() -> OrderDraft {
        OrderDraft {
            tenant_id: "tenant-1".to_string(),
            currency: "CZK".to_string(),
            customer: Customer {
                name: "Jana Nováková".to_string(),
                email: "jana@example.com".to_string(),
                phone: "+420600000000".to_string(),
            },
            dropoff: DropoffAddress {
                street: "Vinohradská 12".to_string(),
                city: "Praha".to_string(),
                zip: "12000".to_string(),
                note: None,
            },
            items: vec![
                OrderItem {
                    product_name: "Margherita".to_string(),
                    unit_price_cents: 500,
                    quantity: 2,
                },
                OrderItem {
                    product_name: "Cola".to_string(),
                    unit_price_cents: 100,
                    quantity: 1,
                },
            ],
            tax_cents: 200,
            delivery_fee_cents: 200,
            payment_provider: Some(PaymentProvider::Adyen),
        }
    }

    #[test]
    fn test_create_computes_totals() {
        let order = Order::create("order-1", sample_draft());
        assert_eq!(order.subtotal_cents, 1100);
        assert_eq!(order.total_cents, 1500);
        assert_eq!(order.tax_cents + order.delivery_fee_cents, 400);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&OrderStatus::OutForDelivery).unwrap();
        assert_eq!(json, "\"OUT_FOR_DELIVERY\"");
        let parsed: OrderStatus = serde_json::from_str("\"CANCELED\"").unwrap();
        assert_eq!(parsed, OrderStatus::Canceled);
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_pickup_address_completeness() {
        let mut pickup = PickupAddress {
            name: Some("Pizza Roma".to_string()),
            street: Some("Karlova 1".to_string()),
            city: Some("Praha".to_string()),
            zip: Some("11000".to_string()),
            phone: Some("  ".to_string()),
        };
        assert_eq!(pickup.complete(), Err("phone"));

        pickup.phone = Some("+420111222333".to_string());
        let location = pickup.complete().unwrap();
        assert_eq!(location.street, "Karlova 1");
    }
}
