//! Provider payloads and their normalization into [`PaymentEvent`].
//!
//! Each provider's JSON is decoded into its own variant of [`ProviderPayload`];
//! provider field names stay inside this module. The vocabulary mapping
//! (which event code or state means success) is a static table per provider.

use model::{PaymentEvent, PaymentProvider};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// What an event code or state means for the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Success or failure as reported in the payload's own flag.
    Reported,
    /// A failure, but only if the payload reports the operation went through.
    FailureIfReported,
}

impl Outcome {
    fn resolve(self, reported: bool) -> Option<bool> {
        match self {
            Outcome::Success => Some(true),
            Outcome::Failure => Some(false),
            Outcome::Reported => Some(reported),
            Outcome::FailureIfReported => reported.then_some(false),
        }
    }
}

const ADYEN_EVENTS: &[(&str, Outcome)] = &[
    ("AUTHORISATION", Outcome::Reported),
    ("CANCELLATION", Outcome::FailureIfReported),
    ("CANCEL_OR_REFUND", Outcome::FailureIfReported),
    ("REFUND", Outcome::FailureIfReported),
    ("CHARGEBACK", Outcome::FailureIfReported),
];

const GOPAY_STATES: &[(&str, Outcome)] = &[
    ("PAID", Outcome::Success),
    ("CANCELED", Outcome::Failure),
    ("TIMEOUTED", Outcome::Failure),
];

const WEPAY_TOPICS: &[(&str, Outcome)] = &[
    ("payments.completed", Outcome::Success),
    ("payments.failed", Outcome::Failure),
    ("payments.canceled", Outcome::Failure),
];

fn lookup(table: &[(&str, Outcome)], key: &str) -> Option<Outcome> {
    table.iter().find(|(k, _)| *k == key).map(|(_, o)| *o)
}

/// Identifier that some providers send as a number and others as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Identifier {
    Number(i64),
    Text(String),
}

impl Identifier {
    fn into_string(self) -> String {
        match self {
            Identifier::Number(n) => n.to_string(),
            Identifier::Text(s) => s,
        }
    }
}

/// Adyen sends `success` as `"true"`/`"false"`; tolerate real booleans too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn as_bool(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Text(s) => s.eq_ignore_ascii_case("true"),
        }
    }
}

/// Adyen standard notification: a `notificationItems` batch, or a single
/// bare item as sent by some test tools and proxies.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct AdyenNotification(AdyenBody);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AdyenBody {
    Batch {
        #[serde(rename = "notificationItems")]
        notification_items: Vec<AdyenItemEnvelope>,
    },
    Item(AdyenItem),
}

#[derive(Debug, Deserialize)]
struct AdyenItemEnvelope {
    #[serde(rename = "NotificationRequestItem")]
    item: AdyenItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdyenItem {
    #[serde(alias = "eventType")]
    event_code: String,
    success: Flag,
    psp_reference: String,
    merchant_reference: String,
    #[serde(default)]
    amount: Option<AdyenAmount>,
}

#[derive(Debug, Deserialize)]
struct AdyenAmount {
    value: i64,
}

#[derive(Debug, Deserialize)]
pub struct GoPayNotification {
    id: Identifier,
    order_number: String,
    state: String,
    #[serde(default)]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WePayNotification {
    topic: String,
    payload: WePayPayment,
}

#[derive(Debug, Deserialize)]
struct WePayPayment {
    id: Identifier,
    reference_id: String,
    #[serde(default)]
    amount: Option<i64>,
}

/// A decoded webhook body, one variant per provider.
#[derive(Debug)]
pub enum ProviderPayload {
    Adyen(AdyenNotification),
    GoPay(GoPayNotification),
    WePay(WePayNotification),
}

impl ProviderPayload {
    pub fn decode(provider: PaymentProvider, body: &[u8]) -> Result<Self, ParseError> {
        Ok(match provider {
            PaymentProvider::Adyen => ProviderPayload::Adyen(serde_json::from_slice(body)?),
            PaymentProvider::GoPay => ProviderPayload::GoPay(serde_json::from_slice(body)?),
            PaymentProvider::WePay => ProviderPayload::WePay(serde_json::from_slice(body)?),
        })
    }

    /// Normalizes the payload. `Ok(None)` means the event carries no payment
    /// outcome (e.g. a GoPay `CREATED` state or an Adyen `REPORT_AVAILABLE`).
    pub fn into_event(self) -> Result<Option<PaymentEvent>, ParseError> {
        let (provider, event_type, outcome, reported, payment_ref, merchant_reference, amount) =
            match self {
                ProviderPayload::Adyen(notification) => {
                    let item = match notification.0 {
                        AdyenBody::Batch { notification_items } => {
                            notification_items
                                .into_iter()
                                .next()
                                .ok_or(ParseError::MissingField("notificationItems"))?
                                .item
                        }
                        AdyenBody::Item(item) => item,
                    };
                    let outcome = lookup(ADYEN_EVENTS, &item.event_code);
                    (
                        PaymentProvider::Adyen,
                        item.event_code,
                        outcome,
                        item.success.as_bool(),
                        item.psp_reference,
                        item.merchant_reference,
                        item.amount.map(|a| a.value),
                    )
                }
                ProviderPayload::GoPay(n) => (
                    PaymentProvider::GoPay,
                    n.state.clone(),
                    lookup(GOPAY_STATES, &n.state),
                    false,
                    n.id.into_string(),
                    n.order_number,
                    n.amount,
                ),
                ProviderPayload::WePay(n) => (
                    PaymentProvider::WePay,
                    n.topic.clone(),
                    lookup(WEPAY_TOPICS, &n.topic),
                    false,
                    n.payload.id.into_string(),
                    n.payload.reference_id,
                    n.payload.amount,
                ),
            };

        let Some(success) = outcome.and_then(|o| o.resolve(reported)) else {
            return Ok(None);
        };
        if merchant_reference.trim().is_empty() {
            return Err(ParseError::MissingField("merchant reference"));
        }
        if payment_ref.trim().is_empty() {
            return Err(ParseError::MissingField("payment reference"));
        }

        Ok(Some(PaymentEvent {
            provider,
            event_type,
            success,
            payment_ref,
            merchant_reference,
            amount_minor_units: amount,
        }))
    }
}

/// Decodes and normalizes a raw webhook body.
pub fn parse(provider: PaymentProvider, body: &[u8]) -> Result<Option<PaymentEvent>, ParseError> {
    ProviderPayload::decode(provider, body)?.into_event()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adyen(event_code: &str, success: serde_json::Value) -> Vec<u8> {
        json!({
            "live": "false",
            "notificationItems": [{
                "NotificationRequestItem": {
                    "eventCode": event_code,
                    "success": success,
                    "pspReference": "psp-1",
                    "merchantReference": "order-1",
                    "amount": { "value": 1500, "currency": "EUR" }
                }
            }]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_adyen_authorisation() {
        let event = parse(PaymentProvider::Adyen, &adyen("AUTHORISATION", json!("true")))
            .unwrap()
            .unwrap();
        assert!(event.success);
        assert_eq!(event.payment_ref, "psp-1");
        assert_eq!(event.merchant_reference, "order-1");
        assert_eq!(event.amount_minor_units, Some(1500));
        assert_eq!(event.event_type, "AUTHORISATION");

        let refused = parse(PaymentProvider::Adyen, &adyen("AUTHORISATION", json!(false)))
            .unwrap()
            .unwrap();
        assert!(!refused.success);
    }

    #[test]
    fn test_adyen_cancellation_counts_only_when_successful() {
        let event = parse(PaymentProvider::Adyen, &adyen("CANCELLATION", json!("true")))
            .unwrap()
            .unwrap();
        assert!(!event.success);

        assert!(
            parse(PaymentProvider::Adyen, &adyen("CANCELLATION", json!("false")))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_adyen_unrelated_event_is_ignored() {
        assert!(
            parse(PaymentProvider::Adyen, &adyen("REPORT_AVAILABLE", json!("true")))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_adyen_bare_item() {
        let body = json!({
            "success": true,
            "eventType": "AUTHORISATION",
            "merchantReference": "order-1",
            "pspReference": "psp-1"
        })
        .to_string();
        let event = parse(PaymentProvider::Adyen, body.as_bytes()).unwrap().unwrap();
        assert!(event.success);
        assert_eq!(event.event_type, "AUTHORISATION");
        assert_eq!(event.payment_ref, "psp-1");
        assert_eq!(event.amount_minor_units, None);
    }

    #[test]
    fn test_adyen_unknown_shape_is_malformed() {
        assert!(matches!(
            parse(PaymentProvider::Adyen, br#"{"live": "false"}"#),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_adyen_empty_batch_is_malformed() {
        let body = br#"{"notificationItems": []}"#;
        assert!(matches!(
            parse(PaymentProvider::Adyen, body),
            Err(ParseError::MissingField(_))
        ));
    }

    #[test]
    fn test_gopay_states() {
        let body = |state: &str| {
            json!({"id": 3000006620_i64, "order_number": "order-2", "state": state, "amount": 1500})
                .to_string()
                .into_bytes()
        };

        let paid = parse(PaymentProvider::GoPay, &body("PAID")).unwrap().unwrap();
        assert!(paid.success);
        assert_eq!(paid.payment_ref, "3000006620");
        assert_eq!(paid.merchant_reference, "order-2");

        for state in ["CANCELED", "TIMEOUTED"] {
            let event = parse(PaymentProvider::GoPay, &body(state)).unwrap().unwrap();
            assert!(!event.success, "{state}");
        }
        for state in ["CREATED", "PAYMENT_METHOD_CHOSEN", "AUTHORIZED", "REFUNDED"] {
            assert!(parse(PaymentProvider::GoPay, &body(state)).unwrap().is_none(), "{state}");
        }
    }

    #[test]
    fn test_wepay_topics() {
        let body = |topic: &str| {
            json!({"topic": topic, "payload": {"id": "pay-9", "reference_id": "order-3", "amount": 990}})
                .to_string()
                .into_bytes()
        };

        let completed = parse(PaymentProvider::WePay, &body("payments.completed"))
            .unwrap()
            .unwrap();
        assert!(completed.success);
        assert_eq!(completed.payment_ref, "pay-9");
        assert_eq!(completed.provider, PaymentProvider::WePay);

        let failed = parse(PaymentProvider::WePay, &body("payments.failed"))
            .unwrap()
            .unwrap();
        assert!(!failed.success);

        assert!(parse(PaymentProvider::WePay, &body("accounts.updated")).unwrap().is_none());
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(
            parse(PaymentProvider::GoPay, b"not json"),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            parse(PaymentProvider::WePay, br#"{"topic": "payments.completed"}"#),
            Err(ParseError::Json(_))
        ));
        let blank_reference = json!({"id": 1, "order_number": " ", "state": "PAID"}).to_string();
        assert!(matches!(
            parse(PaymentProvider::GoPay, blank_reference.as_bytes()),
            Err(ParseError::MissingField(_))
        ));
    }
}
