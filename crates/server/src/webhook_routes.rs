//! Payment webhook endpoints. Each provider gets its own fixed response envelope;
//! callers never see internal error details.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use model::PaymentProvider;
use serde_json::json;
use webhooks::{WebhookOutcome, signature_header};

use crate::AppState;

pub(crate) async fn adyen(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    receive(state, PaymentProvider::Adyen, &headers, &body).await
}

pub(crate) async fn gopay(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    receive(state, PaymentProvider::GoPay, &headers, &body).await
}

pub(crate) async fn wepay(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    receive(state, PaymentProvider::WePay, &headers, &body).await
}

async fn receive(
    state: AppState,
    provider: PaymentProvider,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let signature = headers
        .get(signature_header(provider))
        .and_then(|v| v.to_str().ok());

    let outcome = state.processor.handle(provider, body, signature).await;
    state.metrics.record_webhook(provider.as_str(), outcome.label());
    envelope(provider, &outcome)
}

fn envelope(provider: PaymentProvider, outcome: &WebhookOutcome) -> Response {
    match outcome {
        WebhookOutcome::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        WebhookOutcome::TransientFailure => match provider {
            PaymentProvider::WePay => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error" })),
            )
                .into_response(),
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        WebhookOutcome::Applied { .. } | WebhookOutcome::Ignored(_) => match provider {
            PaymentProvider::Adyen => (StatusCode::OK, "[accepted]").into_response(),
            PaymentProvider::GoPay => (StatusCode::OK, "OK").into_response(),
            PaymentProvider::WePay => {
                (StatusCode::OK, Json(json!({ "status": "accepted" }))).into_response()
            }
        },
    }
}
