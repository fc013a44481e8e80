//! Administrative order endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use model::{Delivery, Order, OrderStatus};
use serde::Deserialize;
use serde_json::json;
use service::{DispatchError, ServiceError};
use tracing::{error, info, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct StatusUpdate {
    status: OrderStatus,
}

/// Error body: `{"error": "..."}`.
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status = match &e {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Db(_) => {
                error!(error = %e, "Order request failed");
                return ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".into(),
                };
            }
        };
        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let status = match &e {
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::NotPaid(_)
            | DispatchError::AlreadyDispatched(_)
            | DispatchError::InProgress(_) => StatusCode::CONFLICT,
            DispatchError::NotConfigured { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::Provider(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Db(_) => {
                error!(error = %e, "Dispatch request failed");
                return ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".into(),
                };
            }
        };
        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

pub(crate) async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.service.get_order(&order_id).await?))
}

pub(crate) async fn update_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Order>, ApiError> {
    info!(%order_id, status = %update.status, "Manual status update");
    match state.service.update_status(&order_id, update.status).await {
        Ok(order) => Ok(Json(order)),
        Err(e) => {
            if matches!(e, ServiceError::InvalidTransition { .. }) {
                warn!(%order_id, error = %e, "Rejected status update");
            }
            Err(e.into())
        }
    }
}

pub(crate) async fn dispatch(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Delivery>, ApiError> {
    info!(%order_id, "Manual delivery dispatch");
    Ok(Json(state.service.dispatch_delivery(&order_id).await?))
}

pub(crate) async fn deliveries(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<Delivery>>, ApiError> {
    Ok(Json(state.service.list_deliveries(&order_id).await?))
}
