use crate::handlers::common::{map_service_error, success_response};
use crate::services::payments::ProviderStatus;
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for payment endpoints
pub fn payments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:order_id/initialize", post(initialize_payment))
        .route("/callback", get(payment_callback_get).post(payment_callback_post))
}

fn provider_status_str(status: ProviderStatus) -> &'static str {
    match status {
        ProviderStatus::Ready => "ready",
        ProviderStatus::Error => "error",
        ProviderStatus::Unavailable => "unavailable",
    }
}

/// Open a hosted checkout session for an order awaiting payment
async fn initialize_payment(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let initialized = state
        .services
        .payments
        .initialize(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "payment_id": initialized.payment.id,
        "correlation_id": initialized.payment.correlation_id,
        "provider_status": provider_status_str(initialized.provider_status),
        "redirect_url": initialized.redirect_url,
        "token": initialized.token,
    })))
}

/// Parameters echoed back by the provider's browser redirect
#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(alias = "conversationId")]
    correlation_id: String,
    #[serde(default)]
    token: Option<String>,
}

/// Provider redirects the shopper here after the hosted payment page.
/// The verdict comes from a server-side retrieve, never from the redirect
/// parameters themselves.
async fn payment_callback_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    settle_callback(state, params).await
}

async fn payment_callback_post(
    State(state): State<Arc<AppState>>,
    Json(params): Json<CallbackParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    settle_callback(state, params).await
}

async fn settle_callback(
    state: Arc<AppState>,
    params: CallbackParams,
) -> Result<axum::response::Response, ApiError> {
    let payment = state
        .services
        .payments
        .retrieve(&params.correlation_id, params.token.as_deref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "order_id": payment.order_id,
        "payment_id": payment.id,
        "status": payment.status.as_str(),
    })))
}
