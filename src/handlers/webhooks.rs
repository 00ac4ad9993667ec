use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    routing::post,
    Router,
};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Creates the router for inbound webhook endpoints
pub fn webhooks_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments", post(payment_webhook))
        .route("/shipments", post(shipment_webhook))
}

/// Payment provider webhook. Always acknowledged once parsed; unknown
/// correlation ids and redeliveries report `updated: false`.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let updated = state
        .services
        .reconciliation
        .handle_payment_webhook(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "received": true,
        "updated": updated,
    })))
}

/// Carrier webhook. The signature is verified over the raw body before any
/// parsing; a bad signature is the only 400 this endpoint produces.
async fn shipment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .services
        .reconciliation
        .handle_shipment_webhook(&body, signature)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "ok": true,
        "event": outcome.event,
        "updated": outcome.updated,
    })))
}
