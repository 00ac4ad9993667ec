use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::services::checkout::Address;
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:cart_id/addresses", post(store_addresses))
        .route("/:cart_id/rates", post(get_rates))
        .route("/:cart_id/shipping", post(select_shipping))
        .route("/:cart_id/confirm", post(confirm))
}

#[derive(Debug, Deserialize)]
struct AddressesRequest {
    shipping: Address,
    #[serde(default)]
    billing: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct SelectShippingRequest {
    provider: String,
    service_code: String,
}

/// Store shipping and billing addresses on the cart
async fn store_addresses(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<AddressesRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .checkout
        .store_addresses(cart_id, payload.shipping, payload.billing)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Quote shipping rates for the cart's destination
async fn get_rates(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let offers = state
        .services
        .checkout
        .get_rates(cart_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(offers))
}

/// Select one of the quoted shipping services
async fn select_shipping(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<SelectShippingRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .checkout
        .select_shipping(cart_id, &payload.provider, &payload.service_code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Confirm the cart into an order
async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let confirmed = state
        .services
        .checkout
        .confirm(cart_id)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(serde_json::json!({
        "order": confirmed.order,
        "items": confirmed.items,
    })))
}
