use crate::entities::{cart, cart_item};
use crate::handlers::common::{
    map_service_error, no_content_response, success_response, validate_input,
};
use crate::handlers::identity::Identity;
use crate::services::carts::CartDetails;
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/current", get(current_cart))
        .route("/merge", post(merge_carts))
        .route("/:id", get(get_cart))
        .route("/:id/items", post(add_item))
        .route("/:id/items/:product_id", put(update_item).delete(remove_item))
        .route("/:id/clear", post(clear_cart))
        .route("/:id/discount", post(apply_discount).delete(remove_discount))
}

#[derive(Debug, Serialize)]
struct CartResponse {
    #[serde(flatten)]
    cart: cart::Model,
    items: Vec<cart_item::Model>,
}

impl From<CartDetails> for CartResponse {
    fn from(details: CartDetails) -> Self {
        Self {
            cart: details.cart,
            items: details.items,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    product_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    quantity: i32,
}

#[derive(Debug, Deserialize)]
struct UpdateQuantityRequest {
    quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
struct ApplyDiscountRequest {
    #[validate(length(min = 1, message = "code is required"))]
    code: String,
}

#[derive(Debug, Deserialize, Validate)]
struct MergeCartsRequest {
    #[validate(length(min = 1, message = "session_id is required"))]
    session_id: String,
}

/// Get or create the caller's active cart
async fn current_cart(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .get_or_create(&identity, &state.config.currency)
        .await
        .map_err(map_service_error)?;
    let details = state
        .services
        .carts
        .get_cart(cart.id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(details)))
}

/// Get cart with items
async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let details = state
        .services
        .carts
        .get_cart(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(details)))
}

/// Add a product to the cart
async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let details = state
        .services
        .carts
        .add_item(cart_id, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(details)))
}

/// Set a line's quantity; zero removes the line
async fn update_item(
    State(state): State<Arc<AppState>>,
    Path((cart_id, product_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let details = state
        .services
        .carts
        .update_item_quantity(cart_id, product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(details)))
}

/// Remove a product from the cart
async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((cart_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .carts
        .remove_item(cart_id, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Remove every line from the cart
async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .carts
        .clear(cart_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Apply a discount code
async fn apply_discount(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<ApplyDiscountRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .discounts
        .apply(cart_id, &payload.code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove the cart's discount
async fn remove_discount(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .discounts
        .remove(cart_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Merge the guest session's cart into the authenticated customer's cart
async fn merge_carts(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Json(payload): Json<MergeCartsRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let customer_id = identity.customer_id().ok_or_else(|| ApiError::BadRequest {
        message: "Merging carts requires an authenticated customer".to_string(),
        error_code: Some("identity_required".to_string()),
    })?;

    let cart = state
        .services
        .carts
        .merge_guest_into_user(&payload.session_id, customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}
