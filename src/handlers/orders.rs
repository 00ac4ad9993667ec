use crate::entities::{order, order_address, order_item, order_shipment, order_tax_line, payment};
use crate::handlers::common::{map_service_error, success_response, PaginationParams};
use crate::handlers::identity::Identity;
use crate::services::orders::OrderDetails;
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for order read endpoints
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/number/:order_number", get(get_order_by_number))
}

/// Payment attempt as exposed over the API. Raw provider payloads stay in
/// the database.
#[derive(Debug, Serialize)]
struct PaymentSummary {
    id: Uuid,
    provider: String,
    status: String,
    amount: Decimal,
    currency: String,
    correlation_id: String,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentSummary {
    fn from(p: payment::Model) -> Self {
        Self {
            id: p.id,
            provider: p.provider,
            status: p.status.as_str().to_string(),
            amount: p.amount,
            currency: p.currency,
            correlation_id: p.correlation_id,
            transaction_id: p.transaction_id,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ShipmentSummary {
    id: Uuid,
    provider: String,
    service_code: Option<String>,
    service_name: Option<String>,
    status: String,
    tracking_number: Option<String>,
    amount: Option<Decimal>,
    updated_at: DateTime<Utc>,
}

impl From<order_shipment::Model> for ShipmentSummary {
    fn from(s: order_shipment::Model) -> Self {
        Self {
            id: s.id,
            provider: s.provider,
            service_code: s.service_code,
            service_name: s.service_name,
            status: s.status,
            tracking_number: s.tracking_number,
            amount: s.amount,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    #[serde(flatten)]
    order: order::Model,
    items: Vec<order_item::Model>,
    addresses: Vec<order_address::Model>,
    tax_lines: Vec<order_tax_line::Model>,
    shipments: Vec<ShipmentSummary>,
    payments: Vec<PaymentSummary>,
}

impl From<OrderDetails> for OrderResponse {
    fn from(details: OrderDetails) -> Self {
        Self {
            order: details.order,
            items: details.items,
            addresses: details.addresses,
            tax_lines: details.tax_lines,
            shipments: details.shipments.into_iter().map(Into::into).collect(),
            payments: details.payments.into_iter().map(Into::into).collect(),
        }
    }
}

/// List the caller's orders, newest first
async fn list_orders(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .list_for_identity(&identity, pagination.per_page, pagination.offset())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

/// Get an order with its full graph
async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let details = state
        .services
        .orders
        .get(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(OrderResponse::from(details)))
}

/// Get an order by its human-facing number
async fn get_order_by_number(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let details = state
        .services
        .orders
        .get_by_number(&order_number)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(OrderResponse::from(details)))
}
