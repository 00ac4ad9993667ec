//! Storefront checkout and order-fulfillment pipeline.
//!
//! Carts accumulate priced lines, checkout turns a cart into an immutable
//! order exactly once, payments run through a hosted provider page, and
//! asynchronous provider webhooks reconcile payment and shipment state back
//! into the order graph.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod services;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::EventSender;
use axum::{routing::get, Json, Router};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;

/// Service handles shared by every request handler.
#[derive(Clone)]
pub struct AppServices {
    pub carts: services::CartService,
    pub checkout: services::CheckoutService,
    pub discounts: services::DiscountService,
    pub orders: services::OrderService,
    pub payments: services::PaymentService,
    pub reconciliation: services::ReconciliationService,
}

impl AppServices {
    pub fn build(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Result<Self, ServiceError> {
        let rates = services::ShippingRateService::new(config.shipping.clone())?;
        Ok(Self {
            carts: services::CartService::new(
                db.clone(),
                event_sender.clone(),
                config.tax.clone(),
            ),
            checkout: services::CheckoutService::new(
                db.clone(),
                event_sender.clone(),
                config.clone(),
                rates,
            ),
            discounts: services::DiscountService::new(
                db.clone(),
                event_sender.clone(),
                config.tax.clone(),
            ),
            orders: services::OrderService::new(db.clone()),
            payments: services::PaymentService::new(
                db.clone(),
                event_sender.clone(),
                config.payment.clone(),
            )?,
            reconciliation: services::ReconciliationService::new(
                db,
                event_sender,
                config.shipment_webhook_secret.clone(),
            ),
        })
    }
}

/// Shared application state handed to every handler.
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self, ServiceError> {
        let services = AppServices::build(db.clone(), event_sender.clone(), config.clone())?;
        Ok(Self {
            db,
            config,
            event_sender,
            services,
        })
    }
}

/// Versioned API surface.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/carts", handlers::carts_routes())
        .nest("/checkout", handlers::checkout_routes())
        .nest("/orders", handlers::orders_routes())
        .nest("/payments", handlers::payments_routes())
        .nest("/webhooks", handlers::webhooks_routes())
}

/// Full application router, including health endpoints.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(api_status))
        .nest("/api/v1", api_v1_routes())
        .nest("/health", handlers::health_routes())
        .with_state(state)
}

async fn api_status() -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}
