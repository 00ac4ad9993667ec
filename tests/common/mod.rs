#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use serde_json::Value;
use storefront_api::{
    app_router,
    config::{AppConfig, PaymentProviderConfig, ShippingProviderConfig, TaxConfig},
    db::{self, DbConfig},
    entities::{
        discount::{self, DiscountKind},
        product,
    },
    events::{self, EventSender},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Test harness over an in-memory SQLite database with the full router.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a fresh application; the closure can tweak configuration
    /// (e.g. set a webhook secret) before services are built.
    pub async fn with_config(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = test_config();
        mutate(&mut cfg);

        // A single connection keeps the in-memory database alive and shared
        let pool = db::establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: std::time::Duration::from_secs(5),
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let db = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = Arc::new(
            AppState::new(db, Arc::new(cfg), event_sender).expect("failed to build app state"),
        );
        let router = app_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Sends a request and returns the status plus parsed JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is not JSON")
        };
        (status, value)
    }

    pub async fn seed_product(&self, sku: &str, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(format!("Product {}", sku)),
            sku: Set(sku.to_string()),
            price: Set(price),
            sale_price: Set(None),
            stock: Set(stock),
            weight_kg: Set(None),
            tax_category: Set(None),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed product")
    }

    pub async fn seed_discount(
        &self,
        code: &str,
        kind: DiscountKind,
        value: Decimal,
        usage_limit: Option<i32>,
    ) -> discount::Model {
        let now = Utc::now();
        discount::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            kind: Set(kind),
            value: Set(value),
            starts_at: Set(None),
            ends_at: Set(None),
            usage_limit: Set(usage_limit),
            usage_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed discount")
    }

    /// Seeds a discount whose validity window ended an hour ago.
    pub async fn seed_expired_discount(&self, code: &str) -> discount::Model {
        let now = Utc::now();
        discount::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            kind: Set(DiscountKind::Percentage),
            value: Set(Decimal::new(10, 0)),
            starts_at: Set(Some(now - ChronoDuration::hours(48))),
            ends_at: Set(Some(now - ChronoDuration::hours(1))),
            usage_limit: Set(None),
            usage_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed discount")
    }
}

/// Parses a money field out of a JSON response body. Comparing as `Decimal`
/// keeps assertions independent of serialized scale.
pub fn money(value: &Value, key: &str) -> Decimal {
    value[key]
        .as_str()
        .unwrap_or_else(|| panic!("{} is not a string in {}", key, value))
        .parse()
        .expect("field is not a decimal")
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: false,
        cors_allowed_origins: None,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        currency: "USD".to_string(),
        tax: TaxConfig::default(),
        shipping: ShippingProviderConfig::default(),
        payment: PaymentProviderConfig::default(),
        shipment_webhook_secret: None,
    }
}
