//! HTTP handlers. Each module exposes a `*_routes()` constructor returning
//! an axum router over the shared application state.

pub mod carts;
pub mod checkout;
pub mod common;
pub mod health;
pub mod identity;
pub mod orders;
pub mod payments;
pub mod webhooks;

pub use carts::carts_routes;
pub use checkout::checkout_routes;
pub use health::health_routes;
pub use orders::orders_routes;
pub use payments::payments_routes;
pub use webhooks::webhooks_routes;
