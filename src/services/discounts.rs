use crate::config::TaxConfig;
use crate::entities::{cart, discount};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::carts::{load_active_cart, recompute_cart_totals};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Resolves discount codes and attaches them to carts. A cart holds at most
/// one discount; applying a new code replaces the old one. Usage counting
/// happens at order confirmation, never here.
#[derive(Clone)]
pub struct DiscountService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    tax: TaxConfig,
}

impl DiscountService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>, tax: TaxConfig) -> Self {
        Self {
            db,
            event_sender,
            tax,
        }
    }

    /// Applies a discount code to the cart. Unknown codes are a 404; known
    /// codes outside their window or past their usage limit are rejected
    /// with a caller-correctable error.
    #[instrument(skip(self))]
    pub async fn apply(&self, cart_id: Uuid, code: &str) -> Result<cart::Model, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Discount code must not be empty".to_string(),
            ));
        }

        let discount = discount::Entity::find()
            .filter(discount::Column::Code.eq(code))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Discount code {} not found", code)))?;

        if !discount.is_active_at(Utc::now()) {
            return Err(ServiceError::DiscountInactive(format!(
                "Discount code {} is not currently active",
                code
            )));
        }
        if discount.is_exhausted() {
            return Err(ServiceError::DiscountExhausted(format!(
                "Discount code {} has reached its usage limit",
                code
            )));
        }

        let txn = self.db.begin().await?;
        let cart = load_active_cart(&txn, cart_id).await?;

        let mut active: cart::ActiveModel = cart.into();
        active.discount_id = Set(Some(discount.id));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let updated = recompute_cart_totals(&txn, cart_id, &self.tax).await?;
        txn.commit().await?;

        info!(cart_id = %cart_id, code = %code, "Discount applied");
        self.event_sender
            .send_or_log(Event::DiscountApplied {
                cart_id,
                discount_id: discount.id,
            })
            .await;

        Ok(updated)
    }

    /// Detaches the cart's discount. Removing when none is attached is a
    /// no-op, not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, cart_id: Uuid) -> Result<cart::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = load_active_cart(&txn, cart_id).await?;

        if cart.discount_id.is_none() {
            txn.commit().await?;
            return Ok(cart);
        }

        let mut active: cart::ActiveModel = cart.into();
        active.discount_id = Set(None);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let updated = recompute_cart_totals(&txn, cart_id, &self.tax).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::DiscountRemoved { cart_id })
            .await;

        Ok(updated)
    }
}
