use crate::config::AppConfig;
use crate::entities::{
    cart::{self, CartStatus},
    cart_item, discount,
    order::{self, OrderStatus},
    order_address::{self, AddressKind},
    order_item, order_shipment, order_tax_line, product,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::carts::{load_active_cart, recompute_cart_totals};
use crate::services::pricing::{self, LineInput};
use crate::services::shipping_rates::{RateOffer, ShippingRateService};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    error::SqlErr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Postal address supplied at checkout. Stored as JSON on the cart while
/// checkout is in progress, then snapshotted onto the order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// ISO 3166-1 alpha-2, uppercase
    #[validate(custom = "validate_country_code")]
    pub country: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[validate(length(min = 1, message = "address line is required"))]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
}

fn validate_country_code(country: &str) -> Result<(), ValidationError> {
    let valid = country.len() == 2 && country.bytes().all(|b| b.is_ascii_uppercase());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("country_code"))
    }
}

/// Result of a successful confirmation: the order graph's root plus its
/// frozen line items.
#[derive(Debug, Clone)]
pub struct ConfirmedOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Checkout orchestrator: addresses, rate quoting, shipping selection, and
/// the confirmation step that turns a cart into an order exactly once.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    rates: ShippingRateService,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        rates: ShippingRateService,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            rates,
        }
    }

    /// Stores the shipping (and optionally billing) address on the cart.
    /// Changing the address invalidates any quoted rates and selection.
    #[instrument(skip(self, shipping, billing))]
    pub async fn store_addresses(
        &self,
        cart_id: Uuid,
        shipping: Address,
        billing: Option<Address>,
    ) -> Result<cart::Model, ServiceError> {
        shipping.validate()?;
        if let Some(billing) = &billing {
            billing.validate()?;
        }

        let txn = self.db.begin().await?;
        let cart = load_active_cart(&txn, cart_id).await?;

        let mut active: cart::ActiveModel = cart.into();
        active.shipping_address = Set(Some(serde_json::to_value(&shipping)?));
        active.billing_address = Set(match &billing {
            Some(b) => Some(serde_json::to_value(b)?),
            None => None,
        });
        // Quotes were computed for the old destination
        active.rate_quotes = Set(None);
        active.shipping_provider = Set(None);
        active.shipping_service_code = Set(None);
        active.shipping_service_name = Set(None);
        active.shipping_amount = Set(None);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let updated = recompute_cart_totals(&txn, cart_id, &self.config.tax).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Quotes shipping rates for the cart's destination and caches the
    /// offers on the cart. The provider call runs outside any transaction.
    #[instrument(skip(self))]
    pub async fn get_rates(&self, cart_id: Uuid) -> Result<Vec<RateOffer>, ServiceError> {
        let cart = load_active_cart(self.db.as_ref(), cart_id).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(self.db.as_ref())
            .await?;
        if items.is_empty() {
            return Err(ServiceError::StateConflict(
                "Cannot quote shipping for an empty cart".to_string(),
            ));
        }
        let destination = shipping_address_of(&cart)?;

        let products = load_products(self.db.as_ref(), &items).await?;
        let mut weight = Decimal::ZERO;
        let mut item_count = 0;
        for item in &items {
            let unit_weight = products
                .get(&item.product_id)
                .and_then(|p| p.weight_kg)
                .unwrap_or(self.config.shipping.default_item_weight_kg);
            weight += unit_weight * Decimal::from(item.quantity);
            item_count += item.quantity;
        }

        // Declared value is the cart subtotal at quote time
        let offers = self
            .rates
            .quote(weight, item_count, cart.subtotal, &destination)
            .await?;

        // Cache exactly what we are about to show; selection is validated
        // against this snapshot
        let mut active: cart::ActiveModel = cart.into();
        active.rate_quotes = Set(Some(serde_json::to_value(&offers)?));
        active.shipping_provider = Set(None);
        active.shipping_service_code = Set(None);
        active.shipping_service_name = Set(None);
        active.shipping_amount = Set(None);
        active.updated_at = Set(Utc::now());
        active.update(self.db.as_ref()).await?;

        Ok(offers)
    }

    /// Records the shopper's chosen shipping service. The choice must match
    /// one of the cached offers; anything else means the quotes went stale.
    #[instrument(skip(self))]
    pub async fn select_shipping(
        &self,
        cart_id: Uuid,
        provider: &str,
        service_code: &str,
    ) -> Result<cart::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = load_active_cart(&txn, cart_id).await?;

        let offers: Vec<RateOffer> = match &cart.rate_quotes {
            Some(value) => serde_json::from_value(value.clone())?,
            None => {
                return Err(ServiceError::StateConflict(
                    "No shipping rates have been quoted for this cart".to_string(),
                ))
            }
        };
        let chosen = offers
            .iter()
            .find(|o| o.provider == provider && o.service_code == service_code)
            .ok_or_else(|| {
                ServiceError::StateConflict(
                    "Selected shipping service does not match the quoted offers".to_string(),
                )
            })?
            .clone();

        let mut active: cart::ActiveModel = cart.into();
        active.shipping_provider = Set(Some(chosen.provider.clone()));
        active.shipping_service_code = Set(Some(chosen.service_code.clone()));
        active.shipping_service_name = Set(Some(chosen.service_name.clone()));
        active.shipping_amount = Set(Some(chosen.amount));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let updated = recompute_cart_totals(&txn, cart_id, &self.config.tax).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ShippingSelected {
                cart_id,
                service_code: chosen.service_code,
            })
            .await;

        Ok(updated)
    }

    /// Confirms the cart into an order. Runs entirely in one transaction:
    /// stock is revalidated against live product rows, totals are recomputed
    /// from scratch, and the whole order graph is inserted together. The
    /// unique index on the order's source cart makes a racing second confirm
    /// lose cleanly.
    #[instrument(skip(self))]
    pub async fn confirm(&self, cart_id: Uuid) -> Result<ConfirmedOrder, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = cart::Entity::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
        match cart.status {
            CartStatus::Active => {}
            CartStatus::Converted => {
                return Err(ServiceError::ConflictAlreadyConfirmed(cart_id));
            }
            _ => {
                return Err(ServiceError::StateConflict(format!(
                    "Cart {} is no longer active",
                    cart_id
                )))
            }
        }

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(&txn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::StateConflict("Cart is empty".to_string()));
        }
        let shipping_address = shipping_address_of(&cart)?;
        let billing_address: Address = match &cart.billing_address {
            Some(value) => serde_json::from_value(value.clone())?,
            None => {
                return Err(ServiceError::StateConflict(
                    "Billing address has not been provided".to_string(),
                ))
            }
        };
        if cart.shipping_provider.is_none() || cart.shipping_amount.is_none() {
            return Err(ServiceError::StateConflict(
                "Shipping method has not been selected".to_string(),
            ));
        }

        // Live stock revalidation; snapshots taken at add time do not count
        let products = load_products(&txn, &items).await?;
        for item in &items {
            let product = products.get(&item.product_id).filter(|p| p.active).ok_or_else(|| {
                ServiceError::InsufficientStock(format!(
                    "Product {} is no longer available",
                    item.product_id
                ))
            })?;
            if item.quantity > product.stock {
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for product {}: requested {}, available {}",
                    item.product_id, item.quantity, product.stock
                )));
            }
        }

        // The discount must still be usable at the moment of confirmation
        let applied_discount = match cart.discount_id {
            Some(discount_id) => {
                let d = discount::Entity::find_by_id(discount_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Discount {} not found", discount_id))
                    })?;
                if !d.is_active_at(Utc::now()) {
                    return Err(ServiceError::DiscountInactive(format!(
                        "Discount code {} is not currently active",
                        d.code
                    )));
                }
                if d.is_exhausted() {
                    return Err(ServiceError::DiscountExhausted(format!(
                        "Discount code {} has reached its usage limit",
                        d.code
                    )));
                }
                Some(d)
            }
            None => None,
        };

        let lines: Vec<LineInput> = items
            .iter()
            .map(|item| LineInput {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                sale_price: item.sale_price,
                tax_category: products
                    .get(&item.product_id)
                    .and_then(|p| p.tax_category.clone()),
            })
            .collect();
        let totals = pricing::compute_totals(
            &lines,
            applied_discount.as_ref(),
            &self.config.tax,
            cart.shipping_amount,
        );

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            cart_id: Set(cart_id),
            customer_id: Set(cart.customer_id),
            session_id: Set(cart.session_id.clone()),
            status: Set(OrderStatus::PendingPayment),
            currency: Set(cart.currency.clone()),
            subtotal: Set(totals.subtotal),
            discount_total: Set(totals.discount_total),
            tax_total: Set(totals.tax_total),
            shipping_total: Set(totals.shipping_total),
            grand_total: Set(totals.grand_total),
            discount_id: Set(cart.discount_id),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = match order_model.insert(&txn).await {
            Ok(order) => order,
            Err(err) => {
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    warn!(cart_id = %cart_id, "Concurrent confirm lost the race");
                    return Err(ServiceError::ConflictAlreadyConfirmed(cart_id));
                }
                return Err(err.into());
            }
        };

        let mut order_items = Vec::with_capacity(items.len());
        for (item, priced) in items.iter().zip(totals.lines.iter()) {
            let product = &products[&item.product_id];
            let inserted = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                title: Set(product.title.clone()),
                sku: Set(product.sku.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(priced.unit_price),
                line_total: Set(priced.line_total),
                tax_rate: Set(priced.tax_rate),
                tax_amount: Set(priced.tax_amount),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            order_items.push(inserted);

            // Commit the stock decrement together with the order
            let mut stock_update: product::ActiveModel = product.clone().into();
            stock_update.stock = Set(product.stock - item.quantity);
            stock_update.updated_at = Set(now);
            stock_update.update(&txn).await?;
        }

        insert_address(&txn, order_id, AddressKind::Shipping, &shipping_address, now).await?;
        insert_address(&txn, order_id, AddressKind::Billing, &billing_address, now).await?;

        for tax_line in &totals.tax_lines {
            order_tax_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                order_item_id: Set(None),
                title: Set(tax_line.title.clone()),
                rate: Set(tax_line.rate),
                amount: Set(tax_line.amount),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        order_shipment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            provider: Set(cart.shipping_provider.clone().unwrap_or_default()),
            service_code: Set(cart.shipping_service_code.clone()),
            service_name: Set(cart.shipping_service_name.clone()),
            status: Set(order_shipment::STATUS_UNCONFIRMED.to_string()),
            tracking_number: Set(None),
            amount: Set(cart.shipping_amount),
            payload: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        if let Some(d) = applied_discount {
            let usage_count = d.usage_count + 1;
            let mut active: discount::ActiveModel = d.into();
            active.usage_count = Set(usage_count);
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;
        let mut converted: cart::ActiveModel = cart.into();
        converted.status = Set(CartStatus::Converted);
        converted.updated_at = Set(now);
        converted.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %created.id, order_number = %created.order_number, "Order created");
        self.event_sender
            .send_or_log(Event::OrderCreated(created.id))
            .await;

        Ok(ConfirmedOrder {
            order: created,
            items: order_items,
        })
    }
}

fn shipping_address_of(cart: &cart::Model) -> Result<Address, ServiceError> {
    match &cart.shipping_address {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Err(ServiceError::StateConflict(
            "Shipping address has not been provided".to_string(),
        )),
    }
}

async fn load_products<C: sea_orm::ConnectionTrait>(
    conn: &C,
    items: &[cart_item::Model],
) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
    let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    Ok(product::Entity::find()
        .filter(product::Column::Id.is_in(ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect())
}

async fn insert_address<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    kind: AddressKind,
    address: &Address,
    now: chrono::DateTime<Utc>,
) -> Result<(), ServiceError> {
    order_address::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        kind: Set(kind),
        name: Set(address.name.clone()),
        phone: Set(address.phone.clone()),
        country: Set(address.country.clone()),
        city: Set(address.city.clone()),
        district: Set(address.district.clone()),
        postal_code: Set(address.postal_code.clone()),
        line1: Set(address.line1.clone()),
        line2: Set(address.line2.clone()),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;
    Ok(())
}

fn generate_order_number() -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            name: "Jordan Fisher".into(),
            phone: None,
            country: "US".into(),
            city: "Portland".into(),
            district: None,
            postal_code: Some("97201".into()),
            line1: "100 Main St".into(),
            line2: None,
        }
    }

    #[test]
    fn address_validation_accepts_complete_input() {
        assert!(address().validate().is_ok());
    }

    #[test]
    fn address_validation_rejects_bad_country_codes() {
        for bad in ["", "U", "USA", "us", "1A"] {
            let mut a = address();
            a.country = bad.into();
            assert!(a.validate().is_err(), "country {:?} should fail", bad);
        }
    }

    #[test]
    fn address_validation_rejects_missing_required_fields() {
        let mut a = address();
        a.name = String::new();
        assert!(a.validate().is_err());

        let mut a = address();
        a.city = String::new();
        assert!(a.validate().is_err());

        let mut a = address();
        a.line1 = String::new();
        assert!(a.validate().is_err());
    }

    #[test]
    fn order_numbers_carry_date_and_random_suffix() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert!(a.starts_with("ORD-"));
        assert_ne!(a, b);
        assert_eq!(a.len(), "ORD-YYYYMMDD-XXXXXXXX".len());
    }
}
