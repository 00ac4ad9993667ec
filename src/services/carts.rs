use crate::config::TaxConfig;
use crate::entities::{
    cart::{self, CartStatus},
    cart_item, discount, product,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::pricing::{self, LineInput};
use crate::services::ShopperIdentity;
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Idle carts expire after this many days; expiry is checked lazily on read.
const CART_TTL_DAYS: i64 = 30;

/// Cart plus its line items, the shape most read endpoints return.
#[derive(Debug, Clone)]
pub struct CartDetails {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    tax: TaxConfig,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>, tax: TaxConfig) -> Self {
        Self {
            db,
            event_sender,
            tax,
        }
    }

    /// Returns the identity's active cart, creating one if none exists.
    /// An expired cart is closed and replaced transparently.
    #[instrument(skip(self))]
    pub async fn get_or_create(
        &self,
        identity: &ShopperIdentity,
        currency: &str,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = self.find_active_cart(identity).await? {
            if existing.expires_at > Utc::now() {
                return Ok(existing);
            }
            let mut expired: cart::ActiveModel = existing.into();
            expired.status = Set(CartStatus::Expired);
            expired.updated_at = Set(Utc::now());
            expired.update(self.db.as_ref()).await?;
        }

        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            session_id: Set(identity.session_id().map(str::to_owned)),
            customer_id: Set(identity.customer_id()),
            currency: Set(currency.to_owned()),
            discount_id: Set(None),
            shipping_provider: Set(None),
            shipping_service_code: Set(None),
            shipping_service_name: Set(None),
            shipping_amount: Set(None),
            rate_quotes: Set(None),
            shipping_address: Set(None),
            billing_address: Set(None),
            subtotal: Set(rust_decimal::Decimal::ZERO),
            discount_total: Set(rust_decimal::Decimal::ZERO),
            tax_total: Set(rust_decimal::Decimal::ZERO),
            shipping_total: Set(rust_decimal::Decimal::ZERO),
            grand_total: Set(rust_decimal::Decimal::ZERO),
            status: Set(CartStatus::Active),
            expires_at: Set(now + Duration::days(CART_TTL_DAYS)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = model.insert(self.db.as_ref()).await?;
        info!(cart_id = %created.id, "Cart created");
        self.event_sender
            .send_or_log(Event::CartCreated(created.id))
            .await;
        Ok(created)
    }

    async fn find_active_cart(
        &self,
        identity: &ShopperIdentity,
    ) -> Result<Option<cart::Model>, ServiceError> {
        let query = cart::Entity::find().filter(cart::Column::Status.eq(CartStatus::Active));
        let query = match identity {
            ShopperIdentity::Customer(id) => query.filter(cart::Column::CustomerId.eq(*id)),
            ShopperIdentity::Guest(session) => {
                query.filter(cart::Column::SessionId.eq(session.as_str()))
            }
        };
        Ok(query.one(self.db.as_ref()).await?)
    }

    /// Fetches a cart with its items.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, cart_id: Uuid) -> Result<CartDetails, ServiceError> {
        let cart = cart::Entity::find_by_id(cart_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(self.db.as_ref())
            .await?;
        Ok(CartDetails { cart, items })
    }

    /// Adds a product to the cart, merging into an existing line for the same
    /// product. Price and stock are snapshotted from the live product row;
    /// requests that exceed available stock are rejected outright.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartDetails, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = load_active_cart(&txn, cart_id).await?;
        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        let new_quantity = existing.as_ref().map(|i| i.quantity).unwrap_or(0) + quantity;
        if new_quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Insufficient stock for product {}: requested {}, available {}",
                product_id, new_quantity, product.stock
            )));
        }

        let now = Utc::now();
        let line_total = pricing::round2(
            product.effective_price() * rust_decimal::Decimal::from(new_quantity),
        );
        match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(new_quantity);
                active.unit_price = Set(product.price);
                active.sale_price = Set(product.sale_price);
                active.stock_at_add = Set(product.stock);
                active.line_total = Set(line_total);
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart_id),
                    product_id: Set(product_id),
                    quantity: Set(new_quantity),
                    unit_price: Set(product.price),
                    sale_price: Set(product.sale_price),
                    stock_at_add: Set(product.stock),
                    line_total: Set(line_total),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        invalidate_shipping(&txn, &cart).await?;
        let updated = recompute_cart_totals(&txn, cart_id, &self.tax).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(&txn)
            .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                product_id,
            })
            .await;

        Ok(CartDetails {
            cart: updated,
            items,
        })
    }

    /// Sets a line's quantity. Zero or negative removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartDetails, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(cart_id, product_id).await;
        }

        let txn = self.db.begin().await?;

        let cart = load_active_cart(&txn, cart_id).await?;
        let item = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;
        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Insufficient stock for product {}: requested {}, available {}",
                product_id, quantity, product.stock
            )));
        }

        let line_total =
            pricing::round2(product.effective_price() * rust_decimal::Decimal::from(quantity));
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.unit_price = Set(product.price);
        active.sale_price = Set(product.sale_price);
        active.stock_at_add = Set(product.stock);
        active.line_total = Set(line_total);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        invalidate_shipping(&txn, &cart).await?;
        let updated = recompute_cart_totals(&txn, cart_id, &self.tax).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(&txn)
            .await?;
        txn.commit().await?;

        Ok(CartDetails {
            cart: updated,
            items,
        })
    }

    /// Removes a product's line from the cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartDetails, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = load_active_cart(&txn, cart_id).await?;
        let item = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        cart_item::Entity::delete_by_id(item.id).exec(&txn).await?;

        invalidate_shipping(&txn, &cart).await?;
        let updated = recompute_cart_totals(&txn, cart_id, &self.tax).await?;
        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(&txn)
            .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id,
                product_id,
            })
            .await;

        Ok(CartDetails {
            cart: updated,
            items,
        })
    }

    /// Removes every line from the cart. The discount stays attached; it
    /// simply prices to zero against an empty cart.
    #[instrument(skip(self))]
    pub async fn clear(&self, cart_id: Uuid) -> Result<cart::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = load_active_cart(&txn, cart_id).await?;
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        invalidate_shipping(&txn, &cart).await?;
        let updated = recompute_cart_totals(&txn, cart_id, &self.tax).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart_id))
            .await;

        Ok(updated)
    }

    /// Merges a guest session's cart into the customer's cart on login.
    /// Lines for the same product are merged by summing quantities, clamped
    /// to available stock; the guest cart is deleted afterwards. A login
    /// merge never fails on stock, it just takes what is left.
    #[instrument(skip(self))]
    pub async fn merge_guest_into_user(
        &self,
        session_id: &str,
        customer_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        let guest = self
            .find_active_cart(&ShopperIdentity::Guest(session_id.to_owned()))
            .await?;
        let user_cart = self
            .get_or_create(&ShopperIdentity::Customer(customer_id), {
                // currency follows the guest cart when present
                guest.as_ref().map(|c| c.currency.as_str()).unwrap_or("USD")
            })
            .await?;

        let Some(guest_cart) = guest else {
            return Ok(user_cart);
        };
        if guest_cart.id == user_cart.id {
            return Ok(user_cart);
        }

        let txn = self.db.begin().await?;

        let guest_items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .all(&txn)
            .await?;
        let user_items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(user_cart.id))
            .all(&txn)
            .await?;
        let by_product: HashMap<Uuid, cart_item::Model> = user_items
            .into_iter()
            .map(|item| (item.product_id, item))
            .collect();

        let now = Utc::now();
        for guest_item in guest_items {
            let stock = product::Entity::find_by_id(guest_item.product_id)
                .one(&txn)
                .await?
                .filter(|p| p.active)
                .map(|p| p.stock)
                .unwrap_or(0);

            match by_product.get(&guest_item.product_id) {
                Some(target) => {
                    let quantity = (target.quantity + guest_item.quantity).min(stock);
                    if quantity < 1 {
                        cart_item::Entity::delete_by_id(target.id).exec(&txn).await?;
                        cart_item::Entity::delete_by_id(guest_item.id)
                            .exec(&txn)
                            .await?;
                        continue;
                    }
                    let line_total = pricing::round2(
                        target.effective_unit_price() * rust_decimal::Decimal::from(quantity),
                    );
                    let mut active: cart_item::ActiveModel = target.clone().into();
                    active.quantity = Set(quantity);
                    active.line_total = Set(line_total);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                    cart_item::Entity::delete_by_id(guest_item.id)
                        .exec(&txn)
                        .await?;
                }
                None if stock > 0 => {
                    let quantity = guest_item.quantity.min(stock);
                    let line_total = pricing::round2(
                        guest_item.effective_unit_price() * rust_decimal::Decimal::from(quantity),
                    );
                    let mut active: cart_item::ActiveModel = guest_item.into();
                    active.cart_id = Set(user_cart.id);
                    active.quantity = Set(quantity);
                    active.line_total = Set(line_total);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }
                // A line whose product vanished or sold out does not carry over
                None => {
                    cart_item::Entity::delete_by_id(guest_item.id)
                        .exec(&txn)
                        .await?;
                }
            }
        }

        // Remaining guest items were merged or dropped above; the cart row
        // itself goes with them
        cart::Entity::delete_by_id(guest_cart.id).exec(&txn).await?;

        invalidate_shipping(&txn, &user_cart).await?;
        let merged = recompute_cart_totals(&txn, user_cart.id, &self.tax).await?;
        txn.commit().await?;

        info!(guest_cart_id = %guest_cart.id, user_cart_id = %merged.id, "Carts merged");
        self.event_sender
            .send_or_log(Event::CartsMerged {
                guest_cart_id: guest_cart.id,
                user_cart_id: merged.id,
            })
            .await;

        Ok(merged)
    }
}

/// Loads a cart and checks it is still open for mutation.
pub(crate) async fn load_active_cart<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    let cart = cart::Entity::find_by_id(cart_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
    if cart.status != CartStatus::Active {
        return Err(ServiceError::StateConflict(format!(
            "Cart {} is no longer active",
            cart_id
        )));
    }
    Ok(cart)
}

/// Drops cached rate offers and any shipping selection. Called whenever cart
/// contents change; a selection made against the old contents must not
/// survive into checkout.
pub(crate) async fn invalidate_shipping<C: ConnectionTrait>(
    conn: &C,
    cart: &cart::Model,
) -> Result<(), ServiceError> {
    if cart.rate_quotes.is_none() && cart.shipping_provider.is_none() {
        return Ok(());
    }
    let mut active: cart::ActiveModel = cart.clone().into();
    active.rate_quotes = Set(None);
    active.shipping_provider = Set(None);
    active.shipping_service_code = Set(None);
    active.shipping_service_name = Set(None);
    active.shipping_amount = Set(None);
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    Ok(())
}

/// Recomputes and persists every cart total from the current lines, the
/// attached discount and the recorded shipping amount. Runs inside the
/// caller's transaction.
pub(crate) async fn recompute_cart_totals<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    tax: &TaxConfig,
) -> Result<cart::Model, ServiceError> {
    let cart = cart::Entity::find_by_id(cart_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
    let items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .all(conn)
        .await?;

    let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let categories: HashMap<Uuid, Option<String>> = if product_ids.is_empty() {
        HashMap::new()
    } else {
        product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p.tax_category))
            .collect()
    };

    let discount = match cart.discount_id {
        Some(discount_id) => discount::Entity::find_by_id(discount_id).one(conn).await?,
        None => None,
    };

    let lines: Vec<LineInput> = items
        .iter()
        .map(|item| LineInput {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            sale_price: item.sale_price,
            tax_category: categories.get(&item.product_id).cloned().flatten(),
        })
        .collect();

    let totals = pricing::compute_totals(&lines, discount.as_ref(), tax, cart.shipping_amount);

    let mut active: cart::ActiveModel = cart.into();
    active.subtotal = Set(totals.subtotal);
    active.discount_total = Set(totals.discount_total);
    active.tax_total = Set(totals.tax_total);
    active.shipping_total = Set(totals.shipping_total);
    active.grand_total = Set(totals.grand_total);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}
