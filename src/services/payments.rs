use crate::config::PaymentProviderConfig;
use crate::entities::{
    order::{self, OrderStatus},
    order_address::{self, AddressKind},
    order_item, order_tax_line,
    payment::{self, PaymentStatus},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::pricing::round2;
use crate::services::reconciliation::apply_payment_outcome;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What the provider said when we asked it to open a hosted checkout page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Page is ready; redirect the shopper
    Ready,
    /// Provider executed the call and rejected it
    Error,
    /// Provider unreachable or not configured
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct InitializedPayment {
    pub payment: payment::Model,
    pub provider_status: ProviderStatus,
    pub redirect_url: Option<String>,
    pub token: Option<String>,
}

/// Hosted-checkout payment adapter. Initialization opens a provider-side
/// payment page; the final verdict comes from `retrieve`, driven by the
/// provider's browser callback or its webhook.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: PaymentProviderConfig,
    http: reqwest::Client,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: PaymentProviderConfig,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            db,
            event_sender,
            config,
            http,
        })
    }

    /// Opens a hosted checkout session for an order awaiting payment. Each
    /// attempt gets its own payment row and correlation id; a provider
    /// failure leaves the row pending so the shopper can try again.
    #[instrument(skip(self))]
    pub async fn initialize(&self, order_id: Uuid) -> Result<InitializedPayment, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status != OrderStatus::PendingPayment {
            return Err(ServiceError::StateConflict(format!(
                "Order {} is not awaiting payment (status: {})",
                order_id,
                order.status.as_str()
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await?;
        let tax_lines = order_tax_line::Entity::find()
            .filter(order_tax_line::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await?;
        let addresses = order_address::Entity::find()
            .filter(order_address::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await?;
        // Billing drives the buyer record, falling back to shipping
        let billing = addresses
            .iter()
            .find(|a| a.kind == AddressKind::Billing)
            .or_else(|| addresses.iter().find(|a| a.kind == AddressKind::Shipping))
            .ok_or_else(|| {
                ServiceError::InternalError(format!("Order {} has no addresses", order_id))
            })?;

        let correlation_id = Uuid::new_v4().simple().to_string();
        let basket = basket_lines(&order, &items, &tax_lines);
        let request_body = json!({
            "conversationId": correlation_id,
            "price": order.grand_total,
            "paidPrice": order.grand_total,
            "currency": order.currency,
            "callbackUrl": self.config.callback_url,
            "buyer": {
                "id": order.customer_id.map(|id| id.to_string())
                    .unwrap_or_else(|| format!("guest-{}", order.id.simple())),
                "name": billing.name,
                "phone": billing.phone,
                "city": billing.city,
                "country": billing.country,
                "address": billing.line1,
            },
            "basketItems": basket,
        });

        let now = Utc::now();
        let created = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            provider: Set("hosted_checkout".to_string()),
            status: Set(PaymentStatus::Pending),
            amount: Set(order.grand_total),
            currency: Set(order.currency.clone()),
            correlation_id: Set(correlation_id.clone()),
            transaction_id: Set(None),
            raw_request: Set(Some(request_body.clone())),
            raw_response: Set(None),
            raw_webhook: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        if self.config.base_url.is_empty() {
            warn!(order_id = %order_id, "Payment provider not configured");
            return Ok(InitializedPayment {
                payment: created,
                provider_status: ProviderStatus::Unavailable,
                redirect_url: None,
                token: None,
            });
        }

        let response = self
            .http
            .post(format!("{}/checkout/init", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send()
            .await;
        let payload: Value = match response {
            Ok(resp) => match resp.json().await {
                Ok(value) => value,
                Err(err) => {
                    warn!(order_id = %order_id, "Unreadable init response: {}", err);
                    return Ok(InitializedPayment {
                        payment: created,
                        provider_status: ProviderStatus::Error,
                        redirect_url: None,
                        token: None,
                    });
                }
            },
            Err(err) => {
                warn!(order_id = %order_id, "Payment provider unreachable: {}", err);
                return Ok(InitializedPayment {
                    payment: created,
                    provider_status: ProviderStatus::Unavailable,
                    redirect_url: None,
                    token: None,
                });
            }
        };

        let mut active: payment::ActiveModel = created.into();
        active.raw_response = Set(Some(payload.clone()));
        active.updated_at = Set(Utc::now());
        let updated = active.update(self.db.as_ref()).await?;

        let ok = payload.get("status").and_then(Value::as_str) == Some("success");
        if !ok {
            return Ok(InitializedPayment {
                payment: updated,
                provider_status: ProviderStatus::Error,
                redirect_url: None,
                token: None,
            });
        }

        let redirect_url = payload
            .get("paymentPageUrl")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let token = payload
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_owned);

        info!(order_id = %order_id, correlation_id = %correlation_id, "Payment initialized");
        self.event_sender
            .send_or_log(Event::PaymentInitialized {
                order_id,
                correlation_id,
            })
            .await;

        Ok(InitializedPayment {
            payment: updated,
            provider_status: ProviderStatus::Ready,
            redirect_url,
            token,
        })
    }

    /// Settles a payment attempt by asking the provider for the result. The
    /// verdict is binary: anything short of a positively confirmed success,
    /// including a transport failure, settles the attempt as failed.
    #[instrument(skip(self, token))]
    pub async fn retrieve(
        &self,
        correlation_id: &str,
        token: Option<&str>,
    ) -> Result<payment::Model, ServiceError> {
        let existing = payment::Entity::find()
            .filter(payment::Column::CorrelationId.eq(correlation_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment {} not found", correlation_id))
            })?;
        if existing.status.is_terminal() {
            return Ok(existing);
        }

        let (success, transaction_id, raw) = self.query_result(correlation_id, token).await;

        let txn = self.db.begin().await?;
        let (settled, order_change) =
            apply_payment_outcome(&txn, existing, success, transaction_id, raw, false).await?;
        txn.commit().await?;

        if success {
            self.event_sender
                .send_or_log(Event::PaymentSucceeded(settled.order_id))
                .await;
        } else {
            self.event_sender
                .send_or_log(Event::PaymentFailed(settled.order_id))
                .await;
        }
        if let Some((old_status, new_status)) = order_change {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: settled.order_id,
                    old_status,
                    new_status,
                })
                .await;
        }

        Ok(settled)
    }

    async fn query_result(
        &self,
        correlation_id: &str,
        token: Option<&str>,
    ) -> (bool, Option<String>, Option<Value>) {
        if self.config.base_url.is_empty() {
            return (false, None, None);
        }

        let response = self
            .http
            .post(format!("{}/checkout/retrieve", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "conversationId": correlation_id, "token": token }))
            .send()
            .await;
        let payload: Value = match response {
            Ok(resp) => match resp.json().await {
                Ok(value) => value,
                Err(err) => {
                    warn!(correlation_id = %correlation_id, "Unreadable retrieve response: {}", err);
                    return (false, None, None);
                }
            },
            Err(err) => {
                warn!(correlation_id = %correlation_id, "Payment retrieve failed: {}", err);
                return (false, None, None);
            }
        };

        let transaction_id = payload
            .get("paymentId")
            .and_then(Value::as_str)
            .map(str::to_owned);
        (payment_succeeded(&payload), transaction_id, Some(payload))
    }
}

/// Provider vocabulary for a confirmed successful payment: the envelope must
/// say `success` and the payment status must be an affirmative value.
pub(crate) fn payment_succeeded(payload: &Value) -> bool {
    let envelope_ok = payload.get("status").and_then(Value::as_str) == Some("success");
    let payment_ok = matches!(
        payload.get("paymentStatus").and_then(Value::as_str),
        Some("SUCCESS") | Some("PAID")
    );
    envelope_ok && payment_ok
}

/// Builds the provider basket. Item lines carry the discounted share of each
/// line total; tax and shipping are appended as virtual lines. The lines sum
/// to the order's grand total exactly, with any rounding residue folded into
/// the last item line.
fn basket_lines(
    order: &order::Model,
    items: &[order_item::Model],
    tax_lines: &[order_tax_line::Model],
) -> Vec<Value> {
    let mut lines = Vec::with_capacity(items.len() + tax_lines.len() + 1);

    let discounted_items_total = order.subtotal - order.discount_total;
    let factor = if order.subtotal > Decimal::ZERO {
        discounted_items_total / order.subtotal
    } else {
        Decimal::ONE
    };

    let mut allocated = Decimal::ZERO;
    for (index, item) in items.iter().enumerate() {
        let price = if index + 1 == items.len() {
            discounted_items_total - allocated
        } else {
            round2(item.line_total * factor)
        };
        allocated += price;
        lines.push(json!({
            "id": item.product_id,
            "name": item.title,
            "itemType": "PHYSICAL",
            "price": price,
        }));
    }

    for tax_line in tax_lines {
        lines.push(json!({
            "id": format!("tax-{}", tax_line.id),
            "name": tax_line.title,
            "itemType": "VIRTUAL",
            "price": tax_line.amount,
        }));
    }

    if order.shipping_total > Decimal::ZERO {
        lines.push(json!({
            "id": "shipping",
            "name": "Shipping",
            "itemType": "VIRTUAL",
            "price": order.shipping_total,
        }));
    }

    lines
}
