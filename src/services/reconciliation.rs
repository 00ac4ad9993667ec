use crate::entities::{
    order::{self, OrderStatus},
    order_shipment,
    payment::{self, PaymentStatus},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::payments::payment_succeeded;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// How many recent shipments the payload-id scan covers when no tracking
/// number matches.
const SHIPMENT_SCAN_LIMIT: u64 = 200;

/// Outcome reported back to the carrier for a shipment webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct ShipmentWebhookOutcome {
    pub event: Option<String>,
    pub updated: bool,
}

/// Applies the async world to local state: payment verdicts from provider
/// webhooks and shipment updates from carrier webhooks. Everything here is
/// idempotent; redelivered or out-of-order messages never regress state.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    shipment_webhook_secret: Option<String>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        shipment_webhook_secret: Option<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            shipment_webhook_secret,
        }
    }

    /// Handles a payment provider webhook. Unknown correlation ids and
    /// already-settled payments are acknowledged without effect so the
    /// provider stops redelivering.
    #[instrument(skip(self, payload))]
    pub async fn handle_payment_webhook(&self, payload: Value) -> Result<bool, ServiceError> {
        let correlation_id = payload
            .get("conversationId")
            .or_else(|| payload.get("correlationId"))
            .and_then(Value::as_str);
        let transaction_id = payload
            .get("paymentId")
            .and_then(Value::as_str)
            .map(str::to_owned);

        // Correlation id wins; the provider's own transaction id is the
        // fallback key for deliveries that omit ours
        let mut existing = None;
        if let Some(correlation_id) = correlation_id {
            existing = payment::Entity::find()
                .filter(payment::Column::CorrelationId.eq(correlation_id))
                .one(self.db.as_ref())
                .await?;
        }
        if existing.is_none() {
            if let Some(tx_id) = &transaction_id {
                existing = payment::Entity::find()
                    .filter(payment::Column::TransactionId.eq(tx_id.as_str()))
                    .one(self.db.as_ref())
                    .await?;
            }
        }
        let Some(existing) = existing else {
            warn!(correlation_id = ?correlation_id, transaction_id = ?transaction_id,
                "Payment webhook matched no payment");
            return Ok(false);
        };
        if existing.status.is_terminal() {
            return Ok(false);
        }

        let success = payment_succeeded(&payload);

        let txn = self.db.begin().await?;
        let (settled, order_change) =
            apply_payment_outcome(&txn, existing, success, transaction_id, Some(payload), true)
                .await?;
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

        Ok(true)
    }

    /// Handles a carrier webhook. The only hard failure is a bad signature;
    /// everything else, including payloads we cannot match to a shipment, is
    /// acknowledged so the carrier does not retry forever.
    #[instrument(skip(self, body, signature))]
    pub async fn handle_shipment_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<ShipmentWebhookOutcome, ServiceError> {
        if let Some(secret) = &self.shipment_webhook_secret {
            verify_signature(secret, body, signature)?;
        }

        let payload: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                warn!("Unparseable shipment webhook: {}", err);
                return Ok(ShipmentWebhookOutcome {
                    event: None,
                    updated: false,
                });
            }
        };
        let event = payload
            .get("event")
            .or_else(|| payload.get("type"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let Some(shipment) = self.find_shipment(&payload).await? else {
            warn!(event = ?event, "Shipment webhook matched no shipment");
            return Ok(ShipmentWebhookOutcome {
                event,
                updated: false,
            });
        };

        let incoming_status = extract_status(&payload);
        let incoming_tracking = extract_tracking_number(&payload);

        let txn = self.db.begin().await?;

        let status = incoming_status
            .clone()
            .unwrap_or_else(|| shipment.status.clone());
        // A known tracking number is never erased by a payload without one
        let tracking_number = incoming_tracking.or_else(|| shipment.tracking_number.clone());
        let merged_payload = merge_last_webhook(shipment.payload.clone(), &payload);

        let shipment_id = shipment.id;
        let order_id = shipment.order_id;
        let mut active: order_shipment::ActiveModel = shipment.into();
        active.status = Set(status.clone());
        active.tracking_number = Set(tracking_number);
        active.payload = Set(Some(merged_payload));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let order_change = if is_delivered_status(&status) {
            fulfill_if_paid(&txn, order_id).await?
        } else {
            None
        };

        txn.commit().await?;

        info!(shipment_id = %shipment_id, status = %status, "Shipment updated");
        self.event_sender
            .send_or_log(Event::ShipmentUpdated {
                shipment_id,
                status,
            })
            .await;
        if let Some((old_status, new_status)) = order_change {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status,
                })
                .await;
        }

        Ok(ShipmentWebhookOutcome {
            event,
            updated: true,
        })
    }

    /// Locates the shipment a webhook refers to. Tracking number wins; the
    /// fallback scans recent shipments for a provider id recorded in their
    /// payload, newest first.
    async fn find_shipment(
        &self,
        payload: &Value,
    ) -> Result<Option<order_shipment::Model>, ServiceError> {
        let provider = extract_provider_name(payload);

        if let Some(tracking) = extract_tracking_number(payload) {
            let mut query = order_shipment::Entity::find()
                .filter(order_shipment::Column::TrackingNumber.eq(tracking.as_str()));
            if let Some(provider) = &provider {
                query = query.filter(order_shipment::Column::Provider.eq(provider.as_str()));
            }
            let found = query
                .order_by_desc(order_shipment::Column::CreatedAt)
                .one(self.db.as_ref())
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        if let Some(order_number) = payload
            .get("orderNumber")
            .or_else(|| payload.get("merchantOrderId"))
            .or_else(|| payload.pointer("/metadata/orderNumber"))
            .and_then(Value::as_str)
        {
            if let Some(order) = order::Entity::find()
                .filter(order::Column::OrderNumber.eq(order_number))
                .one(self.db.as_ref())
                .await?
            {
                return Ok(order_shipment::Entity::find()
                    .filter(order_shipment::Column::OrderId.eq(order.id))
                    .order_by_desc(order_shipment::Column::CreatedAt)
                    .one(self.db.as_ref())
                    .await?);
            }
        }

        let Some(provider_id) = extract_provider_id(payload) else {
            return Ok(None);
        };
        let mut scan = order_shipment::Entity::find();
        if let Some(provider) = &provider {
            scan = scan.filter(order_shipment::Column::Provider.eq(provider.as_str()));
        }
        let recent = scan
            .order_by_desc(order_shipment::Column::CreatedAt)
            .limit(SHIPMENT_SCAN_LIMIT)
            .all(self.db.as_ref())
            .await?;
        Ok(recent.into_iter().find(|shipment| {
            shipment
                .payload
                .as_ref()
                .map(|stored| payload_mentions_id(stored, &provider_id))
                .unwrap_or(false)
        }))
    }
}

/// Settles a pending payment and, when allowed, moves its order along.
/// Success drives `pending_payment -> paid`; failure drives
/// `pending_payment -> failed`. An order already past `pending_payment`
/// stays put. Returns the settled payment and the order transition, if any.
pub(crate) async fn apply_payment_outcome<C: ConnectionTrait>(
    conn: &C,
    existing: payment::Model,
    success: bool,
    transaction_id: Option<String>,
    raw: Option<Value>,
    from_webhook: bool,
) -> Result<(payment::Model, Option<(String, String)>), ServiceError> {
    let order_id = existing.order_id;
    let now = Utc::now();

    let mut active: payment::ActiveModel = existing.into();
    active.status = Set(if success {
        PaymentStatus::Success
    } else {
        PaymentStatus::Failure
    });
    if let Some(tx_id) = transaction_id {
        active.transaction_id = Set(Some(tx_id));
    }
    if let Some(raw) = raw {
        if from_webhook {
            active.raw_webhook = Set(Some(raw));
        } else {
            active.raw_response = Set(Some(raw));
        }
    }
    active.updated_at = Set(now);
    let settled = active.update(conn).await?;

    let target = if success {
        OrderStatus::Paid
    } else {
        OrderStatus::Failed
    };
    let order = order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
    let order_change = if order.status.can_transition_to(target) {
        let old_status = order.status.as_str().to_string();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(target);
        active.updated_at = Set(now);
        active.update(conn).await?;
        Some((old_status, target.as_str().to_string()))
    } else {
        None
    };

    Ok((settled, order_change))
}

async fn fulfill_if_paid<C: ConnectionTrait>(
    conn: &C,
    order_id: uuid::Uuid,
) -> Result<Option<(String, String)>, ServiceError> {
    let order = order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
    if !order.status.can_transition_to(OrderStatus::Fulfilled) {
        return Ok(None);
    }
    let old_status = order.status.as_str().to_string();
    let mut active: order::ActiveModel = order.into();
    active.status = Set(OrderStatus::Fulfilled);
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    Ok(Some((old_status, OrderStatus::Fulfilled.as_str().to_string())))
}

/// Verifies an HMAC-SHA256 hex signature over the raw body. Verification is
/// constant-time via the MAC itself.
pub(crate) fn verify_signature(
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), ServiceError> {
    let signature = signature
        .ok_or_else(|| ServiceError::ValidationError("Missing webhook signature".to_string()))?;
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let decoded = hex::decode(signature)
        .map_err(|_| ServiceError::ValidationError("Malformed webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("HMAC init failed: {}", e)))?;
    mac.update(body);
    mac.verify_slice(&decoded)
        .map_err(|_| ServiceError::ValidationError("Invalid webhook signature".to_string()))
}

/// Carrier webhooks wrap shipment fields in a `data` envelope
/// (`{event, data: {trackingNumber, id, trackingStatus: {...}}, metadata}`);
/// older integrations send the same fields flat at the top level.
fn extract_tracking_number(payload: &Value) -> Option<String> {
    payload
        .pointer("/data/trackingNumber")
        .or_else(|| payload.get("trackingNumber"))
        .or_else(|| payload.get("tracking_number"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn extract_status(payload: &Value) -> Option<String> {
    payload
        .pointer("/data/trackingStatus/trackingStatusCode")
        .or_else(|| payload.get("status"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn extract_provider_id(payload: &Value) -> Option<String> {
    let value = payload
        .pointer("/data/id")
        .or_else(|| payload.get("shipmentId"))
        .or_else(|| payload.get("id"))?;
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Carrier named by the webhook, when it names one. Lookups are scoped to
/// that carrier's shipments; payloads without one search across carriers.
fn extract_provider_name(payload: &Value) -> Option<String> {
    payload
        .pointer("/data/provider")
        .or_else(|| payload.get("provider"))
        .or_else(|| payload.get("carrier"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Whether a stored shipment payload carries the given provider id, either
/// at the top level or inside the last merged webhook.
fn payload_mentions_id(stored: &Value, provider_id: &str) -> bool {
    [
        "/id",
        "/shipmentId",
        "/last_webhook/id",
        "/last_webhook/shipmentId",
        "/last_webhook/data/id",
    ]
    .iter()
    .any(|pointer| match stored.pointer(pointer) {
        Some(Value::String(s)) => s == provider_id,
        Some(Value::Number(n)) => n.to_string() == provider_id,
        _ => false,
    })
}

/// Merges an incoming webhook into the stored payload under `last_webhook`,
/// preserving whatever else the payload already holds.
fn merge_last_webhook(stored: Option<Value>, incoming: &Value) -> Value {
    let mut base = match stored {
        Some(value @ Value::Object(_)) => value,
        _ => json!({}),
    };
    if let Some(map) = base.as_object_mut() {
        map.insert("last_webhook".to_string(), incoming.clone());
    }
    base
}

fn is_delivered_status(status: &str) -> bool {
    status.eq_ignore_ascii_case("delivered")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn signature_roundtrip() {
        let body = br#"{"event":"shipment.updated"}"#;
        let sig = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, Some(&sig)).is_ok());
        assert!(verify_signature("topsecret", body, Some(&format!("sha256={}", sig))).is_ok());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let sig = sign("topsecret", b"original");
        assert!(verify_signature("topsecret", b"tampered", Some(&sig)).is_err());
        assert!(verify_signature("other-secret", b"original", Some(&sig)).is_err());
        assert!(verify_signature("topsecret", b"original", None).is_err());
        assert!(verify_signature("topsecret", b"original", Some("zz-not-hex")).is_err());
    }

    #[test]
    fn merge_preserves_existing_payload_fields() {
        let stored = json!({"id": "ship-1", "carrier": "fastship"});
        let incoming = json!({"status": "in_transit"});
        let merged = merge_last_webhook(Some(stored), &incoming);
        assert_eq!(merged["id"], "ship-1");
        assert_eq!(merged["carrier"], "fastship");
        assert_eq!(merged["last_webhook"]["status"], "in_transit");
    }

    #[test]
    fn merge_replaces_previous_webhook() {
        let first = merge_last_webhook(None, &json!({"status": "accepted"}));
        let second = merge_last_webhook(Some(first), &json!({"status": "in_transit"}));
        assert_eq!(second["last_webhook"]["status"], "in_transit");
    }

    #[test]
    fn provider_id_matching_handles_strings_and_numbers() {
        assert!(payload_mentions_id(&json!({"id": "abc"}), "abc"));
        assert!(payload_mentions_id(&json!({"shipmentId": 42}), "42"));
        assert!(payload_mentions_id(
            &json!({"last_webhook": {"id": "abc"}}),
            "abc"
        ));
        assert!(!payload_mentions_id(&json!({"id": "abc"}), "def"));
    }

    #[test]
    fn tracking_number_extraction_ignores_empty() {
        assert_eq!(
            extract_tracking_number(&json!({"trackingNumber": "TN-1"})),
            Some("TN-1".to_string())
        );
        assert_eq!(extract_tracking_number(&json!({"trackingNumber": ""})), None);
        assert_eq!(extract_tracking_number(&json!({})), None);
    }

    #[test]
    fn carrier_data_envelope_takes_priority_over_flat_fields() {
        let payload = json!({
            "event": "TRACKING_UPDATED",
            "data": {
                "trackingNumber": "TN-NESTED",
                "id": "ship-77",
                "trackingStatus": {
                    "trackingStatusCode": "IN_TRANSIT",
                    "trackingSubStatusCode": "DEPARTED_FACILITY"
                }
            },
            "metadata": {},
            "trackingNumber": "TN-FLAT",
            "status": "created"
        });
        assert_eq!(
            extract_tracking_number(&payload),
            Some("TN-NESTED".to_string())
        );
        assert_eq!(extract_status(&payload), Some("IN_TRANSIT".to_string()));
        assert_eq!(extract_provider_id(&payload), Some("ship-77".to_string()));
    }

    #[test]
    fn flat_fields_still_parse_without_an_envelope() {
        let payload = json!({"status": "in_transit", "shipmentId": "ship-1"});
        assert_eq!(extract_status(&payload), Some("in_transit".to_string()));
        assert_eq!(extract_provider_id(&payload), Some("ship-1".to_string()));
        assert_eq!(extract_provider_name(&json!({"carrier": "fastship"})), Some("fastship".to_string()));
        assert_eq!(extract_provider_name(&json!({})), None);
    }
}
