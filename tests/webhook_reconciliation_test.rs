mod common;

use axum::http::{Method, StatusCode};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sha2::Sha256;

use common::TestApp;

const GUEST: &[(&str, &str)] = &[("x-session-id", "sess-webhook-test")];
const SECRET: &str = "whsec_test";

fn sign(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Runs a cart through checkout and returns (order_id, order_number).
async fn place_order(app: &TestApp, sku: &str) -> (String, String) {
    let product = app.seed_product(sku, dec!(40.00), 10).await;

    let (_, cart) = app
        .request(Method::GET, "/api/v1/carts/current", GUEST, None)
        .await;
    let cart_id = cart["id"].as_str().unwrap().to_string();

    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", cart_id),
        GUEST,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;
    app.request(
        Method::POST,
        &format!("/api/v1/checkout/{}/addresses", cart_id),
        GUEST,
        Some(json!({
            "shipping": {
                "name": "Jane Doe",
                "country": "US",
                "city": "Portland",
                "line1": "100 Main St"
            },
            "billing": {
                "name": "Jane Doe",
                "country": "US",
                "city": "Portland",
                "line1": "100 Main St"
            }
        })),
    )
    .await;
    app.request(
        Method::POST,
        &format!("/api/v1/checkout/{}/rates", cart_id),
        GUEST,
        None,
    )
    .await;
    app.request(
        Method::POST,
        &format!("/api/v1/checkout/{}/shipping", cart_id),
        GUEST,
        Some(json!({ "provider": "flat_rate", "service_code": "flat_rate" })),
    )
    .await;

    let (status, confirmed) = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/confirm", cart_id),
            GUEST,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        confirmed["order"]["id"].as_str().unwrap().to_string(),
        confirmed["order"]["order_number"]
            .as_str()
            .unwrap()
            .to_string(),
    )
}

/// Opens a payment attempt for the order and returns its correlation id.
async fn open_payment(app: &TestApp, order_id: &str) -> String {
    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/payments/orders/{}/initialize", order_id),
            GUEST,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    body["correlation_id"].as_str().unwrap().to_string()
}

async fn fetch_order(app: &TestApp, order_id: &str) -> Value {
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            GUEST,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    body
}

/// Sends a signed shipment webhook; the payload is serialized once so the
/// signature covers exactly the bytes on the wire.
async fn send_shipment_webhook(app: &TestApp, payload: Value) -> (StatusCode, Value) {
    let body = payload.to_string();
    let signature = sign(&body);
    app.request(
        Method::POST,
        "/api/v1/webhooks/shipments",
        &[("x-webhook-signature", signature.as_str())],
        Some(payload),
    )
    .await
}

fn secured() -> impl FnOnce(&mut storefront_api::config::AppConfig) {
    |cfg| cfg.shipment_webhook_secret = Some(SECRET.to_string())
}

#[tokio::test]
async fn signed_shipment_webhook_updates_status_and_tracking() {
    let app = TestApp::with_config(secured()).await;
    let (order_id, order_number) = place_order(&app, "WH-1").await;

    let (status, body) = send_shipment_webhook(
        &app,
        json!({
            "event": "shipment.updated",
            "orderNumber": order_number,
            "status": "in_transit",
            "trackingNumber": "TN-12345",
            "shipmentId": "prov-9001"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["event"], "shipment.updated");
    assert_eq!(body["updated"], true);

    let order = fetch_order(&app, &order_id).await;
    let shipment = &order["shipments"][0];
    assert_eq!(shipment["status"], "in_transit");
    assert_eq!(shipment["tracking_number"], "TN-12345");
}

#[tokio::test]
async fn nested_carrier_envelope_updates_status_and_tracking() {
    let app = TestApp::with_config(secured()).await;
    let (order_id, order_number) = place_order(&app, "WH-10").await;

    let (status, body) = send_shipment_webhook(
        &app,
        json!({
            "event": "TRACKING_UPDATED",
            "data": {
                "trackingNumber": "TN-900",
                "id": "prov-31",
                "trackingStatus": {
                    "trackingStatusCode": "IN_TRANSIT",
                    "trackingSubStatusCode": "DEPARTED_FACILITY"
                }
            },
            "metadata": { "orderNumber": order_number }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event"], "TRACKING_UPDATED");
    assert_eq!(body["updated"], true);

    let order = fetch_order(&app, &order_id).await;
    let shipment = &order["shipments"][0];
    assert_eq!(shipment["status"], "IN_TRANSIT");
    assert_eq!(shipment["tracking_number"], "TN-900");
}

#[tokio::test]
async fn redelivery_without_tracking_keeps_the_known_number() {
    let app = TestApp::with_config(secured()).await;
    let (order_id, order_number) = place_order(&app, "WH-2").await;

    send_shipment_webhook(
        &app,
        json!({
            "orderNumber": order_number,
            "status": "in_transit",
            "trackingNumber": "TN-77"
        }),
    )
    .await;

    // Follow-up update is matched by tracking number alone and carries none
    let (status, body) = send_shipment_webhook(
        &app,
        json!({
            "trackingNumber": "TN-77",
            "status": "out_for_delivery"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], true);

    let order = fetch_order(&app, &order_id).await;
    let shipment = &order["shipments"][0];
    assert_eq!(shipment["status"], "out_for_delivery");
    assert_eq!(shipment["tracking_number"], "TN-77");
}

#[tokio::test]
async fn bad_or_missing_signature_is_rejected() {
    let app = TestApp::with_config(secured()).await;
    place_order(&app, "WH-3").await;

    let payload = json!({ "status": "in_transit" });
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/webhooks/shipments",
            &[("x-webhook-signature", "deadbeef")],
            Some(payload.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(Method::POST, "/api/v1/webhooks/shipments", &[], Some(payload))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unmatched_shipment_payload_is_acknowledged() {
    let app = TestApp::with_config(secured()).await;
    place_order(&app, "WH-4").await;

    let (status, body) = send_shipment_webhook(
        &app,
        json!({
            "event": "shipment.updated",
            "orderNumber": "ORD-00000000-XXXXXXXX",
            "status": "in_transit"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event"], "shipment.updated");
    assert_eq!(body["updated"], false);
}

#[tokio::test]
async fn payment_webhook_settles_the_payment_and_the_order() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, "WH-5").await;
    let correlation_id = open_payment(&app, &order_id).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/webhooks/payments",
            &[],
            Some(json!({
                "conversationId": correlation_id,
                "status": "success",
                "paymentStatus": "PAID",
                "paymentId": "tx-555"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["updated"], true);

    let order = fetch_order(&app, &order_id).await;
    assert_eq!(order["status"], "paid");
    let payment = &order["payments"][0];
    assert_eq!(payment["status"], "success");
    assert_eq!(payment["transaction_id"], "tx-555");
}

#[tokio::test]
async fn payment_webhook_matched_by_provider_transaction_id() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, "WH-11").await;
    let correlation_id = open_payment(&app, &order_id).await;

    // The provider learned our payment under its own transaction id
    use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
    use storefront_api::entities::payment;
    let row = payment::Entity::find()
        .filter(payment::Column::CorrelationId.eq(correlation_id.as_str()))
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    let mut known: payment::ActiveModel = row.into();
    known.transaction_id = Set(Some("tx-999".to_string()));
    known.update(app.state.db.as_ref()).await.unwrap();

    // Delivery keyed only by the provider's id, no conversationId
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/webhooks/payments",
            &[],
            Some(json!({
                "paymentId": "tx-999",
                "status": "success",
                "paymentStatus": "PAID"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], true);

    let order = fetch_order(&app, &order_id).await;
    assert_eq!(order["status"], "paid");
    assert_eq!(order["payments"][0]["status"], "success");
}

#[tokio::test]
async fn shipment_webhook_for_another_carrier_is_not_matched() {
    let app = TestApp::with_config(secured()).await;
    let (order_id, order_number) = place_order(&app, "WH-12").await;

    send_shipment_webhook(
        &app,
        json!({
            "orderNumber": order_number,
            "status": "in_transit",
            "trackingNumber": "TN-55"
        }),
    )
    .await;

    // Same tracking number, but scoped to a carrier we never booked with
    let (status, body) = send_shipment_webhook(
        &app,
        json!({
            "trackingNumber": "TN-55",
            "carrier": "other_carrier",
            "status": "delivered"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], false);

    let order = fetch_order(&app, &order_id).await;
    assert_eq!(order["shipments"][0]["status"], "in_transit");
}

#[tokio::test]
async fn settled_payment_never_regresses_on_redelivery() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, "WH-6").await;
    let correlation_id = open_payment(&app, &order_id).await;

    let success = json!({
        "conversationId": correlation_id,
        "status": "success",
        "paymentStatus": "SUCCESS"
    });
    let (_, first) = app
        .request(Method::POST, "/api/v1/webhooks/payments", &[], Some(success.clone()))
        .await;
    assert_eq!(first["updated"], true);

    // Redelivery and a contradictory failure verdict are both ignored
    let (_, second) = app
        .request(Method::POST, "/api/v1/webhooks/payments", &[], Some(success))
        .await;
    assert_eq!(second["updated"], false);

    let (_, third) = app
        .request(
            Method::POST,
            "/api/v1/webhooks/payments",
            &[],
            Some(json!({
                "conversationId": correlation_id,
                "status": "failure",
                "paymentStatus": "FAILED"
            })),
        )
        .await;
    assert_eq!(third["updated"], false);

    let order = fetch_order(&app, &order_id).await;
    assert_eq!(order["status"], "paid");
}

#[tokio::test]
async fn failed_payment_webhook_fails_the_order() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, "WH-7").await;
    let correlation_id = open_payment(&app, &order_id).await;

    let (_, body) = app
        .request(
            Method::POST,
            "/api/v1/webhooks/payments",
            &[],
            Some(json!({
                "conversationId": correlation_id,
                "status": "failure",
                "paymentStatus": "FAILED"
            })),
        )
        .await;
    assert_eq!(body["updated"], true);

    let order = fetch_order(&app, &order_id).await;
    assert_eq!(order["status"], "failed");
    assert_eq!(order["payments"][0]["status"], "failure");
}

#[tokio::test]
async fn unknown_correlation_id_is_acknowledged_without_effect() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/webhooks/payments",
            &[],
            Some(json!({
                "conversationId": "does-not-exist",
                "status": "success",
                "paymentStatus": "SUCCESS"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["updated"], false);
}

#[tokio::test]
async fn delivered_shipment_fulfills_a_paid_order() {
    let app = TestApp::with_config(secured()).await;
    let (order_id, order_number) = place_order(&app, "WH-8").await;
    let correlation_id = open_payment(&app, &order_id).await;

    app.request(
        Method::POST,
        "/api/v1/webhooks/payments",
        &[],
        Some(json!({
            "conversationId": correlation_id,
            "status": "success",
            "paymentStatus": "SUCCESS"
        })),
    )
    .await;

    let (_, body) = send_shipment_webhook(
        &app,
        json!({
            "orderNumber": order_number,
            "status": "delivered",
            "trackingNumber": "TN-88"
        }),
    )
    .await;
    assert_eq!(body["updated"], true);

    let order = fetch_order(&app, &order_id).await;
    assert_eq!(order["status"], "fulfilled");
    assert_eq!(order["shipments"][0]["status"], "delivered");
}

#[tokio::test]
async fn delivered_shipment_does_not_fulfill_an_unpaid_order() {
    let app = TestApp::with_config(secured()).await;
    let (order_id, order_number) = place_order(&app, "WH-9").await;

    let (_, body) = send_shipment_webhook(
        &app,
        json!({
            "orderNumber": order_number,
            "status": "delivered"
        }),
    )
    .await;
    assert_eq!(body["updated"], true);

    // Shipment state is recorded but the unpaid order stays put
    let order = fetch_order(&app, &order_id).await;
    assert_eq!(order["status"], "pending_payment");
    assert_eq!(order["shipments"][0]["status"], "delivered");
}
