mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::entities::discount::DiscountKind;

use common::{money, TestApp};

const GUEST: &[(&str, &str)] = &[("x-session-id", "sess-cart-test")];

async fn create_cart(app: &TestApp) -> String {
    let (status, body) = app
        .request(Method::GET, "/api/v1/carts/current", GUEST, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().expect("cart id").to_string()
}

#[tokio::test]
async fn current_cart_is_stable_per_session() {
    let app = TestApp::new().await;
    let first = create_cart(&app).await;
    let second = create_cart(&app).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn missing_identity_header_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request(Method::GET, "/api/v1/carts/current", &[], None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn adding_same_product_twice_merges_into_one_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("MERGE-1", dec!(10.00), 10).await;
    let cart_id = create_cart(&app).await;

    let uri = format!("/api/v1/carts/{}/items", cart_id);
    let payload = |qty: i32| json!({ "product_id": product.id, "quantity": qty });

    let (status, _) = app
        .request(Method::POST, &uri, GUEST, Some(payload(2)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(Method::POST, &uri, GUEST, Some(payload(3)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let items = body["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 5);
    assert_eq!(money(&items[0], "line_total"), dec!(50.00));
}

#[tokio::test]
async fn totals_follow_the_pricing_rules() {
    // 2 x 100.00 at the default 20% rate
    let app = TestApp::new().await;
    let product = app.seed_product("PRICE-1", dec!(100.00), 10).await;
    let cart_id = create_cart(&app).await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/carts/{}/items", cart_id),
            GUEST,
            Some(json!({ "product_id": product.id, "quantity": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&body, "subtotal"), dec!(200.00));
    assert_eq!(money(&body, "tax_total"), dec!(40.00));
    assert_eq!(money(&body, "grand_total"), dec!(240.00));
}

#[tokio::test]
async fn exceeding_stock_is_rejected_not_clamped() {
    let app = TestApp::new().await;
    let product = app.seed_product("STOCK-1", dec!(5.00), 3).await;
    let cart_id = create_cart(&app).await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/carts/{}/items", cart_id),
            GUEST,
            Some(json!({ "product_id": product.id, "quantity": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Insufficient stock"));

    // The cart stays empty after the rejection
    let (_, cart) = app
        .request(
            Method::GET,
            &format!("/api/v1/carts/{}", cart_id),
            GUEST,
            None,
        )
        .await;
    assert!(cart["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn merged_quantity_is_checked_against_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("STOCK-2", dec!(5.00), 5).await;
    let cart_id = create_cart(&app).await;
    let uri = format!("/api/v1/carts/{}/items", cart_id);

    let (status, _) = app
        .request(
            Method::POST,
            &uri,
            GUEST,
            Some(json!({ "product_id": product.id, "quantity": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // 3 already in cart; 3 more would exceed the 5 in stock
    let (status, _) = app
        .request(
            Method::POST,
            &uri,
            GUEST,
            Some(json!({ "product_id": product.id, "quantity": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn zero_quantity_update_removes_the_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("ZERO-1", dec!(5.00), 10).await;
    let cart_id = create_cart(&app).await;

    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", cart_id),
        GUEST,
        Some(json!({ "product_id": product.id, "quantity": 2 })),
    )
    .await;

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/carts/{}/items/{}", cart_id, product.id),
            GUEST,
            Some(json!({ "quantity": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
    assert_eq!(money(&body, "grand_total"), dec!(0));
}

#[tokio::test]
async fn removing_an_absent_product_is_not_found() {
    let app = TestApp::new().await;
    let cart_id = create_cart(&app).await;

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/carts/{}/items/{}", cart_id, uuid::Uuid::new_v4()),
            GUEST,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn percentage_discount_reduces_the_taxable_base() {
    let app = TestApp::new().await;
    let product = app.seed_product("DISC-1", dec!(100.00), 10).await;
    app.seed_discount("TEN", DiscountKind::Percentage, dec!(10), None)
        .await;
    let cart_id = create_cart(&app).await;

    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", cart_id),
        GUEST,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/carts/{}/discount", cart_id),
            GUEST,
            Some(json!({ "code": "TEN" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&body, "discount_total"), dec!(10.00));
    assert_eq!(money(&body, "tax_total"), dec!(18.00));
    assert_eq!(money(&body, "grand_total"), dec!(108.00));

    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/carts/{}/discount", cart_id),
            GUEST,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&body, "discount_total"), dec!(0));
    assert_eq!(money(&body, "grand_total"), dec!(120.00));
}

#[tokio::test]
async fn unknown_and_inactive_discount_codes_are_distinguished() {
    let app = TestApp::new().await;
    let product = app.seed_product("DISC-2", dec!(20.00), 10).await;
    app.seed_expired_discount("EXPIRED").await;
    let cart_id = create_cart(&app).await;

    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", cart_id),
        GUEST,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let uri = format!("/api/v1/carts/{}/discount", cart_id);
    let (status, _) = app
        .request(Method::POST, &uri, GUEST, Some(json!({ "code": "NOPE" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(
            Method::POST,
            &uri,
            GUEST,
            Some(json!({ "code": "EXPIRED" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exhausted_discount_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("DISC-3", dec!(20.00), 10).await;
    let discount = app
        .seed_discount("ONCE", DiscountKind::FixedAmount, dec!(5), Some(1))
        .await;

    // Simulate the single allowed use having happened
    use sea_orm::{ActiveModelTrait, ActiveValue::Set};
    let mut used: storefront_api::entities::discount::ActiveModel = discount.into();
    used.usage_count = Set(1);
    used.update(app.state.db.as_ref()).await.unwrap();

    let cart_id = create_cart(&app).await;
    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", cart_id),
        GUEST,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/carts/{}/discount", cart_id),
            GUEST,
            Some(json!({ "code": "ONCE" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("usage limit"));
}

#[tokio::test]
async fn guest_cart_merges_into_customer_cart_on_login() {
    let app = TestApp::new().await;
    let product = app.seed_product("LOGIN-1", dec!(10.00), 20).await;
    let customer_id = uuid::Uuid::new_v4().to_string();
    let customer: &[(&str, &str)] = &[("x-customer-id", &customer_id)];

    // Guest picks up 2
    let guest_cart = create_cart(&app).await;
    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", guest_cart),
        GUEST,
        Some(json!({ "product_id": product.id, "quantity": 2 })),
    )
    .await;

    // Customer already has 3 of the same product
    let (_, body) = app
        .request(Method::GET, "/api/v1/carts/current", customer, None)
        .await;
    let customer_cart = body["id"].as_str().unwrap().to_string();
    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", customer_cart),
        customer,
        Some(json!({ "product_id": product.id, "quantity": 3 })),
    )
    .await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/carts/merge",
            customer,
            Some(json!({ "session_id": "sess-cart-test" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"].as_str().unwrap(), customer_cart);
    assert_eq!(money(&body, "subtotal"), dec!(50.00));

    let (_, merged) = app
        .request(
            Method::GET,
            &format!("/api/v1/carts/{}", customer_cart),
            customer,
            None,
        )
        .await;
    let items = merged["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 5);

    // The guest cart is gone and the session gets a fresh one
    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/carts/{}", guest_cart),
            GUEST,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, fresh) = app
        .request(Method::GET, "/api/v1/carts/current", GUEST, None)
        .await;
    assert_ne!(fresh["id"].as_str().unwrap(), guest_cart);
    assert!(fresh["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn login_merge_clamps_to_available_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("LOGIN-2", dec!(10.00), 4).await;
    let customer_id = uuid::Uuid::new_v4().to_string();
    let customer: &[(&str, &str)] = &[("x-customer-id", &customer_id)];

    let guest_cart = create_cart(&app).await;
    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", guest_cart),
        GUEST,
        Some(json!({ "product_id": product.id, "quantity": 3 })),
    )
    .await;

    let (_, body) = app
        .request(Method::GET, "/api/v1/carts/current", customer, None)
        .await;
    let customer_cart = body["id"].as_str().unwrap().to_string();
    app.request(
        Method::POST,
        &format!("/api/v1/carts/{}/items", customer_cart),
        customer,
        Some(json!({ "product_id": product.id, "quantity": 3 })),
    )
    .await;

    // 3 + 3 exceeds the 4 in stock; the merge takes what is left
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/carts/merge",
            customer,
            Some(json!({ "session_id": "sess-cart-test" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(money(&body, "subtotal"), dec!(40.00));

    let (_, merged) = app
        .request(
            Method::GET,
            &format!("/api/v1/carts/{}", customer_cart),
            customer,
            None,
        )
        .await;
    let items = merged["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 4);
}
