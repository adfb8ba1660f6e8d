mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, sample_order_data, TestApp};
use serde_json::json;

#[tokio::test]
async fn stored_order_data_can_be_fetched_and_deleted() {
    let app = TestApp::new();

    let stored = app
        .request(
            Method::POST,
            "/api/temp-order-storage",
            Some(json!({ "sessionId": "cs_tmp_1", "orderData": sample_order_data() })),
        )
        .await;
    assert_eq!(stored.status(), StatusCode::CREATED);
    let body = response_json(stored).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["sessionId"], "cs_tmp_1");

    let fetched = app
        .request(Method::GET, "/api/temp-order-storage?sessionId=cs_tmp_1", None)
        .await;
    assert_eq!(fetched.status(), StatusCode::OK);
    let body = response_json(fetched).await;
    assert_eq!(body["orderData"]["userId"], "user-42");
    assert_eq!(body["orderData"]["formData"]["presenting"], "Club A");

    let deleted = app
        .request(
            Method::DELETE,
            "/api/temp-order-storage",
            Some(json!({ "sessionId": "cs_tmp_1" })),
        )
        .await;
    assert_eq!(deleted.status(), StatusCode::OK);

    let gone = app
        .request(Method::GET, "/api/temp-order-storage?sessionId=cs_tmp_1", None)
        .await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(gone).await["code"], "not_found");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let app = TestApp::new();
    let response = app
        .request(Method::GET, "/api/temp-order-storage?sessionId=cs_never", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_id_is_required() {
    let app = TestApp::new();

    let store = app
        .request(
            Method::POST,
            "/api/temp-order-storage",
            Some(json!({ "orderData": sample_order_data() })),
        )
        .await;
    assert_eq!(store.status(), StatusCode::BAD_REQUEST);

    let fetch = app
        .request(Method::GET, "/api/temp-order-storage", None)
        .await;
    assert_eq!(fetch.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn second_store_overwrites_the_first() {
    let app = TestApp::new();
    let mut updated = sample_order_data();
    updated["formData"]["presenting"] = json!("Club B");

    for order in [sample_order_data(), updated] {
        app.request(
            Method::POST,
            "/api/temp-order-storage",
            Some(json!({ "sessionId": "cs_tmp_2", "orderData": order })),
        )
        .await;
    }

    let fetched = app
        .request(Method::GET, "/api/temp-order-storage?sessionId=cs_tmp_2", None)
        .await;
    assert_eq!(
        response_json(fetched).await["orderData"]["formData"]["presenting"],
        "Club B"
    );
    assert_eq!(app.store.len(), 1);
}

#[tokio::test]
async fn completion_consumes_facade_stored_order_data() {
    use grodify_checkout::services::payment_processor::{
        PaymentStatus, ProcessorSession, SessionMetadata,
    };

    let app = TestApp::new();
    app.processor.insert_session(ProcessorSession {
        id: "cs_facade".into(),
        url: None,
        payment_status: PaymentStatus::Paid,
        metadata: SessionMetadata::new(),
        customer_email: None,
        amount_total: Some(1500),
    });
    app.request(
        Method::POST,
        "/api/temp-order-storage",
        Some(json!({ "sessionId": "cs_facade", "orderData": sample_order_data() })),
    )
    .await;

    let response = app
        .request(Method::GET, "/api/checkout/success?session_id=cs_facade", None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(app.backend.call_count(), 1);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn health_and_status_respond() {
    let app = TestApp::new();

    let health = app.request(Method::GET, "/health", None).await;
    assert_eq!(health.status(), StatusCode::OK);
    let body = response_json(health).await;
    assert_eq!(body["status"], "up");
    assert_eq!(body["correlation_store"], "in-memory");

    let status = app.request(Method::GET, "/api/status", None).await;
    assert_eq!(status.status(), StatusCode::OK);
    let body = response_json(status).await;
    assert_eq!(body["data"]["service"], "grodify-checkout");
    assert_eq!(body["data"]["webhook_verification"], false);
}
