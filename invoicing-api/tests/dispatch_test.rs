//! Action dispatch integration tests for invoicing-api.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn unknown_post_action_is_rejected() {
    let app = TestApp::new();

    let (status, body) = app.post(json!({ "action": "explode" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("explode"));
}

#[tokio::test]
async fn missing_post_action_is_rejected() {
    let app = TestApp::new();

    let (status, body) = app.post(json!({ "client_name": "Acme" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unknown_get_action_is_rejected() {
    let app = TestApp::new();

    let (status, body) = app.get("action=export").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = TestApp::new();

    let request = Request::post("/api/admin/invoicing")
        .header("X-User-ID", "user-test-1")
        .header("content-type", "application/json")
        .body(Body::from("{\"action\": \"create_invoice\","))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn missing_user_header_is_unauthorized() {
    let app = TestApp::new();

    let request = Request::get("/api/admin/invoicing?action=invoices")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let request = Request::post("/api/admin/invoicing")
        .header("X-User-ID", "   ")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "action": "process_recurring" }).to_string()))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_without_action_returns_overview() {
    let app = TestApp::new();
    app.create_simple_invoice().await;

    let (status, body) = app.get("").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body.get("demo").is_none());
    assert_eq!(body["data"]["stats"]["totalInvoices"], 1);
    assert_eq!(body["data"]["recent_invoices"].as_array().unwrap().len(), 1);
    assert!(body["data"]["upcoming_recurring"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn overview_lists_only_the_five_newest_invoices() {
    let app = TestApp::new();
    for _ in 0..7 {
        app.create_simple_invoice().await;
    }

    let (_, body) = app.get("action=overview").await;

    assert_eq!(body["data"]["stats"]["totalInvoices"], 7);
    assert_eq!(body["data"]["recent_invoices"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn validation_failures_are_bad_requests() {
    let app = TestApp::new();

    let (status, body) = app
        .post(json!({
            "action": "create_invoice",
            "client_name": "",
            "items": []
        }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation error");

    let (status, _) = app
        .post(json!({
            "action": "create_invoice",
            "client_name": "Acme",
            "client_email": "not-an-email"
        }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(json!({
            "action": "create_invoice",
            "client_name": "Acme",
            "items": [{ "description": "Refund", "quantity": 1, "unit_price": -20 }]
        }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_id_in_query_is_a_bad_request() {
    let app = TestApp::new();

    let (status, body) = app.get("action=invoice&id=not-a-uuid").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let app = TestApp::new();

    let request = Request::get("/api/admin/invoicing?action=stats")
        .header("X-User-ID", "user-test-1")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.respond(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-42");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}
