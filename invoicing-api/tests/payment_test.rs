//! Payment integration tests for invoicing-api.

mod common;

use axum::http::StatusCode;
use common::{money, today, TestApp};
use serde_json::json;
use uuid::Uuid;

async fn sent_invoice_for_100(app: &TestApp) -> Uuid {
    let id = app
        .create_invoice(json!({
            "client_name": "Acme Ltd",
            "items": [{ "description": "Retainer", "quantity": 1, "unit_price": 100 }]
        }))
        .await;
    app.post_ok(json!({ "action": "send_invoice", "invoice_id": id }))
        .await;
    id
}

#[tokio::test]
async fn partial_payments_settle_the_invoice_once_covered() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;

        let data = app
            .post_ok(json!({
                "action": "record_payment",
                "invoice_id": id,
                "amount": 30,
                "method": "card"
            }))
            .await;
        assert_eq!(data["settled"], false);
        assert_eq!(money(&data["amount_paid"]), 30.0);
        assert_eq!(data["invoice"]["status"], "sent");
        assert!(data["invoice"]["paid_date"].is_null());

        let data = app
            .post_ok(json!({
                "action": "record_payment",
                "invoice_id": id,
                "amount": 70,
                "payment_method": "bank_transfer"
            }))
            .await;
        assert_eq!(data["settled"], true);
        assert_eq!(money(&data["amount_paid"]), 100.0);
        assert_eq!(data["invoice"]["status"], "paid");
        assert_eq!(data["invoice"]["paid_date"], today().to_string());
        assert_eq!(data["payment"]["method"], "bank_transfer");

        let (_, body) = app.get(&format!("action=payments&invoiceId={}", id)).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        app.cleanup().await;
    }
}

#[tokio::test]
async fn pending_payments_do_not_count_towards_the_total() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;

        let data = app
            .post_ok(json!({
                "action": "record_payment",
                "invoice_id": id,
                "amount": 100,
                "status": "pending"
            }))
            .await;

        assert_eq!(data["settled"], false);
        assert_eq!(money(&data["amount_paid"]), 0.0);
        assert_eq!(data["payment"]["method"], "manual");
        app.cleanup().await;
    }
}

#[tokio::test]
async fn overpayment_is_accepted() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;

        let data = app
            .post_ok(json!({ "action": "record_payment", "invoice_id": id, "amount": 150 }))
            .await;

        assert_eq!(data["settled"], true);
        assert_eq!(money(&data["amount_paid"]), 150.0);
        app.cleanup().await;
    }
}

#[tokio::test]
async fn payment_amount_must_be_positive() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;

        for amount in [json!(0), json!(-5)] {
            let (status, body) = app
                .post(json!({ "action": "record_payment", "invoice_id": id, "amount": amount }))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
        }
        app.cleanup().await;
    }
}

#[tokio::test]
async fn payments_against_cancelled_invoice_are_rejected() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;
        app.post_ok(json!({ "action": "cancel_invoice", "invoice_id": id }))
            .await;

        let (status, body) = app
            .post(json!({ "action": "record_payment", "invoice_id": id, "amount": 10 }))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        app.cleanup().await;
    }
}

#[tokio::test]
async fn payment_for_unknown_invoice_is_not_found() {
    for app in TestApp::every_store().await {

        let (status, _) = app
            .post(json!({
                "action": "record_payment",
                "invoice_id": Uuid::new_v4(),
                "amount": 10
            }))
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        app.cleanup().await;
    }
}

#[tokio::test]
async fn mark_paid_records_the_invoice_total_by_default() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;
        app.post_ok(json!({ "action": "record_payment", "invoice_id": id, "amount": 40 }))
            .await;

        let data = app
            .post_ok(json!({ "action": "mark_paid", "invoice_id": id, "method": "cash" }))
            .await;
        assert_eq!(data["status"], "paid");
        assert_eq!(data["paid_date"], today().to_string());

        let (_, body) = app.get(&format!("action=payments&invoiceId={}", id)).await;
        let payments = body["data"].as_array().unwrap();
        assert_eq!(payments.len(), 2, "{}", app.backend);
        let settling = payments
            .iter()
            .find(|p| p["method"] == "cash")
            .expect("Missing settling payment");
        assert_eq!(money(&settling["amount"]), 100.0, "{}", app.backend);
        app.cleanup().await;
    }
}

#[tokio::test]
async fn mark_paid_honours_an_explicit_amount() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;

        app.post_ok(json!({ "action": "mark_paid", "invoice_id": id, "amount": 60 }))
            .await;

        let (_, body) = app.get(&format!("action=payments&invoiceId={}", id)).await;
        let payments = body["data"].as_array().unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(money(&payments[0]["amount"]), 60.0);
        assert_eq!(payments[0]["method"], "manual");
        app.cleanup().await;
    }
}

#[tokio::test]
async fn payment_in_another_currency_is_rejected() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;

        let (status, body) = app
            .post(json!({
                "action": "record_payment",
                "invoice_id": id,
                "amount": 100,
                "currency": "EUR"
            }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", app.backend);
        assert_eq!(body["success"], false);

        let (_, body) = app.get(&format!("action=payments&invoiceId={}", id)).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let data = app
            .post_ok(json!({
                "action": "record_payment",
                "invoice_id": id,
                "amount": 100,
                "currency": "USD"
            }))
            .await;
        assert_eq!(data["payment"]["currency"], "USD");
        assert_eq!(data["settled"], true);
        app.cleanup().await;
    }
}

#[tokio::test]
async fn mark_paid_without_payment_leaves_payments_alone() {
    for app in TestApp::every_store().await {
        let id = sent_invoice_for_100(&app).await;

        let data = app
            .post_ok(json!({ "action": "mark_paid", "invoice_id": id, "record_payment": false }))
            .await;
        assert_eq!(data["status"], "paid");

        let (_, body) = app.get("action=payments").await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let (status, _) = app
            .post(json!({ "action": "mark_paid", "invoice_id": id }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        app.cleanup().await;
    }
}
