//! Billing statistics integration tests for invoicing-api.

mod common;

use common::{days_ago, money, TestApp, OTHER_USER_ID};
use serde_json::json;
use uuid::Uuid;

async fn invoice_for(app: &TestApp, amount: u32, due: String) -> Uuid {
    app.create_invoice(json!({
        "client_name": "Acme Ltd",
        "issue_date": days_ago(60).to_string(),
        "due_date": due,
        "items": [{ "description": "Work", "quantity": 1, "unit_price": amount }]
    }))
    .await
}

#[tokio::test]
async fn stats_count_paid_and_overdue_from_effective_status() {
    let app = TestApp::new();

    let paid = invoice_for(&app, 100, days_ago(0).to_string()).await;
    app.post_ok(json!({ "action": "send_invoice", "invoice_id": paid }))
        .await;
    app.post_ok(json!({ "action": "record_payment", "invoice_id": paid, "amount": 100 }))
        .await;

    let overdue = invoice_for(&app, 50, days_ago(10).to_string()).await;
    app.post_ok(json!({ "action": "send_invoice", "invoice_id": overdue }))
        .await;

    let (_, body) = app.get("action=stats").await;
    let stats = &body["data"];

    assert_eq!(money(&stats["paidThisMonth"]), 100.0);
    assert_eq!(money(&stats["overdueAmount"]), 50.0);
    assert_eq!(money(&stats["totalOutstanding"]), 50.0);
    assert_eq!(money(&stats["averageInvoiceValue"]), 100.0);
    assert_eq!(stats["totalInvoices"], 2);
    assert_eq!(stats["paidInvoices"], 1);
    assert_eq!(stats["overdueInvoices"], 1);
    assert_eq!(stats["pendingInvoices"], 0);
}

#[tokio::test]
async fn drafts_and_cancelled_invoices_are_not_outstanding() {
    let app = TestApp::new();

    invoice_for(&app, 80, days_ago(5).to_string()).await;
    let cancelled = invoice_for(&app, 20, days_ago(5).to_string()).await;
    app.post_ok(json!({ "action": "cancel_invoice", "invoice_id": cancelled }))
        .await;
    let pending = app.create_simple_invoice().await;
    app.post_ok(json!({ "action": "send_invoice", "invoice_id": pending }))
        .await;

    let (_, body) = app.get("action=stats").await;
    let stats = &body["data"];

    assert_eq!(stats["totalInvoices"], 3);
    assert_eq!(stats["pendingInvoices"], 1);
    assert_eq!(money(&stats["totalOutstanding"]), 275.0);
    assert_eq!(money(&stats["overdueAmount"]), 0.0);
    assert_eq!(money(&stats["averageInvoiceValue"]), 0.0);
}

#[tokio::test]
async fn stats_are_scoped_to_owner() {
    let app = TestApp::new();
    app.create_simple_invoice().await;

    let (_, body) = app.as_user(OTHER_USER_ID).get("action=stats").await;

    assert_eq!(body["data"]["totalInvoices"], 0);
    assert_eq!(money(&body["data"]["totalOutstanding"]), 0.0);
}
