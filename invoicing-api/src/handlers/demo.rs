//! Canned responses served when the store fails while demo mode is on.

use serde_json::{json, Value};

const DEMO_INVOICE_ID: &str = "00000000-0000-4000-8000-000000000001";
const DEMO_TEMPLATE_ID: &str = "00000000-0000-4000-8000-000000000002";
const DEMO_RECURRING_ID: &str = "00000000-0000-4000-8000-000000000003";
const DEMO_PAYMENT_ID: &str = "00000000-0000-4000-8000-000000000004";

fn invoice(status: &str) -> Value {
    let (reminders, last_reminder) = if status == "overdue" {
        (1, json!("2024-02-20T09:00:00Z"))
    } else {
        (0, Value::Null)
    };
    json!({
        "id": DEMO_INVOICE_ID,
        "user_id": "demo",
        "invoice_number": "INV-202401-042",
        "client_id": "demo-client",
        "client_name": "Northwind Studio",
        "client_email": "accounts@northwind.example",
        "client_address": null,
        "items": [
            {
                "id": "00000000-0000-4000-8000-000000000011",
                "invoice_id": DEMO_INVOICE_ID,
                "description": "Brand identity design",
                "quantity": 1.0,
                "unit_price": 1500.0,
                "total": 1500.0,
                "tax_rate": null,
                "tax_amount": null
            },
            {
                "id": "00000000-0000-4000-8000-000000000012",
                "invoice_id": DEMO_INVOICE_ID,
                "description": "Website consultation (hours)",
                "quantity": 4.0,
                "unit_price": 125.0,
                "total": 500.0,
                "tax_rate": null,
                "tax_amount": null
            }
        ],
        "subtotal": 2000.0,
        "tax_rate": 10.0,
        "tax_amount": 200.0,
        "discount": 0.0,
        "total": 2200.0,
        "currency": "USD",
        "status": status,
        "effective_status": status,
        "days_overdue": 0,
        "issue_date": "2024-01-15",
        "due_date": "2024-02-14",
        "paid_date": null,
        "sent_at": null,
        "notes": "Thank you for your business.",
        "terms": "Net 30",
        "reminder_sent_count": reminders,
        "last_reminder_sent_at": last_reminder,
        "created_at": "2024-01-15T09:00:00Z",
        "updated_at": "2024-01-15T09:00:00Z"
    })
}

fn stats() -> Value {
    json!({
        "totalOutstanding": 4700.0,
        "paidThisMonth": 3200.0,
        "overdueAmount": 1250.0,
        "averageInvoiceValue": 1850.0,
        "totalInvoices": 12,
        "paidInvoices": 7,
        "pendingInvoices": 3,
        "overdueInvoices": 2
    })
}

fn template() -> Value {
    json!({
        "id": DEMO_TEMPLATE_ID,
        "user_id": "demo",
        "name": "Monthly retainer",
        "description": "Standard monthly design retainer",
        "items": [
            {
                "id": "00000000-0000-4000-8000-000000000021",
                "description": "Design retainer",
                "quantity": 1.0,
                "unit_price": 2000.0
            }
        ],
        "tax_rate": 10.0,
        "currency": "USD",
        "terms": "Net 30",
        "notes": null,
        "is_default": true,
        "usage_count": 3,
        "created_at": "2024-01-01T09:00:00Z"
    })
}

fn recurring() -> Value {
    json!({
        "id": DEMO_RECURRING_ID,
        "user_id": "demo",
        "invoice_id": DEMO_INVOICE_ID,
        "cycle": "monthly",
        "start_date": "2024-01-15",
        "end_date": null,
        "next_invoice_date": "2024-02-15",
        "occurrences": 12,
        "current_occurrence": 1,
        "is_active": true,
        "created_at": "2024-01-15T09:00:00Z",
        "updated_at": "2024-01-15T09:00:00Z"
    })
}

fn payment() -> Value {
    json!({
        "id": DEMO_PAYMENT_ID,
        "invoice_id": DEMO_INVOICE_ID,
        "user_id": "demo",
        "amount": 2200.0,
        "currency": "USD",
        "method": "bank_transfer",
        "status": "completed",
        "transaction_id": "demo-txn-0001",
        "paid_at": "2024-01-20T12:00:00Z"
    })
}

/// Placeholder data for `action`, shaped like the real response.
pub fn payload(action: &str) -> Value {
    match action {
        "overview" => json!({
            "stats": stats(),
            "recent_invoices": [invoice("sent")],
            "upcoming_recurring": [recurring()]
        }),
        "invoices" => json!([invoice("sent")]),
        "invoice" | "create_invoice" | "update_invoice" | "add_item" | "duplicate_invoice" => {
            invoice("draft")
        }
        "send_reminder" => invoice("overdue"),
        "send_invoice" => invoice("sent"),
        "mark_paid" => invoice("paid"),
        "cancel_invoice" => invoice("cancelled"),
        "delete_invoice" => json!({ "id": DEMO_INVOICE_ID }),
        "payments" => json!([payment()]),
        "record_payment" => json!({
            "payment": payment(),
            "invoice": invoice("paid"),
            "amount_paid": 2200.0,
            "settled": true
        }),
        "templates" => json!([template()]),
        "create_template" => template(),
        "recurring" => json!([recurring()]),
        "setup_recurring" => recurring(),
        "process_recurring" => json!({ "generated": 0, "invoices": [] }),
        "stats" => stats(),
        _ => json!({}),
    }
}
