//! Prometheus metrics for invoicing-api.

use crate::models::{Invoice, InvoiceStatus, Payment, PaymentStatus};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Request counter by action and outcome.
pub static REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_requests_total",
        "Total number of invoicing API requests",
        &["action", "status"] // status: ok, demo, client_error, server_error
    )
    .expect("Failed to register requests_total")
});

/// Request duration histogram by action.
pub static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicing_request_duration_seconds",
        "Invoicing API request duration in seconds",
        &["action"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register request_duration")
});

/// Invoice transitions by resulting status.
static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_invoices_total",
        "Total number of invoices by status",
        &["status"]
    )
    .expect("Failed to register invoices_total")
});

static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_payments_total",
        "Total number of payments by method",
        &["method"]
    )
    .expect("Failed to register payments_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Persistence failures answered with canned demo data.
pub static DEMO_FALLBACKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_demo_fallbacks_total",
        "Total number of responses served from demo data after a store failure",
        &["action"]
    )
    .expect("Failed to register demo_fallbacks_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

static INVOICE_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_invoice_amount_total",
        "Total invoice amount by currency",
        &["currency"]
    )
    .expect("Failed to register invoice_amount_total")
});

static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_payment_amount_total",
        "Total completed payment amount by currency",
        &["currency"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Payment methods reported under their own label.
const METHOD_LABELS: [&str; 10] = [
    "manual",
    "stripe",
    "card",
    "credit_card",
    "debit_card",
    "paypal",
    "bank_transfer",
    "check",
    "cash",
    "crypto",
];

/// Currencies reported under their own label.
const CURRENCY_LABELS: [&str; 12] = [
    "USD", "EUR", "GBP", "CAD", "AUD", "NZD", "JPY", "CHF", "INR", "SGD", "SEK", "BRL",
];

/// Payment methods are free text; anything outside the known set is `other`.
pub fn method_label(method: &str) -> &'static str {
    let method = method.trim().to_ascii_lowercase();
    METHOD_LABELS
        .iter()
        .find(|known| **known == method)
        .copied()
        .unwrap_or("other")
}

pub fn currency_label(currency: &str) -> &'static str {
    let currency = currency.trim().to_ascii_uppercase();
    CURRENCY_LABELS
        .iter()
        .find(|known| **known == currency)
        .copied()
        .unwrap_or("other")
}

fn amount_f64(amount: Decimal) -> f64 {
    amount.to_f64().unwrap_or_default()
}

/// Count an invoice entering `status`.
pub fn invoice_transition(status: InvoiceStatus) {
    INVOICES_TOTAL.with_label_values(&[status.as_str()]).inc();
}

/// Count a newly stored draft and its billed amount.
pub fn invoice_drafted(invoice: &Invoice) {
    invoice_transition(InvoiceStatus::Draft);
    INVOICE_AMOUNT_TOTAL
        .with_label_values(&[currency_label(&invoice.currency)])
        .inc_by(amount_f64(invoice.total));
}

/// Count a stored payment; only completed ones add to the collected amount.
pub fn payment_recorded(payment: &Payment) {
    PAYMENTS_TOTAL
        .with_label_values(&[method_label(&payment.method)])
        .inc();
    if payment.status == PaymentStatus::Completed {
        PAYMENT_AMOUNT_TOTAL
            .with_label_values(&[currency_label(&payment.currency)])
            .inc_by(amount_f64(payment.amount));
    }
}

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&REQUESTS_TOTAL);
    Lazy::force(&REQUEST_DURATION);
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DEMO_FALLBACKS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&INVOICE_AMOUNT_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
