//! Payment model for invoicing-api.

use super::invoice::Invoice;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pending" => PaymentStatus::Pending,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            _ => PaymentStatus::Completed,
        }
    }
}

/// Money received against an invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub paid_at: DateTime<Utc>,
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    pub amount: Decimal,
    pub currency: Option<String>,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

/// Result of recording a payment: the stored row, the invoice after the
/// balance check, and the completed total paid so far.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub invoice: Invoice,
    pub amount_paid: Decimal,
    pub settled: bool,
}

/// Sum of completed payments.
pub fn completed_total<'a>(payments: impl IntoIterator<Item = &'a Payment>) -> Decimal {
    payments
        .into_iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .map(|p| p.amount)
        .sum()
}
