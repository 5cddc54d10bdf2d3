//! Invoice model for invoicing-api.

use super::status::InvoiceStatus;
use crate::services::totals;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice with its line items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: String,
    pub invoice_number: String,
    pub client_id: Option<String>,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_address: Option<String>,
    pub items: Vec<InvoiceItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub sent_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub reminder_sent_count: i32,
    pub last_reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Status as observed on `today`: issued invoices past their due date read as overdue.
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        match self.status {
            InvoiceStatus::Sent | InvoiceStatus::Viewed if self.due_date < today => {
                InvoiceStatus::Overdue
            }
            status => status,
        }
    }

    /// Whole days past the due date, zero unless the invoice is effectively overdue.
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        if self.effective_status(today) != InvoiceStatus::Overdue {
            return 0;
        }
        (today - self.due_date).num_days().max(0)
    }
}

/// Line item stored against an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    pub tax_rate: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
}

/// Input for a new line item.
#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Option<Decimal>,
}

impl NewLineItem {
    /// Materialize the line for `invoice_id`, pricing it at `quantity * unit_price`.
    pub fn into_item(self, invoice_id: Uuid) -> Result<InvoiceItem, AppError> {
        let total = totals::line_total(self.quantity, self.unit_price)?;
        let tax_amount = match self.tax_rate {
            Some(rate) => Some(totals::percent_of(total, rate).ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Line item amounts are too large"))
            })?),
            None => None,
        };
        Ok(InvoiceItem {
            id: Uuid::new_v4(),
            invoice_id,
            description: self.description,
            quantity: self.quantity,
            unit_price: self.unit_price,
            total,
            tax_rate: self.tax_rate,
            tax_amount,
        })
    }
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone)]
pub struct ListInvoicesFilter {
    /// Matched against the effective status as of `as_of`.
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<String>,
    pub search: Option<String>,
    /// `None` returns every match.
    pub limit: Option<i64>,
    pub offset: i64,
    pub as_of: NaiveDate,
}

impl ListInvoicesFilter {
    pub fn all(as_of: NaiveDate) -> Self {
        Self {
            status: None,
            client_id: None,
            search: None,
            limit: None,
            offset: 0,
            as_of,
        }
    }

    /// In-memory equivalent of the SQL predicate.
    pub fn matches(&self, invoice: &Invoice) -> bool {
        if let Some(status) = self.status {
            if invoice.effective_status(self.as_of) != status {
                return false;
            }
        }
        if let Some(client_id) = &self.client_id {
            if invoice.client_id.as_deref() != Some(client_id.as_str()) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = invoice.client_name.to_lowercase().contains(&needle)
                || invoice.invoice_number.to_lowercase().contains(&needle)
                || invoice
                    .client_email
                    .as_deref()
                    .is_some_and(|email| email.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone, Default)]
pub struct CreateInvoice {
    pub client_id: Option<String>,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_address: Option<String>,
    pub items: Vec<NewLineItem>,
    pub tax_rate: Option<Decimal>,
    pub discount: Decimal,
    pub currency: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub template_id: Option<Uuid>,
}

/// Input for updating an invoice that is not yet paid or cancelled.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoice {
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub client_address: Option<String>,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub currency: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub terms: Option<String>,
}

impl UpdateInvoice {
    /// Whether the change affects the money fields.
    pub fn touches_totals(&self) -> bool {
        self.tax_rate.is_some() || self.discount.is_some()
    }
}

/// Input for marking an invoice paid.
#[derive(Debug, Clone)]
pub struct MarkPaid {
    pub record_payment: bool,
    pub amount: Option<Decimal>,
    pub method: Option<String>,
    pub transaction_id: Option<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn invoice(status: InvoiceStatus, total: Decimal, due_date: NaiveDate) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            invoice_number: "INV-202401-001".to_string(),
            client_id: Some("client-1".to_string()),
            client_name: "Acme Ltd".to_string(),
            client_email: Some("billing@acme.test".to_string()),
            client_address: None,
            items: Vec::new(),
            subtotal: total,
            tax_rate: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            discount: Decimal::ZERO,
            total,
            currency: "USD".to_string(),
            status,
            issue_date: due_date - chrono::Duration::days(30),
            due_date,
            paid_date: None,
            sent_at: None,
            notes: None,
            terms: None,
            reminder_sent_count: 0,
            last_reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
