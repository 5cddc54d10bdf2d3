//! Persistence seam for invoicing data.
//!
//! Every method is scoped by the owning `user_id`. Implementations must run the
//! multi-step writes (`add_item`, `record_payment`, `mark_paid`, `insert_template`,
//! `record_recurring_run`) atomically.

use crate::models::{
    Invoice, InvoiceItem, InvoiceTemplate, ListInvoicesFilter, Payment, PaymentOutcome,
    RecurringInvoice,
};
use crate::services::stats::BillingStats;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert an invoice with its items. A duplicate invoice number for the
    /// owner is reported as `AppError::Conflict`.
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<Invoice, AppError>;

    async fn get_invoice(&self, user_id: &str, invoice_id: Uuid)
        -> Result<Option<Invoice>, AppError>;

    /// Newest first.
    async fn list_invoices(
        &self,
        user_id: &str,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Persist header fields, status and totals. Items are left untouched.
    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, AppError>;

    /// Delete the invoice only if it is still a draft. Returns whether a row was removed.
    async fn delete_draft_invoice(&self, user_id: &str, invoice_id: Uuid)
        -> Result<bool, AppError>;

    /// Append `item` and recompute the invoice totals from all of its items.
    async fn add_item(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        item: &InvoiceItem,
    ) -> Result<Invoice, AppError>;

    /// Bump the reminder counter and stamp `sent_at` as the latest reminder.
    async fn record_reminder(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<Invoice, AppError>;

    /// Store `invoice` (already moved to paid) and, when given, the settling payment.
    async fn mark_paid(
        &self,
        invoice: &Invoice,
        payment: Option<&Payment>,
    ) -> Result<Invoice, AppError>;

    /// Insert `payment`, sum the completed payments of its invoice and flip the
    /// invoice to paid with `paid_date = today` once the sum covers the total.
    async fn record_payment(
        &self,
        payment: &Payment,
        today: NaiveDate,
    ) -> Result<PaymentOutcome, AppError>;

    /// Newest first. `invoice_id` narrows to one invoice.
    async fn list_payments(
        &self,
        user_id: &str,
        invoice_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Payment>, AppError>;

    /// Insert a template. When it is the default, the owner's other defaults are
    /// cleared first.
    async fn insert_template(&self, template: &InvoiceTemplate)
        -> Result<InvoiceTemplate, AppError>;

    async fn get_template(
        &self,
        user_id: &str,
        template_id: Uuid,
    ) -> Result<Option<InvoiceTemplate>, AppError>;

    async fn list_templates(&self, user_id: &str) -> Result<Vec<InvoiceTemplate>, AppError>;

    async fn increment_template_usage(&self, user_id: &str, template_id: Uuid)
        -> Result<(), AppError>;

    /// Create or replace the schedule of `config.invoice_id`.
    async fn upsert_recurring(&self, config: &RecurringInvoice)
        -> Result<RecurringInvoice, AppError>;

    /// Ordered by next invoice date. `active` narrows by the active flag.
    async fn list_recurring(
        &self,
        user_id: &str,
        active: Option<bool>,
    ) -> Result<Vec<RecurringInvoice>, AppError>;

    /// Insert the generated invoice and store `advanced` in place of `due`, together.
    /// Returns `None` without writing when the stored schedule no longer matches
    /// `due` (another run already advanced it).
    async fn record_recurring_run(
        &self,
        generated: &Invoice,
        due: &RecurringInvoice,
        advanced: &RecurringInvoice,
    ) -> Result<Option<Invoice>, AppError>;

    async fn save_stats(&self, user_id: &str, stats: &BillingStats) -> Result<(), AppError>;
}
