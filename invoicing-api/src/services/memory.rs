//! In-memory store for local development and tests.

use crate::models::{
    completed_total, Invoice, InvoiceItem, InvoiceStatus, InvoiceTemplate, ListInvoicesFilter,
    Payment, PaymentOutcome, RecurringInvoice,
};
use crate::services::stats::BillingStats;
use crate::services::store::InvoiceStore;
use crate::services::totals;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    invoices: HashMap<Uuid, Invoice>,
    payments: Vec<Payment>,
    templates: HashMap<Uuid, InvoiceTemplate>,
    recurring: HashMap<Uuid, RecurringInvoice>,
    stats: HashMap<String, BillingStats>,
}

impl State {
    fn owned_invoice_mut(&mut self, user_id: &str, invoice_id: Uuid) -> Option<&mut Invoice> {
        self.invoices
            .get_mut(&invoice_id)
            .filter(|invoice| invoice.user_id == user_id)
    }

    fn check_number_free(&self, invoice: &Invoice) -> Result<(), AppError> {
        let taken = self.invoices.values().any(|existing| {
            existing.user_id == invoice.user_id && existing.invoice_number == invoice.invoice_number
        });
        if taken {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice number '{}' already exists",
                invoice.invoice_number
            )));
        }
        Ok(())
    }
}

/// Store backed by a single `RwLock`-guarded map set. Writers are serialized,
/// so every multi-step write is atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<Invoice, AppError> {
        let mut state = self.state.write().await;
        state.check_number_free(invoice)?;
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice.clone())
    }

    async fn get_invoice(
        &self,
        user_id: &str,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .get(&invoice_id)
            .filter(|invoice| invoice.user_id == user_id)
            .cloned())
    }

    async fn list_invoices(
        &self,
        user_id: &str,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|invoice| invoice.user_id == user_id && filter.matches(invoice))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let limit = filter
            .limit
            .and_then(|limit| usize::try_from(limit).ok())
            .unwrap_or(usize::MAX);
        Ok(invoices.into_iter().skip(offset).take(limit).collect())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, AppError> {
        let mut state = self.state.write().await;
        let stored = state
            .owned_invoice_mut(&invoice.user_id, invoice.id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        let items = std::mem::take(&mut stored.items);
        *stored = Invoice {
            items,
            ..invoice.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_draft_invoice(
        &self,
        user_id: &str,
        invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        let is_draft = state
            .owned_invoice_mut(user_id, invoice_id)
            .is_some_and(|invoice| invoice.status == InvoiceStatus::Draft);
        if !is_draft {
            return Ok(false);
        }
        state.invoices.remove(&invoice_id);
        state.payments.retain(|p| p.invoice_id != invoice_id);
        state.recurring.retain(|_, r| r.invoice_id != invoice_id);
        Ok(true)
    }

    async fn add_item(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        item: &InvoiceItem,
    ) -> Result<Invoice, AppError> {
        let mut state = self.state.write().await;
        let invoice = state
            .owned_invoice_mut(user_id, invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let mut items = invoice.items.clone();
        items.push(item.clone());
        let recomputed = totals::for_items(&items, invoice.tax_rate, invoice.discount)?;
        invoice.items = items;
        invoice.subtotal = recomputed.subtotal;
        invoice.tax_amount = recomputed.tax_amount;
        invoice.total = recomputed.total;
        invoice.updated_at = Utc::now();
        Ok(invoice.clone())
    }

    async fn record_reminder(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<Invoice, AppError> {
        let mut state = self.state.write().await;
        let invoice = state
            .owned_invoice_mut(user_id, invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        invoice.reminder_sent_count += 1;
        invoice.last_reminder_sent_at = Some(sent_at);
        invoice.updated_at = sent_at;
        Ok(invoice.clone())
    }

    async fn mark_paid(
        &self,
        invoice: &Invoice,
        payment: Option<&Payment>,
    ) -> Result<Invoice, AppError> {
        let mut state = self.state.write().await;
        let stored = state
            .owned_invoice_mut(&invoice.user_id, invoice.id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        stored.status = invoice.status;
        stored.paid_date = invoice.paid_date;
        stored.updated_at = invoice.updated_at;
        let updated = stored.clone();

        if let Some(payment) = payment {
            state.payments.push(payment.clone());
        }
        Ok(updated)
    }

    async fn record_payment(
        &self,
        payment: &Payment,
        today: NaiveDate,
    ) -> Result<PaymentOutcome, AppError> {
        let mut state = self.state.write().await;
        if state
            .owned_invoice_mut(&payment.user_id, payment.invoice_id)
            .is_none()
        {
            return Err(AppError::NotFound(anyhow::anyhow!("Invoice not found")));
        }

        state.payments.push(payment.clone());
        let amount_paid = completed_total(
            state
                .payments
                .iter()
                .filter(|p| p.invoice_id == payment.invoice_id),
        );

        let invoice = state
            .owned_invoice_mut(&payment.user_id, payment.invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;
        let settled = amount_paid >= invoice.total;
        if settled && invoice.status != InvoiceStatus::Paid {
            invoice.status = InvoiceStatus::Paid;
            invoice.paid_date = Some(today);
            invoice.updated_at = Utc::now();
        }

        Ok(PaymentOutcome {
            payment: payment.clone(),
            invoice: invoice.clone(),
            amount_paid,
            settled,
        })
    }

    async fn list_payments(
        &self,
        user_id: &str,
        invoice_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Payment>, AppError> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter(|p| invoice_id.map_or(true, |id| p.invoice_id == id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));

        let offset = usize::try_from(offset).unwrap_or(0);
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(payments.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_template(
        &self,
        template: &InvoiceTemplate,
    ) -> Result<InvoiceTemplate, AppError> {
        let mut state = self.state.write().await;
        if template.is_default {
            for existing in state.templates.values_mut() {
                if existing.user_id == template.user_id {
                    existing.is_default = false;
                }
            }
        }
        state.templates.insert(template.id, template.clone());
        Ok(template.clone())
    }

    async fn get_template(
        &self,
        user_id: &str,
        template_id: Uuid,
    ) -> Result<Option<InvoiceTemplate>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .templates
            .get(&template_id)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn list_templates(&self, user_id: &str) -> Result<Vec<InvoiceTemplate>, AppError> {
        let state = self.state.read().await;
        let mut templates: Vec<InvoiceTemplate> = state
            .templates
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        templates.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(templates)
    }

    async fn increment_template_usage(
        &self,
        user_id: &str,
        template_id: Uuid,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if let Some(template) = state
            .templates
            .get_mut(&template_id)
            .filter(|t| t.user_id == user_id)
        {
            template.usage_count += 1;
        }
        Ok(())
    }

    async fn upsert_recurring(
        &self,
        config: &RecurringInvoice,
    ) -> Result<RecurringInvoice, AppError> {
        let mut state = self.state.write().await;
        let existing = state
            .recurring
            .values()
            .find(|r| r.invoice_id == config.invoice_id)
            .map(|r| (r.id, r.created_at));

        let stored = match existing {
            Some((id, created_at)) => RecurringInvoice {
                id,
                created_at,
                ..config.clone()
            },
            None => config.clone(),
        };
        state.recurring.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_recurring(
        &self,
        user_id: &str,
        active: Option<bool>,
    ) -> Result<Vec<RecurringInvoice>, AppError> {
        let state = self.state.read().await;
        let mut configs: Vec<RecurringInvoice> = state
            .recurring
            .values()
            .filter(|r| r.user_id == user_id)
            .filter(|r| active.map_or(true, |active| r.is_active == active))
            .cloned()
            .collect();
        configs.sort_by_key(|r| r.next_invoice_date);
        Ok(configs)
    }

    async fn record_recurring_run(
        &self,
        generated: &Invoice,
        due: &RecurringInvoice,
        advanced: &RecurringInvoice,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state.write().await;
        let unchanged = state.recurring.get(&due.id).is_some_and(|stored| {
            stored.user_id == due.user_id
                && stored.is_active
                && stored.next_invoice_date == due.next_invoice_date
        });
        if !unchanged {
            return Ok(None);
        }
        state.check_number_free(generated)?;
        state.invoices.insert(generated.id, generated.clone());
        state.recurring.insert(advanced.id, advanced.clone());
        Ok(Some(generated.clone()))
    }

    async fn save_stats(&self, user_id: &str, stats: &BillingStats) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.stats.insert(user_id.to_string(), stats.clone());
        Ok(())
    }
}
