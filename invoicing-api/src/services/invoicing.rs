//! Invoicing operations: lifecycle rules on top of an [`InvoiceStore`].

use crate::models::{
    CreateInvoice, CreateTemplate, Invoice, InvoiceItem, InvoiceStatus, InvoiceTemplate,
    ListInvoicesFilter, MarkPaid, NewLineItem, Operation, Payment, PaymentOutcome, PaymentStatus,
    RecordPayment, RecurringInvoice, SetupRecurring, TemplateItem, UpdateInvoice,
};
use crate::services::metrics;
use crate::services::numbering::generate_invoice_number;
use crate::services::stats::BillingStats;
use crate::services::store::InvoiceStore;
use crate::services::totals;
use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Attempts at finding a free invoice number before giving up with a conflict.
pub const MAX_NUMBER_ATTEMPTS: usize = 5;
pub const DEFAULT_PAYMENT_TERMS_DAYS: u64 = 30;
pub const DEFAULT_CURRENCY: &str = "USD";
pub const OVERVIEW_LIMIT: usize = 5;

/// Dashboard summary returned by the overview action.
#[derive(Debug, Clone)]
pub struct Overview {
    pub stats: BillingStats,
    pub recent_invoices: Vec<Invoice>,
    pub upcoming_recurring: Vec<RecurringInvoice>,
}

fn not_found(what: &str) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} not found", what))
}

#[derive(Clone)]
pub struct InvoicingService {
    store: Arc<dyn InvoiceStore>,
}

impl InvoicingService {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn InvoiceStore> {
        &self.store
    }

    async fn require_invoice(&self, user_id: &str, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.store
            .get_invoice(user_id, invoice_id)
            .await?
            .ok_or_else(|| not_found("Invoice"))
    }

    /// Insert a fresh invoice, drawing a new number whenever the previous one collides.
    async fn persist_with_number(
        &self,
        mut invoice: Invoice,
        today: NaiveDate,
        schedule: Option<(&RecurringInvoice, &RecurringInvoice)>,
    ) -> Result<Option<Invoice>, AppError> {
        let mut attempt = 1;
        loop {
            invoice.invoice_number = generate_invoice_number(today);
            let result = match schedule {
                Some((due, advanced)) => {
                    self.store
                        .record_recurring_run(&invoice, due, advanced)
                        .await
                }
                None => self.store.insert_invoice(&invoice).await.map(Some),
            };
            match result {
                Err(AppError::Conflict(e)) if attempt < MAX_NUMBER_ATTEMPTS => {
                    warn!(attempt = attempt, error = %e, "Invoice number collision, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn overview(&self, user_id: &str, today: NaiveDate) -> Result<Overview, AppError> {
        let invoices = self
            .store
            .list_invoices(user_id, &ListInvoicesFilter::all(today))
            .await?;
        let stats = BillingStats::from_invoices(&invoices, today);
        let recent_invoices = invoices.into_iter().take(OVERVIEW_LIMIT).collect();

        let upcoming_recurring = self
            .store
            .list_recurring(user_id, Some(true))
            .await?
            .into_iter()
            .take(OVERVIEW_LIMIT)
            .collect();

        Ok(Overview {
            stats,
            recent_invoices,
            upcoming_recurring,
        })
    }

    pub async fn list_invoices(
        &self,
        user_id: &str,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        self.store.list_invoices(user_id, filter).await
    }

    pub async fn get_invoice(&self, user_id: &str, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.require_invoice(user_id, invoice_id).await
    }

    pub async fn list_payments(
        &self,
        user_id: &str,
        invoice_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Payment>, AppError> {
        self.store
            .list_payments(user_id, invoice_id, limit, offset)
            .await
    }

    pub async fn list_templates(&self, user_id: &str) -> Result<Vec<InvoiceTemplate>, AppError> {
        self.store.list_templates(user_id).await
    }

    pub async fn list_recurring(
        &self,
        user_id: &str,
        active: Option<bool>,
    ) -> Result<Vec<RecurringInvoice>, AppError> {
        self.store.list_recurring(user_id, active).await
    }

    /// Aggregate every invoice of the owner and keep the latest snapshot.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn stats(&self, user_id: &str, today: NaiveDate) -> Result<BillingStats, AppError> {
        let invoices = self
            .store
            .list_invoices(user_id, &ListInvoicesFilter::all(today))
            .await?;
        let stats = BillingStats::from_invoices(&invoices, today);
        self.store.save_stats(user_id, &stats).await?;
        Ok(stats)
    }

    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn create_invoice(
        &self,
        user_id: &str,
        input: CreateInvoice,
        today: NaiveDate,
    ) -> Result<Invoice, AppError> {
        let template = match input.template_id {
            Some(template_id) => Some(
                self.store
                    .get_template(user_id, template_id)
                    .await?
                    .ok_or_else(|| not_found("Template"))?,
            ),
            None => None,
        };

        let lines: Vec<NewLineItem> = match &template {
            Some(template) if input.items.is_empty() => {
                template.items.iter().map(NewLineItem::from).collect()
            }
            _ => input.items,
        };
        let tax_rate = input
            .tax_rate
            .or(template.as_ref().map(|t| t.tax_rate))
            .unwrap_or(Decimal::ZERO);
        let currency = input
            .currency
            .or(template.as_ref().map(|t| t.currency.clone()))
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let terms = input
            .terms
            .or(template.as_ref().and_then(|t| t.terms.clone()));
        let notes = input
            .notes
            .or(template.as_ref().and_then(|t| t.notes.clone()));

        let issue_date = input.issue_date.unwrap_or(today);
        let due_date = match input.due_date {
            Some(due_date) => due_date,
            None => issue_date
                .checked_add_days(Days::new(DEFAULT_PAYMENT_TERMS_DAYS))
                .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Issue date out of range")))?,
        };

        let id = Uuid::new_v4();
        let items = lines
            .into_iter()
            .map(|line| line.into_item(id))
            .collect::<Result<Vec<_>, _>>()?;
        let computed = totals::for_items(&items, tax_rate, input.discount)?;
        let now = Utc::now();

        let invoice = Invoice {
            id,
            user_id: user_id.to_string(),
            invoice_number: String::new(),
            client_id: input.client_id,
            client_name: input.client_name,
            client_email: input.client_email,
            client_address: input.client_address,
            items,
            subtotal: computed.subtotal,
            tax_rate,
            tax_amount: computed.tax_amount,
            discount: input.discount,
            total: computed.total,
            currency,
            status: InvoiceStatus::Draft,
            issue_date,
            due_date,
            paid_date: None,
            sent_at: None,
            notes,
            terms,
            reminder_sent_count: 0,
            last_reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .persist_with_number(invoice, today, None)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invoice was not stored")))?;

        if let Some(template) = &template {
            self.store
                .increment_template_usage(user_id, template.id)
                .await?;
        }

        metrics::invoice_drafted(&created);

        info!(
            invoice_id = %created.id,
            invoice_number = %created.invoice_number,
            total = %created.total,
            "Invoice drafted"
        );

        Ok(created)
    }

    #[instrument(skip(self, changes), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn update_invoice(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        changes: UpdateInvoice,
    ) -> Result<Invoice, AppError> {
        let mut invoice = self.require_invoice(user_id, invoice_id).await?;
        invoice.status.permits(Operation::Edit)?;

        let recompute = changes.touches_totals();
        if let Some(client_id) = changes.client_id {
            invoice.client_id = Some(client_id);
        }
        if let Some(client_name) = changes.client_name {
            invoice.client_name = client_name;
        }
        if let Some(client_email) = changes.client_email {
            invoice.client_email = Some(client_email);
        }
        if let Some(client_address) = changes.client_address {
            invoice.client_address = Some(client_address);
        }
        if let Some(tax_rate) = changes.tax_rate {
            invoice.tax_rate = tax_rate;
        }
        if let Some(discount) = changes.discount {
            invoice.discount = discount;
        }
        if let Some(currency) = changes.currency {
            invoice.currency = currency;
        }
        if let Some(issue_date) = changes.issue_date {
            invoice.issue_date = issue_date;
        }
        if let Some(due_date) = changes.due_date {
            invoice.due_date = due_date;
        }
        if let Some(notes) = changes.notes {
            invoice.notes = Some(notes);
        }
        if let Some(terms) = changes.terms {
            invoice.terms = Some(terms);
        }

        if recompute {
            let computed =
                totals::for_items(&invoice.items, invoice.tax_rate, invoice.discount)?;
            invoice.subtotal = computed.subtotal;
            invoice.tax_amount = computed.tax_amount;
            invoice.total = computed.total;
        }
        invoice.updated_at = Utc::now();

        self.store.update_invoice(&invoice).await
    }

    #[instrument(skip(self), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, user_id: &str, invoice_id: Uuid) -> Result<(), AppError> {
        let invoice = self.require_invoice(user_id, invoice_id).await?;
        invoice.status.permits(Operation::Delete)?;

        // The store re-checks the draft status; a concurrent send wins.
        if !self.store.delete_draft_invoice(user_id, invoice_id).await? {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Only draft invoices can be deleted"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn send_invoice(&self, user_id: &str, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let mut invoice = self.require_invoice(user_id, invoice_id).await?;
        invoice.status.permits(Operation::Send)?;

        let now = Utc::now();
        invoice.status = InvoiceStatus::Sent;
        invoice.sent_at = Some(now);
        invoice.updated_at = now;

        let sent = self.store.update_invoice(&invoice).await?;
        metrics::invoice_transition(InvoiceStatus::Sent);
        Ok(sent)
    }

    #[instrument(skip(self), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        user_id: &str,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let mut invoice = self.require_invoice(user_id, invoice_id).await?;
        invoice.status.permits(Operation::Cancel)?;

        invoice.status = InvoiceStatus::Cancelled;
        invoice.updated_at = Utc::now();

        let cancelled = self.store.update_invoice(&invoice).await?;
        metrics::invoice_transition(InvoiceStatus::Cancelled);
        Ok(cancelled)
    }

    /// Mark the invoice paid today. With `record_payment`, a completed payment for
    /// the requested amount (default: the invoice total) is stored alongside.
    #[instrument(skip(self, input), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn mark_paid(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        input: MarkPaid,
        today: NaiveDate,
    ) -> Result<Invoice, AppError> {
        let mut invoice = self.require_invoice(user_id, invoice_id).await?;
        invoice.status.permits(Operation::MarkPaid)?;

        let payment = if input.record_payment {
            let amount = input.amount.unwrap_or(invoice.total);
            (amount > Decimal::ZERO).then(|| Payment {
                id: Uuid::new_v4(),
                invoice_id,
                user_id: user_id.to_string(),
                amount,
                currency: invoice.currency.clone(),
                method: input.method.unwrap_or_else(|| "manual".to_string()),
                status: PaymentStatus::Completed,
                transaction_id: input.transaction_id,
                paid_at: Utc::now(),
            })
        } else {
            None
        };

        invoice.status = InvoiceStatus::Paid;
        invoice.paid_date = Some(today);
        invoice.updated_at = Utc::now();

        let paid = self.store.mark_paid(&invoice, payment.as_ref()).await?;

        metrics::invoice_transition(InvoiceStatus::Paid);
        if let Some(payment) = &payment {
            metrics::payment_recorded(payment);
        }

        Ok(paid)
    }

    /// Copy any invoice into a fresh draft issued today with its own number.
    #[instrument(skip(self), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn duplicate_invoice(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        today: NaiveDate,
    ) -> Result<Invoice, AppError> {
        let source = self.require_invoice(user_id, invoice_id).await?;
        source.status.permits(Operation::Duplicate)?;

        let mut copy = draft_copy_of(&source, today)?;
        copy.due_date = today
            .checked_add_days(Days::new(DEFAULT_PAYMENT_TERMS_DAYS))
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Due date out of range")))?;

        let created = self
            .persist_with_number(copy, today, None)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invoice was not stored")))?;

        metrics::invoice_drafted(&created);
        info!(
            source_id = %source.id,
            invoice_id = %created.id,
            invoice_number = %created.invoice_number,
            "Invoice duplicated"
        );

        Ok(created)
    }

    /// Note a payment reminder against an issued, unpaid invoice.
    #[instrument(skip(self), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn send_reminder(
        &self,
        user_id: &str,
        invoice_id: Uuid,
    ) -> Result<Invoice, AppError> {
        let invoice = self.require_invoice(user_id, invoice_id).await?;
        invoice.status.permits(Operation::Remind)?;

        self.store
            .record_reminder(user_id, invoice_id, Utc::now())
            .await
    }

    #[instrument(skip(self, line), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn add_item(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        line: NewLineItem,
    ) -> Result<Invoice, AppError> {
        let invoice = self.require_invoice(user_id, invoice_id).await?;
        invoice.status.permits(Operation::AddItem)?;

        let item = line.into_item(invoice_id)?;
        self.store.add_item(user_id, invoice_id, &item).await
    }

    #[instrument(skip(self, input), fields(user_id = %user_id, invoice_id = %invoice_id))]
    pub async fn record_payment(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        input: RecordPayment,
        today: NaiveDate,
    ) -> Result<PaymentOutcome, AppError> {
        let invoice = self.require_invoice(user_id, invoice_id).await?;
        invoice.status.permits(Operation::RecordPayment)?;

        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be greater than zero"
            )));
        }

        if let Some(currency) = &input.currency {
            if !currency.eq_ignore_ascii_case(&invoice.currency) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Payment currency {} does not match invoice currency {}",
                    currency,
                    invoice.currency
                )));
            }
        }

        let payment = Payment {
            id: Uuid::new_v4(),
            invoice_id,
            user_id: user_id.to_string(),
            amount: input.amount,
            currency: invoice.currency.clone(),
            method: input.method,
            status: input.status,
            transaction_id: input.transaction_id,
            paid_at: Utc::now(),
        };

        let outcome = self.store.record_payment(&payment, today).await?;

        metrics::payment_recorded(&payment);
        if outcome.settled && invoice.status != InvoiceStatus::Paid {
            metrics::invoice_transition(InvoiceStatus::Paid);
        }

        Ok(outcome)
    }

    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn create_template(
        &self,
        user_id: &str,
        input: CreateTemplate,
    ) -> Result<InvoiceTemplate, AppError> {
        let template = InvoiceTemplate {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: input.name,
            description: input.description,
            items: input
                .items
                .into_iter()
                .map(|item| TemplateItem {
                    id: Uuid::new_v4(),
                    description: item.description,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            tax_rate: input.tax_rate,
            currency: input.currency,
            terms: input.terms,
            notes: input.notes,
            is_default: input.is_default,
            usage_count: 0,
            created_at: Utc::now(),
        };

        self.store.insert_template(&template).await
    }

    #[instrument(skip(self, input), fields(user_id = %user_id, invoice_id = %input.invoice_id))]
    pub async fn setup_recurring(
        &self,
        user_id: &str,
        input: SetupRecurring,
        today: NaiveDate,
    ) -> Result<RecurringInvoice, AppError> {
        let invoice = self.require_invoice(user_id, input.invoice_id).await?;
        invoice.status.permits(Operation::Recur)?;

        let start_date = input.start_date.unwrap_or(today);
        if let Some(end_date) = input.end_date {
            if end_date < start_date {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "end_date must not be before start_date"
                )));
            }
        }
        let next_invoice_date = input
            .cycle
            .next_date(start_date)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("start_date out of range")))?;

        let now = Utc::now();
        let config = RecurringInvoice {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            invoice_id: input.invoice_id,
            cycle: input.cycle,
            start_date,
            end_date: input.end_date,
            next_invoice_date,
            occurrences: input.occurrences,
            current_occurrence: 0,
            is_active: input
                .end_date
                .map_or(true, |end_date| next_invoice_date <= end_date),
            created_at: now,
            updated_at: now,
        };

        self.store.upsert_recurring(&config).await
    }

    /// Generate one invoice for every schedule due on or before `today`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn process_recurring(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<Invoice>, AppError> {
        let due: Vec<RecurringInvoice> = self
            .store
            .list_recurring(user_id, Some(true))
            .await?
            .into_iter()
            .filter(|config| config.is_due(today))
            .collect();

        let mut generated = Vec::with_capacity(due.len());
        for config in &due {
            let Some(source) = self.store.get_invoice(user_id, config.invoice_id).await? else {
                warn!(recurring_id = %config.id, "Source invoice missing, skipping schedule");
                continue;
            };

            let invoice = draft_copy_of(&source, config.next_invoice_date)?;
            let advanced = config.advanced(Utc::now());

            match self
                .persist_with_number(invoice, today, Some((config, &advanced)))
                .await?
            {
                Some(created) => {
                    metrics::invoice_drafted(&created);
                    generated.push(created);
                }
                None => {
                    info!(recurring_id = %config.id, "Schedule already advanced by another run");
                }
            }
        }

        info!(due = due.len(), generated = generated.len(), "Recurring invoices processed");

        Ok(generated)
    }
}

/// Draft copy of `source` issued on `issue_date`, keeping the source's payment terms.
/// Payment and reminder state starts over.
fn draft_copy_of(source: &Invoice, issue_date: NaiveDate) -> Result<Invoice, AppError> {
    let terms = source.due_date - source.issue_date;
    let due_date = issue_date
        .checked_add_signed(terms)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Due date out of range")))?;

    let id = Uuid::new_v4();
    let now = Utc::now();
    let items = source
        .items
        .iter()
        .map(|item| InvoiceItem {
            id: Uuid::new_v4(),
            invoice_id: id,
            ..item.clone()
        })
        .collect();

    Ok(Invoice {
        id,
        invoice_number: String::new(),
        items,
        status: InvoiceStatus::Draft,
        issue_date,
        due_date,
        paid_date: None,
        sent_at: None,
        reminder_sent_count: 0,
        last_reminder_sent_at: None,
        created_at: now,
        updated_at: now,
        ..source.clone()
    })
}
