//! PostgreSQL store for invoicing-api.

use crate::models::{
    Invoice, InvoiceItem, InvoiceStatus, InvoiceTemplate, ListInvoicesFilter, Payment,
    PaymentOutcome, PaymentStatus, RecurrenceCycle, RecurringInvoice, TemplateItem,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::stats::BillingStats;
use crate::services::store::InvoiceStore;
use crate::services::totals;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "id, user_id, invoice_number, client_id, client_name, \
     client_email, client_address, subtotal, tax_rate, tax_amount, discount, total, currency, \
     status, issue_date, due_date, paid_date, sent_at, notes, terms, reminder_sent_count, \
     last_reminder_sent_at, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, invoice_id, description, quantity, unit_price, total, tax_rate, tax_amount";

const PAYMENT_COLUMNS: &str =
    "id, invoice_id, user_id, amount, currency, method, status, transaction_id, paid_at";

const TEMPLATE_COLUMNS: &str = "id, user_id, name, description, tax_rate, currency, terms, \
     notes, is_default, usage_count, created_at";

const RECURRING_COLUMNS: &str = "id, user_id, invoice_id, cycle, start_date, end_date, \
     next_invoice_date, occurrences, current_occurrence, is_active, created_at, updated_at";

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    user_id: String,
    invoice_number: String,
    client_id: Option<String>,
    client_name: String,
    client_email: Option<String>,
    client_address: Option<String>,
    subtotal: Decimal,
    tax_rate: Decimal,
    tax_amount: Decimal,
    discount: Decimal,
    total: Decimal,
    currency: String,
    status: String,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    paid_date: Option<NaiveDate>,
    sent_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    terms: Option<String>,
    reminder_sent_count: i32,
    last_reminder_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InvoiceRow {
    fn into_invoice(self, items: Vec<InvoiceItem>) -> Invoice {
        Invoice {
            id: self.id,
            user_id: self.user_id,
            invoice_number: self.invoice_number,
            client_id: self.client_id,
            client_name: self.client_name,
            client_email: self.client_email,
            client_address: self.client_address,
            items,
            subtotal: self.subtotal,
            tax_rate: self.tax_rate,
            tax_amount: self.tax_amount,
            discount: self.discount,
            total: self.total,
            currency: self.currency,
            status: InvoiceStatus::from_string(&self.status),
            issue_date: self.issue_date,
            due_date: self.due_date,
            paid_date: self.paid_date,
            sent_at: self.sent_at,
            notes: self.notes,
            terms: self.terms,
            reminder_sent_count: self.reminder_sent_count,
            last_reminder_sent_at: self.last_reminder_sent_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    invoice_id: Uuid,
    user_id: String,
    amount: Decimal,
    currency: String,
    method: String,
    status: String,
    transaction_id: Option<String>,
    paid_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            invoice_id: row.invoice_id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency,
            method: row.method,
            status: PaymentStatus::from_string(&row.status),
            transaction_id: row.transaction_id,
            paid_at: row.paid_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TemplateRow {
    id: Uuid,
    user_id: String,
    name: String,
    description: Option<String>,
    tax_rate: Decimal,
    currency: String,
    terms: Option<String>,
    notes: Option<String>,
    is_default: bool,
    usage_count: i32,
    created_at: DateTime<Utc>,
}

impl TemplateRow {
    fn into_template(self, items: Vec<TemplateItem>) -> InvoiceTemplate {
        InvoiceTemplate {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            description: self.description,
            items,
            tax_rate: self.tax_rate,
            currency: self.currency,
            terms: self.terms,
            notes: self.notes,
            is_default: self.is_default,
            usage_count: self.usage_count,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TemplateItemRow {
    template_id: Uuid,
    id: Uuid,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
}

#[derive(Debug, FromRow)]
struct RecurringRow {
    id: Uuid,
    user_id: String,
    invoice_id: Uuid,
    cycle: String,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    next_invoice_date: NaiveDate,
    occurrences: Option<i32>,
    current_occurrence: i32,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RecurringRow> for RecurringInvoice {
    fn from(row: RecurringRow) -> Self {
        RecurringInvoice {
            id: row.id,
            user_id: row.user_id,
            invoice_id: row.invoice_id,
            cycle: RecurrenceCycle::from_string(&row.cycle),
            start_date: row.start_date,
            end_date: row.end_date,
            next_invoice_date: row.next_invoice_date,
            occurrences: row.occurrences,
            current_occurrence: row.current_occurrence,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Escape LIKE wildcards so user search text matches literally.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-api"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    /// Items for each of `invoice_ids`, in insertion order.
    async fn fetch_items<'e, E>(
        executor: E,
        invoice_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<InvoiceItem>>, AppError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM invoice_items WHERE invoice_id = ANY($1) \
             ORDER BY invoice_id, position"
        );
        let items = sqlx::query_as::<_, InvoiceItem>(&sql)
            .bind(invoice_ids)
            .fetch_all(executor)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to load invoice items: {}", e))
            })?;

        let mut grouped: HashMap<Uuid, Vec<InvoiceItem>> = HashMap::new();
        for item in items {
            grouped.entry(item.invoice_id).or_default().push(item);
        }
        Ok(grouped)
    }

    async fn attach_items(&self, rows: Vec<InvoiceRow>) -> Result<Vec<Invoice>, AppError> {
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut items = Self::fetch_items(&self.pool, &ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let invoice_items = items.remove(&row.id).unwrap_or_default();
                row.into_invoice(invoice_items)
            })
            .collect())
    }

    async fn lock_invoice(
        conn: &mut PgConnection,
        user_id: &str,
        invoice_id: Uuid,
    ) -> Result<InvoiceRow, AppError> {
        let sql =
            format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE user_id = $1 AND id = $2 FOR UPDATE");
        sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(user_id)
            .bind(invoice_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
    }

    /// Insert the invoice row and its items on `conn`.
    async fn write_invoice(conn: &mut PgConnection, invoice: &Invoice) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, user_id, invoice_number, client_id, client_name,
                client_email, client_address, subtotal, tax_rate, tax_amount, discount, total,
                currency, status, issue_date, due_date, paid_date, sent_at, notes, terms,
                reminder_sent_count, last_reminder_sent_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24)
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.user_id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.client_id)
        .bind(&invoice.client_name)
        .bind(&invoice.client_email)
        .bind(&invoice.client_address)
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.discount)
        .bind(invoice.total)
        .bind(&invoice.currency)
        .bind(invoice.status.as_str())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.paid_date)
        .bind(invoice.sent_at)
        .bind(&invoice.notes)
        .bind(&invoice.terms)
        .bind(invoice.reminder_sent_count)
        .bind(invoice.last_reminder_sent_at)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number '{}' already exists",
                    invoice.invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        for (position, item) in invoice.items.iter().enumerate() {
            Self::write_item(&mut *conn, &invoice.user_id, item, position as i32).await?;
        }

        Ok(())
    }

    async fn write_item(
        conn: &mut PgConnection,
        user_id: &str,
        item: &InvoiceItem,
        position: i32,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO invoice_items (id, invoice_id, user_id, description, quantity,
                unit_price, total, tax_rate, tax_amount, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(item.id)
        .bind(item.invoice_id)
        .bind(user_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.total)
        .bind(item.tax_rate)
        .bind(item.tax_amount)
        .bind(position)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to add line item: {}", e)))?;
        Ok(())
    }

    async fn write_payment(conn: &mut PgConnection, payment: &Payment) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, invoice_id, user_id, amount, currency, method, status,
                transaction_id, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(payment.id)
        .bind(payment.invoice_id)
        .bind(&payment.user_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.method)
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(payment.paid_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e)))?;
        Ok(())
    }

    async fn attach_template_items(
        &self,
        rows: Vec<TemplateRow>,
    ) -> Result<Vec<InvoiceTemplate>, AppError> {
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let items = sqlx::query_as::<_, TemplateItemRow>(
            r#"
            SELECT template_id, id, description, quantity, unit_price
            FROM template_items
            WHERE template_id = ANY($1)
            ORDER BY template_id, sort_order
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load template items: {}", e))
        })?;

        let mut grouped: HashMap<Uuid, Vec<TemplateItem>> = HashMap::new();
        for item in items {
            grouped.entry(item.template_id).or_default().push(TemplateItem {
                id: item.id,
                description: item.description,
                quantity: item.quantity,
                unit_price: item.unit_price,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let template_items = grouped.remove(&row.id).unwrap_or_default();
                row.into_template(template_items)
            })
            .collect())
    }

    async fn commit(tx: sqlx::Transaction<'static, Postgres>) -> Result<(), AppError> {
        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }
}

#[async_trait]
impl InvoiceStore for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, invoice), fields(user_id = %invoice.user_id, invoice_id = %invoice.id))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;
        Self::write_invoice(&mut tx, invoice).await?;
        Self::commit(tx).await?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            items = invoice.items.len(),
            "Invoice created"
        );

        Ok(invoice.clone())
    }

    #[instrument(skip(self), fields(user_id = %user_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        user_id: &str,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE user_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(user_id)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        let invoice = match row {
            Some(row) => self.attach_items(vec![row]).await?.pop(),
            None => None,
        };

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, filter), fields(user_id = %user_id))]
    async fn list_invoices(
        &self,
        user_id: &str,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        // Status is compared against the effective status so overdue filtering
        // matches what the responses report.
        let sql = format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE user_id = $1
              AND ($2::text IS NULL OR
                   (CASE WHEN status IN ('sent', 'viewed') AND due_date < $3
                         THEN 'overdue' ELSE status END) = $2)
              AND ($4::text IS NULL OR client_id = $4)
              AND ($5::text IS NULL OR client_name ILIKE $5 OR invoice_number ILIKE $5
                   OR client_email ILIKE $5)
            ORDER BY created_at DESC, id
            LIMIT $6 OFFSET $7
            "#
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(user_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.as_of)
            .bind(&filter.client_id)
            .bind(filter.search.as_deref().map(like_pattern))
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e))
            })?;

        let invoices = self.attach_items(rows).await?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self, invoice), fields(user_id = %invoice.user_id, invoice_id = %invoice.id))]
    async fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE invoices
            SET client_id = $3, client_name = $4, client_email = $5, client_address = $6,
                subtotal = $7, tax_rate = $8, tax_amount = $9, discount = $10, total = $11,
                currency = $12, status = $13, issue_date = $14, due_date = $15,
                paid_date = $16, sent_at = $17, notes = $18, terms = $19, updated_at = $20
            WHERE user_id = $1 AND id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(&invoice.user_id)
            .bind(invoice.id)
            .bind(&invoice.client_id)
            .bind(&invoice.client_name)
            .bind(&invoice.client_email)
            .bind(&invoice.client_address)
            .bind(invoice.subtotal)
            .bind(invoice.tax_rate)
            .bind(invoice.tax_amount)
            .bind(invoice.discount)
            .bind(invoice.total)
            .bind(&invoice.currency)
            .bind(invoice.status.as_str())
            .bind(invoice.issue_date)
            .bind(invoice.due_date)
            .bind(invoice.paid_date)
            .bind(invoice.sent_at)
            .bind(&invoice.notes)
            .bind(&invoice.terms)
            .bind(invoice.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e))
            })?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let updated = row.into_invoice(invoice.items.clone());

        timer.observe_duration();

        info!(invoice_id = %updated.id, status = %updated.status, "Invoice updated");

        Ok(updated)
    }

    #[instrument(skip(self), fields(user_id = %user_id, invoice_id = %invoice_id))]
    async fn delete_draft_invoice(
        &self,
        user_id: &str,
        invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let result = sqlx::query(
            "DELETE FROM invoices WHERE user_id = $1 AND id = $2 AND status = 'draft'",
        )
        .bind(user_id)
        .bind(invoice_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e)))?;

        timer.observe_duration();

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(invoice_id = %invoice_id, "Draft invoice deleted");
        }
        Ok(deleted)
    }

    #[instrument(skip(self, item), fields(user_id = %user_id, invoice_id = %invoice_id))]
    async fn add_item(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        item: &InvoiceItem,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["add_item"])
            .start_timer();

        let mut tx = self.begin().await?;
        let locked = Self::lock_invoice(&mut tx, user_id, invoice_id).await?;

        let position = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM invoice_items WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to add line item: {}", e)))?;

        Self::write_item(&mut tx, user_id, item, position).await?;

        let items = Self::fetch_items(&mut *tx, &[invoice_id])
            .await?
            .remove(&invoice_id)
            .unwrap_or_default();
        // An error here drops the transaction, rolling the insert back.
        let recomputed = totals::for_items(&items, locked.tax_rate, locked.discount)?;

        let sql = format!(
            r#"
            UPDATE invoices
            SET subtotal = $2, tax_amount = $3, total = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(invoice_id)
            .bind(recomputed.subtotal)
            .bind(recomputed.tax_amount)
            .bind(recomputed.total)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to recalculate totals: {}", e))
            })?;

        Self::commit(tx).await?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice_id,
            item_id = %item.id,
            total = %recomputed.total,
            "Line item added"
        );

        Ok(row.into_invoice(items))
    }

    #[instrument(skip(self), fields(user_id = %user_id, invoice_id = %invoice_id))]
    async fn record_reminder(
        &self,
        user_id: &str,
        invoice_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_reminder"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE invoices
            SET reminder_sent_count = reminder_sent_count + 1,
                last_reminder_sent_at = $3,
                updated_at = $3
            WHERE user_id = $1 AND id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(user_id)
            .bind(invoice_id)
            .bind(sent_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to record reminder: {}", e))
            })?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let invoice = self.attach_items(vec![row]).await?.pop().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Invoice not found"))
        })?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice_id,
            reminders = invoice.reminder_sent_count,
            "Payment reminder recorded"
        );

        Ok(invoice)
    }

    #[instrument(skip(self, invoice, payment), fields(user_id = %invoice.user_id, invoice_id = %invoice.id))]
    async fn mark_paid(
        &self,
        invoice: &Invoice,
        payment: Option<&Payment>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_paid"])
            .start_timer();

        let mut tx = self.begin().await?;
        Self::lock_invoice(&mut tx, &invoice.user_id, invoice.id).await?;

        let sql = format!(
            r#"
            UPDATE invoices
            SET status = $2, paid_date = $3, updated_at = $4
            WHERE id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(invoice.id)
            .bind(invoice.status.as_str())
            .bind(invoice.paid_date)
            .bind(invoice.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice paid: {}", e))
            })?;

        if let Some(payment) = payment {
            Self::write_payment(&mut tx, payment).await?;
        }

        Self::commit(tx).await?;

        timer.observe_duration();

        info!(invoice_id = %invoice.id, payment_recorded = payment.is_some(), "Invoice marked paid");

        Ok(row.into_invoice(invoice.items.clone()))
    }

    #[instrument(skip(self, payment), fields(user_id = %payment.user_id, invoice_id = %payment.invoice_id))]
    async fn record_payment(
        &self,
        payment: &Payment,
        today: NaiveDate,
    ) -> Result<PaymentOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self.begin().await?;
        // The row lock serializes concurrent payments so each sees the other's insert.
        let locked = Self::lock_invoice(&mut tx, &payment.user_id, payment.invoice_id).await?;

        Self::write_payment(&mut tx, payment).await?;

        let amount_paid = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM payments
            WHERE invoice_id = $1 AND status = 'completed'
            "#,
        )
        .bind(payment.invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum payments: {}", e)))?;

        let settled = amount_paid >= locked.total;
        let row = if settled && locked.status != InvoiceStatus::Paid.as_str() {
            let sql = format!(
                r#"
                UPDATE invoices
                SET status = 'paid', paid_date = $2, updated_at = NOW()
                WHERE id = $1
                RETURNING {INVOICE_COLUMNS}
                "#
            );
            sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(payment.invoice_id)
                .bind(today)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice paid: {}", e))
                })?
        } else {
            locked
        };

        let items = Self::fetch_items(&mut *tx, &[payment.invoice_id])
            .await?
            .remove(&payment.invoice_id)
            .unwrap_or_default();

        Self::commit(tx).await?;

        timer.observe_duration();

        info!(
            payment_id = %payment.id,
            amount = %payment.amount,
            amount_paid = %amount_paid,
            settled = settled,
            "Payment recorded"
        );

        Ok(PaymentOutcome {
            payment: payment.clone(),
            invoice: row.into_invoice(items),
            amount_paid,
            settled,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_payments(
        &self,
        user_id: &str,
        invoice_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE user_id = $1 AND ($2::uuid IS NULL OR invoice_id = $2)
            ORDER BY paid_at DESC, id
            LIMIT $3 OFFSET $4
            "#
        );
        let payments = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(user_id)
            .bind(invoice_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e))
            })?
            .into_iter()
            .map(Payment::from)
            .collect();

        timer.observe_duration();

        Ok(payments)
    }

    #[instrument(skip(self, template), fields(user_id = %template.user_id, template_id = %template.id))]
    async fn insert_template(
        &self,
        template: &InvoiceTemplate,
    ) -> Result<InvoiceTemplate, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_template"])
            .start_timer();

        let mut tx = self.begin().await?;

        if template.is_default {
            sqlx::query(
                "UPDATE invoice_templates SET is_default = FALSE WHERE user_id = $1 AND is_default",
            )
            .bind(&template.user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear default template: {}", e))
            })?;
        }

        sqlx::query(
            r#"
            INSERT INTO invoice_templates (id, user_id, name, description, tax_rate, currency,
                terms, notes, is_default, usage_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(template.id)
        .bind(&template.user_id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.tax_rate)
        .bind(&template.currency)
        .bind(&template.terms)
        .bind(&template.notes)
        .bind(template.is_default)
        .bind(template.usage_count)
        .bind(template.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create template: {}", e)))?;

        for (sort_order, item) in template.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO template_items (id, template_id, description, quantity, unit_price, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id)
            .bind(template.id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(sort_order as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to add template item: {}", e))
            })?;
        }

        Self::commit(tx).await?;

        timer.observe_duration();

        info!(template_id = %template.id, is_default = template.is_default, "Template created");

        Ok(template.clone())
    }

    #[instrument(skip(self), fields(user_id = %user_id, template_id = %template_id))]
    async fn get_template(
        &self,
        user_id: &str,
        template_id: Uuid,
    ) -> Result<Option<InvoiceTemplate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_template"])
            .start_timer();

        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM invoice_templates WHERE user_id = $1 AND id = $2"
        );
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(user_id)
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get template: {}", e)))?;

        let template = match row {
            Some(row) => self.attach_template_items(vec![row]).await?.pop(),
            None => None,
        };

        timer.observe_duration();

        Ok(template)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_templates(&self, user_id: &str) -> Result<Vec<InvoiceTemplate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_templates"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {TEMPLATE_COLUMNS}
            FROM invoice_templates
            WHERE user_id = $1
            ORDER BY is_default DESC, created_at DESC
            "#
        );
        let rows = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list templates: {}", e))
            })?;

        let templates = self.attach_template_items(rows).await?;

        timer.observe_duration();

        Ok(templates)
    }

    #[instrument(skip(self), fields(user_id = %user_id, template_id = %template_id))]
    async fn increment_template_usage(
        &self,
        user_id: &str,
        template_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE invoice_templates SET usage_count = usage_count + 1 WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(template_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update template usage: {}", e))
        })?;
        Ok(())
    }

    #[instrument(skip(self, config), fields(user_id = %config.user_id, invoice_id = %config.invoice_id))]
    async fn upsert_recurring(
        &self,
        config: &RecurringInvoice,
    ) -> Result<RecurringInvoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_recurring"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO recurring_invoices (id, user_id, invoice_id, cycle, start_date, end_date,
                next_invoice_date, occurrences, current_occurrence, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (invoice_id) DO UPDATE
            SET cycle = EXCLUDED.cycle,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                next_invoice_date = EXCLUDED.next_invoice_date,
                occurrences = EXCLUDED.occurrences,
                current_occurrence = EXCLUDED.current_occurrence,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            WHERE recurring_invoices.user_id = EXCLUDED.user_id
            RETURNING {RECURRING_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, RecurringRow>(&sql)
            .bind(config.id)
            .bind(&config.user_id)
            .bind(config.invoice_id)
            .bind(config.cycle.as_str())
            .bind(config.start_date)
            .bind(config.end_date)
            .bind(config.next_invoice_date)
            .bind(config.occurrences)
            .bind(config.current_occurrence)
            .bind(config.is_active)
            .bind(config.created_at)
            .bind(config.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to save recurring schedule: {}", e))
            })?
            .map(RecurringInvoice::from)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        timer.observe_duration();

        info!(
            recurring_id = %stored.id,
            cycle = stored.cycle.as_str(),
            next_invoice_date = %stored.next_invoice_date,
            "Recurring schedule saved"
        );

        Ok(stored)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_recurring(
        &self,
        user_id: &str,
        active: Option<bool>,
    ) -> Result<Vec<RecurringInvoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_recurring"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {RECURRING_COLUMNS}
            FROM recurring_invoices
            WHERE user_id = $1 AND ($2::bool IS NULL OR is_active = $2)
            ORDER BY next_invoice_date, id
            "#
        );
        let configs = sqlx::query_as::<_, RecurringRow>(&sql)
            .bind(user_id)
            .bind(active)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list recurring schedules: {}", e))
            })?
            .into_iter()
            .map(RecurringInvoice::from)
            .collect();

        timer.observe_duration();

        Ok(configs)
    }

    #[instrument(skip(self, generated, due, advanced), fields(user_id = %due.user_id, recurring_id = %due.id))]
    async fn record_recurring_run(
        &self,
        generated: &Invoice,
        due: &RecurringInvoice,
        advanced: &RecurringInvoice,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_recurring_run"])
            .start_timer();

        let mut tx = self.begin().await?;

        let claimed = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM recurring_invoices
            WHERE id = $1 AND user_id = $2 AND is_active AND next_invoice_date = $3
            FOR UPDATE
            "#,
        )
        .bind(due.id)
        .bind(&due.user_id)
        .bind(due.next_invoice_date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to lock recurring schedule: {}", e))
        })?;

        if claimed.is_none() {
            timer.observe_duration();
            return Ok(None);
        }

        Self::write_invoice(&mut tx, generated).await?;

        sqlx::query(
            r#"
            UPDATE recurring_invoices
            SET current_occurrence = $2, next_invoice_date = $3, is_active = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(advanced.id)
        .bind(advanced.current_occurrence)
        .bind(advanced.next_invoice_date)
        .bind(advanced.is_active)
        .bind(advanced.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to advance recurring schedule: {}", e))
        })?;

        Self::commit(tx).await?;

        timer.observe_duration();

        info!(
            invoice_id = %generated.id,
            invoice_number = %generated.invoice_number,
            occurrence = advanced.current_occurrence,
            still_active = advanced.is_active,
            "Recurring invoice generated"
        );

        Ok(Some(generated.clone()))
    }

    #[instrument(skip(self, stats), fields(user_id = %user_id))]
    async fn save_stats(&self, user_id: &str, stats: &BillingStats) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO billing_stats (user_id, total_outstanding, paid_this_month, overdue_amount,
                average_invoice_value, total_invoices, paid_invoices, pending_invoices,
                overdue_invoices, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET total_outstanding = EXCLUDED.total_outstanding,
                paid_this_month = EXCLUDED.paid_this_month,
                overdue_amount = EXCLUDED.overdue_amount,
                average_invoice_value = EXCLUDED.average_invoice_value,
                total_invoices = EXCLUDED.total_invoices,
                paid_invoices = EXCLUDED.paid_invoices,
                pending_invoices = EXCLUDED.pending_invoices,
                overdue_invoices = EXCLUDED.overdue_invoices,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(user_id)
        .bind(stats.total_outstanding)
        .bind(stats.paid_this_month)
        .bind(stats.overdue_amount)
        .bind(stats.average_invoice_value)
        .bind(stats.total_invoices)
        .bind(stats.paid_invoices)
        .bind(stats.pending_invoices)
        .bind(stats.overdue_invoices)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to save stats: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("acme"), "%acme%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }
}
