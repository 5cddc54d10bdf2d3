use crate::models::{
    CreateInvoice, CreateTemplate, Invoice, InvoiceStatus, ListInvoicesFilter, MarkPaid,
    NewLineItem, NewTemplateItem, Payment, PaymentOutcome, PaymentStatus, RecordPayment,
    RecurrenceCycle, RecurringInvoice, SetupRecurring, UpdateInvoice,
};
use crate::services::totals::{MAX_AMOUNT, MAX_TAX_RATE};
use crate::services::{BillingStats, Overview};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Success envelope shared by every action.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub demo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn ok<T: Serialize>(data: T) -> Result<Self, AppError> {
        let data = serde_json::to_value(data)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode response: {}", e)))?;
        Ok(Self {
            success: true,
            demo: false,
            data: Some(data),
            message: None,
        })
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn demo(data: serde_json::Value) -> Self {
        Self {
            success: true,
            demo: true,
            data: Some(data),
            message: None,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Invoice as returned to clients, with its status as observed today.
#[derive(Debug, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub effective_status: InvoiceStatus,
    pub days_overdue: i64,
}

impl InvoiceView {
    pub fn new(invoice: Invoice, today: NaiveDate) -> Self {
        Self {
            effective_status: invoice.effective_status(today),
            days_overdue: invoice.days_overdue(today),
            invoice,
        }
    }

    pub fn many(invoices: Vec<Invoice>, today: NaiveDate) -> Vec<Self> {
        invoices
            .into_iter()
            .map(|invoice| Self::new(invoice, today))
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub stats: BillingStats,
    pub recent_invoices: Vec<InvoiceView>,
    pub upcoming_recurring: Vec<RecurringInvoice>,
}

impl OverviewResponse {
    pub fn new(overview: Overview, today: NaiveDate) -> Self {
        Self {
            stats: overview.stats,
            recent_invoices: InvoiceView::many(overview.recent_invoices, today),
            upcoming_recurring: overview.upcoming_recurring,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment: Payment,
    pub invoice: InvoiceView,
    pub amount_paid: Decimal,
    pub settled: bool,
}

impl PaymentResponse {
    pub fn new(outcome: PaymentOutcome, today: NaiveDate) -> Self {
        Self {
            payment: outcome.payment,
            invoice: InvoiceView::new(outcome.invoice, today),
            amount_paid: outcome.amount_paid,
            settled: outcome.settled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecurringRunResponse {
    pub generated: usize,
    pub invoices: Vec<InvoiceView>,
}

/// Query string of `GET /api/admin/invoicing`.
#[derive(Debug, Default, Deserialize)]
pub struct InvoicingQuery {
    pub action: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "clientId", alias = "client_id")]
    pub client_id: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub id: Option<Uuid>,
    #[serde(rename = "invoiceId", alias = "invoice_id")]
    pub invoice_id: Option<Uuid>,
    pub enabled: Option<bool>,
}

impl InvoicingQuery {
    pub fn page_size(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn page_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn invoice_filter(&self, today: NaiveDate) -> Result<ListInvoicesFilter, AppError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(status) => Some(status.parse::<InvoiceStatus>()?),
        };
        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(ListInvoicesFilter {
            status,
            client_id: self.client_id.clone().filter(|c| !c.is_empty()),
            search,
            limit: Some(self.page_size()),
            offset: self.page_offset(),
            as_of: today,
        })
    }
}

/// The `action` discriminator of a POST body.
#[derive(Debug, Deserialize)]
pub struct ActionEnvelope {
    pub action: Option<String>,
}

fn amount_error(field: &str, code: &'static str, problem: &str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Owned(format!("{} {}", field, problem)));
    err
}

/// Money and quantity inputs must be non-negative and bounded.
fn check_amount(field: &str, value: Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(amount_error(field, "negative_amount", "must not be negative"));
    }
    if value > MAX_AMOUNT {
        return Err(amount_error(field, "amount_too_large", "is too large"));
    }
    Ok(())
}

fn check_optional(field: &str, value: Option<Decimal>) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |v| check_amount(field, v))
}

/// Tax rates are percentages between 0 and 100.
fn check_rate(value: Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(amount_error("tax_rate", "negative_amount", "must not be negative"));
    }
    if value > MAX_TAX_RATE {
        return Err(amount_error("tax_rate", "rate_too_large", "must not exceed 100"));
    }
    Ok(())
}

fn check_optional_rate(value: Option<Decimal>) -> Result<(), ValidationError> {
    value.map_or(Ok(()), check_rate)
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_line_item"))]
pub struct LineItemInput {
    #[validate(length(min = 1, max = 500, message = "Item description is required"))]
    pub description: String,
    pub quantity: Decimal,
    #[serde(alias = "unitPrice")]
    pub unit_price: Decimal,
    #[serde(default, alias = "taxRate")]
    pub tax_rate: Option<Decimal>,
}

fn validate_line_item(item: &LineItemInput) -> Result<(), ValidationError> {
    check_amount("quantity", item.quantity)?;
    check_amount("unit_price", item.unit_price)?;
    check_optional_rate(item.tax_rate)
}

impl From<LineItemInput> for NewLineItem {
    fn from(input: LineItemInput) -> Self {
        NewLineItem {
            description: input.description,
            quantity: input.quantity,
            unit_price: input.unit_price,
            tax_rate: input.tax_rate,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_create_invoice"))]
pub struct CreateInvoiceRequest {
    #[serde(default, alias = "clientId")]
    pub client_id: Option<String>,
    #[serde(alias = "clientName")]
    #[validate(length(min = 1, max = 200, message = "Client name is required"))]
    pub client_name: String,
    #[serde(default, alias = "clientEmail")]
    #[validate(email(message = "Invalid client email"))]
    pub client_email: Option<String>,
    #[serde(default, alias = "clientAddress")]
    pub client_address: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<LineItemInput>,
    #[serde(default, alias = "taxRate")]
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default)]
    #[validate(length(equal = 3, message = "Currency must be a 3 letter code"))]
    pub currency: Option<String>,
    #[serde(default, alias = "issueDate")]
    pub issue_date: Option<NaiveDate>,
    #[serde(default, alias = "dueDate")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default, alias = "templateId")]
    pub template_id: Option<Uuid>,
}

fn validate_create_invoice(req: &CreateInvoiceRequest) -> Result<(), ValidationError> {
    check_optional_rate(req.tax_rate)?;
    check_optional("discount", req.discount)
}

impl From<CreateInvoiceRequest> for CreateInvoice {
    fn from(req: CreateInvoiceRequest) -> Self {
        CreateInvoice {
            client_id: req.client_id,
            client_name: req.client_name,
            client_email: req.client_email,
            client_address: req.client_address,
            items: req.items.into_iter().map(NewLineItem::from).collect(),
            tax_rate: req.tax_rate,
            discount: req.discount.unwrap_or(Decimal::ZERO),
            currency: req.currency.map(|c| c.to_uppercase()),
            issue_date: req.issue_date,
            due_date: req.due_date,
            notes: req.notes,
            terms: req.terms,
            template_id: req.template_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_update_invoice"))]
pub struct UpdateInvoiceRequest {
    #[serde(alias = "invoiceId", alias = "id")]
    pub invoice_id: Uuid,
    #[serde(default, alias = "clientId")]
    pub client_id: Option<String>,
    #[serde(default, alias = "clientName")]
    #[validate(length(min = 1, max = 200, message = "Client name must not be empty"))]
    pub client_name: Option<String>,
    #[serde(default, alias = "clientEmail")]
    #[validate(email(message = "Invalid client email"))]
    pub client_email: Option<String>,
    #[serde(default, alias = "clientAddress")]
    pub client_address: Option<String>,
    #[serde(default, alias = "taxRate")]
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default)]
    #[validate(length(equal = 3, message = "Currency must be a 3 letter code"))]
    pub currency: Option<String>,
    #[serde(default, alias = "issueDate")]
    pub issue_date: Option<NaiveDate>,
    #[serde(default, alias = "dueDate")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub terms: Option<String>,
}

fn validate_update_invoice(req: &UpdateInvoiceRequest) -> Result<(), ValidationError> {
    check_optional_rate(req.tax_rate)?;
    check_optional("discount", req.discount)
}

impl UpdateInvoiceRequest {
    pub fn into_parts(self) -> (Uuid, UpdateInvoice) {
        (
            self.invoice_id,
            UpdateInvoice {
                client_id: self.client_id,
                client_name: self.client_name,
                client_email: self.client_email,
                client_address: self.client_address,
                tax_rate: self.tax_rate,
                discount: self.discount,
                currency: self.currency.map(|c| c.to_uppercase()),
                issue_date: self.issue_date,
                due_date: self.due_date,
                notes: self.notes,
                terms: self.terms,
            },
        )
    }
}

/// Body of actions that only name an invoice.
#[derive(Debug, Deserialize, Validate)]
pub struct InvoiceRef {
    #[serde(alias = "invoiceId", alias = "id")]
    pub invoice_id: Uuid,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_mark_paid"))]
pub struct MarkPaidRequest {
    #[serde(alias = "invoiceId", alias = "id")]
    pub invoice_id: Uuid,
    #[serde(default = "default_true", alias = "recordPayment")]
    pub record_payment: bool,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default, alias = "paymentMethod", alias = "payment_method")]
    #[validate(length(min = 1, max = 50, message = "Payment method must not be empty"))]
    pub method: Option<String>,
    #[serde(default, alias = "transactionId")]
    pub transaction_id: Option<String>,
}

fn validate_mark_paid(req: &MarkPaidRequest) -> Result<(), ValidationError> {
    check_optional("amount", req.amount)
}

impl MarkPaidRequest {
    pub fn into_parts(self) -> (Uuid, MarkPaid) {
        (
            self.invoice_id,
            MarkPaid {
                record_payment: self.record_payment,
                amount: self.amount,
                method: self.method,
                transaction_id: self.transaction_id,
            },
        )
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    #[serde(alias = "invoiceId", alias = "id")]
    pub invoice_id: Uuid,
    #[validate(nested)]
    pub item: LineItemInput,
}

/// `add_item` accepts the line either nested under `item` or inline.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AddItemBody {
    Nested {
        #[serde(alias = "invoiceId", alias = "id")]
        invoice_id: Uuid,
        item: serde_json::Value,
    },
    Inline {
        #[serde(alias = "invoiceId", alias = "id")]
        invoice_id: Uuid,
        description: serde_json::Value,
        #[serde(flatten)]
        rest: serde_json::Map<String, serde_json::Value>,
    },
}

impl AddItemBody {
    pub fn into_request(self) -> Result<AddItemRequest, AppError> {
        let (invoice_id, item) = match self {
            AddItemBody::Nested { invoice_id, item } => (invoice_id, item),
            AddItemBody::Inline {
                invoice_id,
                description,
                mut rest,
            } => {
                rest.insert("description".to_string(), description);
                (invoice_id, serde_json::Value::Object(rest))
            }
        };
        let item = serde_json::from_value(item)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid item: {}", e)))?;
        Ok(AddItemRequest { invoice_id, item })
    }
}

fn default_method() -> String {
    "manual".to_string()
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_record_payment"))]
pub struct RecordPaymentRequest {
    #[serde(alias = "invoiceId", alias = "id")]
    pub invoice_id: Uuid,
    pub amount: Decimal,
    #[serde(default)]
    #[validate(length(equal = 3, message = "Currency must be a 3 letter code"))]
    pub currency: Option<String>,
    #[serde(default = "default_method", alias = "paymentMethod", alias = "payment_method")]
    #[validate(length(min = 1, max = 50, message = "Payment method must not be empty"))]
    pub method: String,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    #[serde(default, alias = "transactionId")]
    pub transaction_id: Option<String>,
}

fn validate_record_payment(req: &RecordPaymentRequest) -> Result<(), ValidationError> {
    check_amount("amount", req.amount)?;
    if req.amount.is_zero() {
        return Err(amount_error("amount", "zero_amount", "must be greater than zero"));
    }
    Ok(())
}

impl RecordPaymentRequest {
    pub fn into_parts(self) -> (Uuid, RecordPayment) {
        (
            self.invoice_id,
            RecordPayment {
                amount: self.amount,
                currency: self.currency.map(|c| c.to_uppercase()),
                method: self.method,
                status: self.status.unwrap_or(PaymentStatus::Completed),
                transaction_id: self.transaction_id,
            },
        )
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_template_item"))]
pub struct TemplateItemInput {
    #[validate(length(min = 1, max = 500, message = "Item description is required"))]
    pub description: String,
    pub quantity: Decimal,
    #[serde(alias = "unitPrice")]
    pub unit_price: Decimal,
}

fn validate_template_item(item: &TemplateItemInput) -> Result<(), ValidationError> {
    check_amount("quantity", item.quantity)?;
    check_amount("unit_price", item.unit_price)
}

fn default_currency() -> String {
    crate::services::invoicing::DEFAULT_CURRENCY.to_string()
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_create_template"))]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 200, message = "Template name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<TemplateItemInput>,
    #[serde(default, alias = "taxRate")]
    pub tax_rate: Decimal,
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "Currency must be a 3 letter code"))]
    pub currency: String,
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "isDefault")]
    pub is_default: bool,
}

fn validate_create_template(req: &CreateTemplateRequest) -> Result<(), ValidationError> {
    check_rate(req.tax_rate)
}

impl From<CreateTemplateRequest> for CreateTemplate {
    fn from(req: CreateTemplateRequest) -> Self {
        CreateTemplate {
            name: req.name,
            description: req.description,
            items: req
                .items
                .into_iter()
                .map(|item| NewTemplateItem {
                    description: item.description,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            tax_rate: req.tax_rate,
            currency: req.currency.to_uppercase(),
            terms: req.terms,
            notes: req.notes,
            is_default: req.is_default,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetupRecurringRequest {
    #[serde(alias = "invoiceId", alias = "id")]
    pub invoice_id: Uuid,
    #[serde(alias = "frequency")]
    pub cycle: RecurrenceCycle,
    #[serde(default, alias = "startDate")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, alias = "endDate")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(range(min = 1, message = "Occurrences must be at least 1"))]
    pub occurrences: Option<i32>,
}

impl From<SetupRecurringRequest> for SetupRecurring {
    fn from(req: SetupRecurringRequest) -> Self {
        SetupRecurring {
            invoice_id: req.invoice_id,
            cycle: req.cycle,
            start_date: req.start_date,
            end_date: req.end_date,
            occurrences: req.occurrences,
        }
    }
}
