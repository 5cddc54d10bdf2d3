//! `GET`/`POST /api/admin/invoicing`: one endpoint multiplexed on `action`.

use crate::dtos::{
    ActionEnvelope, AddItemBody, ApiResponse, CreateInvoiceRequest, CreateTemplateRequest,
    InvoiceRef, InvoiceView, InvoicingQuery, MarkPaidRequest, OverviewResponse, PaymentResponse,
    RecordPaymentRequest, RecurringRunResponse, SetupRecurringRequest, UpdateInvoiceRequest,
};
use crate::handlers::demo;
use crate::middleware::{DemoMode, OwnerId};
use crate::services::metrics::{
    DEMO_FALLBACKS_TOTAL, ERRORS_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION,
};
use crate::startup::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::time::Instant;
use tracing::{instrument, warn};
use validator::Validate;

pub const GET_ACTIONS: [&str; 7] = [
    "overview",
    "invoices",
    "invoice",
    "payments",
    "templates",
    "recurring",
    "stats",
];

pub const POST_ACTIONS: [&str; 13] = [
    "create_invoice",
    "update_invoice",
    "delete_invoice",
    "send_invoice",
    "cancel_invoice",
    "duplicate_invoice",
    "send_reminder",
    "mark_paid",
    "add_item",
    "record_payment",
    "create_template",
    "setup_recurring",
    "process_recurring",
];

/// Metric label for `action`; anything unrecognised collapses to `unknown`.
fn action_label(action: &str) -> &'static str {
    GET_ACTIONS
        .iter()
        .chain(POST_ACTIONS.iter())
        .find(|known| **known == action)
        .copied()
        .unwrap_or("unknown")
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn unknown_action(action: &str) -> AppError {
    if action.is_empty() {
        AppError::BadRequest(anyhow::anyhow!("Missing action"))
    } else {
        AppError::BadRequest(anyhow::anyhow!("Unknown action: {}", action))
    }
}

/// Deserialize an action body and run its validation rules.
fn parse<T: DeserializeOwned + Validate>(body: Value) -> Result<T, AppError> {
    let request: T = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e)))?;
    request.validate()?;
    Ok(request)
}

/// Turn an action result into the HTTP response, recording metrics and applying
/// the demo fallback to store failures.
fn respond(
    action: &str,
    demo_mode: DemoMode,
    started: Instant,
    result: Result<ApiResponse, AppError>,
) -> Response {
    let label = action_label(action);

    let (response, outcome) = match result {
        Ok(body) => (body.into_response(), "ok"),
        Err(e) if demo_mode.is_enabled() && e.is_persistence_failure() => {
            warn!(action = label, error = %e, "Store failure, serving demo data");
            DEMO_FALLBACKS_TOTAL.with_label_values(&[label]).inc();
            (ApiResponse::demo(demo::payload(label)).into_response(), "demo")
        }
        Err(e) => {
            ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
            let outcome = if e.status_code().is_server_error() {
                "server_error"
            } else {
                "client_error"
            };
            (e.into_response(), outcome)
        }
    };

    REQUESTS_TOTAL.with_label_values(&[label, outcome]).inc();
    REQUEST_DURATION
        .with_label_values(&[label])
        .observe(started.elapsed().as_secs_f64());

    response
}

/// Read-only actions. `action` defaults to `overview`.
#[instrument(skip_all, fields(user_id = %owner.as_str(), action = tracing::field::Empty))]
pub async fn invoicing_get(
    State(state): State<AppState>,
    owner: OwnerId,
    demo_mode: DemoMode,
    query: Result<Query<InvoicingQuery>, QueryRejection>,
) -> Response {
    let started = Instant::now();

    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            let err = AppError::BadRequest(anyhow::anyhow!(
                "Invalid query: {}",
                rejection.body_text()
            ));
            return respond("unknown", demo_mode, started, Err(err));
        }
    };
    let action = query
        .action
        .clone()
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "overview".to_string());
    tracing::Span::current().record("action", action.as_str());

    let result = dispatch_get(&state, owner.as_str(), &action, query).await;
    respond(&action, demo_mode, started, result)
}

async fn dispatch_get(
    state: &AppState,
    user_id: &str,
    action: &str,
    query: InvoicingQuery,
) -> Result<ApiResponse, AppError> {
    let service = &state.service;
    let today = today();

    match action {
        "overview" => {
            let overview = service.overview(user_id, today).await?;
            ApiResponse::ok(OverviewResponse::new(overview, today))
        }
        "invoices" => {
            let filter = query.invoice_filter(today)?;
            let invoices = service.list_invoices(user_id, &filter).await?;
            ApiResponse::ok(InvoiceView::many(invoices, today))
        }
        "invoice" => {
            let id = query
                .id
                .or(query.invoice_id)
                .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("id is required")))?;
            let invoice = service.get_invoice(user_id, id).await?;
            ApiResponse::ok(InvoiceView::new(invoice, today))
        }
        "payments" => {
            let payments = service
                .list_payments(
                    user_id,
                    query.invoice_id,
                    query.page_size(),
                    query.page_offset(),
                )
                .await?;
            ApiResponse::ok(payments)
        }
        "templates" => ApiResponse::ok(service.list_templates(user_id).await?),
        "recurring" => ApiResponse::ok(service.list_recurring(user_id, query.enabled).await?),
        "stats" => ApiResponse::ok(service.stats(user_id, today).await?),
        other => Err(unknown_action(other)),
    }
}

/// Mutating actions; the body carries `action` plus that action's fields.
#[instrument(skip_all, fields(user_id = %owner.as_str(), action = tracing::field::Empty))]
pub async fn invoicing_post(
    State(state): State<AppState>,
    owner: OwnerId,
    demo_mode: DemoMode,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let started = Instant::now();

    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            let err = AppError::BadRequest(anyhow::anyhow!(
                "Invalid JSON body: {}",
                rejection.body_text()
            ));
            return respond("unknown", demo_mode, started, Err(err));
        }
    };
    let action = serde_json::from_value::<ActionEnvelope>(body.clone())
        .ok()
        .and_then(|envelope| envelope.action)
        .unwrap_or_default();
    tracing::Span::current().record("action", action.as_str());

    let result = dispatch_post(&state, owner.as_str(), &action, body).await;
    respond(&action, demo_mode, started, result)
}

async fn dispatch_post(
    state: &AppState,
    user_id: &str,
    action: &str,
    body: Value,
) -> Result<ApiResponse, AppError> {
    let service = &state.service;
    let today = today();

    match action {
        "create_invoice" => {
            let request: CreateInvoiceRequest = parse(body)?;
            let invoice = service
                .create_invoice(user_id, request.into(), today)
                .await?;
            Ok(ApiResponse::ok(InvoiceView::new(invoice, today))?.with_message("Invoice created"))
        }
        "update_invoice" => {
            let (invoice_id, changes) = parse::<UpdateInvoiceRequest>(body)?.into_parts();
            let invoice = service
                .update_invoice(user_id, invoice_id, changes)
                .await?;
            Ok(ApiResponse::ok(InvoiceView::new(invoice, today))?.with_message("Invoice updated"))
        }
        "delete_invoice" => {
            let InvoiceRef { invoice_id } = parse(body)?;
            service.delete_invoice(user_id, invoice_id).await?;
            Ok(ApiResponse::ok(json!({ "id": invoice_id }))?.with_message("Invoice deleted"))
        }
        "send_invoice" => {
            let InvoiceRef { invoice_id } = parse(body)?;
            let invoice = service.send_invoice(user_id, invoice_id).await?;
            Ok(ApiResponse::ok(InvoiceView::new(invoice, today))?.with_message("Invoice sent"))
        }
        "cancel_invoice" => {
            let InvoiceRef { invoice_id } = parse(body)?;
            let invoice = service.cancel_invoice(user_id, invoice_id).await?;
            Ok(ApiResponse::ok(InvoiceView::new(invoice, today))?
                .with_message("Invoice cancelled"))
        }
        "duplicate_invoice" => {
            let InvoiceRef { invoice_id } = parse(body)?;
            let invoice = service.duplicate_invoice(user_id, invoice_id, today).await?;
            Ok(ApiResponse::ok(InvoiceView::new(invoice, today))?
                .with_message("Invoice duplicated"))
        }
        "send_reminder" => {
            let InvoiceRef { invoice_id } = parse(body)?;
            let invoice = service.send_reminder(user_id, invoice_id).await?;
            Ok(ApiResponse::ok(InvoiceView::new(invoice, today))?.with_message("Reminder sent"))
        }
        "mark_paid" => {
            let (invoice_id, input) = parse::<MarkPaidRequest>(body)?.into_parts();
            let invoice = service.mark_paid(user_id, invoice_id, input, today).await?;
            Ok(ApiResponse::ok(InvoiceView::new(invoice, today))?
                .with_message("Invoice marked as paid"))
        }
        "add_item" => {
            let request = serde_json::from_value::<AddItemBody>(body)
                .map_err(|e| {
                    AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e))
                })?
                .into_request()?;
            request.validate()?;
            let invoice = service
                .add_item(user_id, request.invoice_id, request.item.into())
                .await?;
            Ok(ApiResponse::ok(InvoiceView::new(invoice, today))?.with_message("Item added"))
        }
        "record_payment" => {
            let (invoice_id, input) = parse::<RecordPaymentRequest>(body)?.into_parts();
            let outcome = service
                .record_payment(user_id, invoice_id, input, today)
                .await?;
            Ok(ApiResponse::ok(PaymentResponse::new(outcome, today))?
                .with_message("Payment recorded"))
        }
        "create_template" => {
            let request: CreateTemplateRequest = parse(body)?;
            let template = service.create_template(user_id, request.into()).await?;
            Ok(ApiResponse::ok(template)?.with_message("Template created"))
        }
        "setup_recurring" => {
            let request: SetupRecurringRequest = parse(body)?;
            let config = service
                .setup_recurring(user_id, request.into(), today)
                .await?;
            Ok(ApiResponse::ok(config)?.with_message("Recurring invoice configured"))
        }
        "process_recurring" => {
            let generated = service.process_recurring(user_id, today).await?;
            ApiResponse::ok(RecurringRunResponse {
                generated: generated.len(),
                invoices: InvoiceView::many(generated, today),
            })
        }
        other => Err(unknown_action(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_actions_share_one_metric_label() {
        assert_eq!(action_label("record_payment"), "record_payment");
        assert_eq!(action_label("overview"), "overview");
        assert_eq!(action_label("send_reminder"), "send_reminder");
        assert_eq!(action_label("drop_tables"), "unknown");
        assert_eq!(action_label(""), "unknown");
    }

    #[test]
    fn missing_and_unknown_actions_are_bad_requests() {
        assert!(matches!(unknown_action(""), AppError::BadRequest(_)));
        let err = unknown_action("explode");
        assert!(err.to_string().contains("explode"));
    }
}
