//! Test helper module for invoicing-api integration tests.
//!
//! Drives the router in-process against the in-memory store, a PostgreSQL
//! schema of its own (when `TEST_DATABASE_URL` is set), or a store whose every
//! call fails.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{DateTime, NaiveDate, Utc};
use invoicing_api::config::{InvoicingConfig, StoreBackend};
use invoicing_api::models::{
    Invoice, InvoiceItem, InvoiceTemplate, ListInvoicesFilter, Payment, PaymentOutcome,
    RecurringInvoice,
};
use invoicing_api::services::{init_metrics, BillingStats, Database, InvoiceStore, MemoryStore};
use invoicing_api::startup::{build_router, AppState, Application, INVOICING_ROUTE};
use secrecy::Secret;
use serde_json::Value;
use service_core::error::AppError;
use sqlx::postgres::PgPoolOptions;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_USER_ID: &str = "user-test-1";
pub const OTHER_USER_ID: &str = "user-test-2";

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// PostgreSQL server for the database-backed runs; unset skips them.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_invoicing_{}_{}", std::process::id(), counter)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn days_ago(days: u64) -> NaiveDate {
    today() - chrono::Days::new(days)
}

/// Router wrapper for integration tests.
pub struct TestApp {
    router: Router,
    pub user_id: String,
    pub store: Arc<dyn InvoiceStore>,
    /// `memory` or `postgres`, for assertion messages.
    pub backend: &'static str,
    /// Schema owned by this app; dropped by `cleanup`.
    schema: Option<String>,
}

impl TestApp {
    /// App backed by a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(InvoicingConfig::in_memory(), Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: InvoicingConfig, store: Arc<dyn InvoiceStore>) -> Self {
        init_metrics();
        Self {
            router: build_router(AppState::new(config, store.clone())),
            user_id: TEST_USER_ID.to_string(),
            store,
            backend: "memory",
            schema: None,
        }
    }

    /// App backed by PostgreSQL in a freshly migrated schema, or `None` when
    /// `TEST_DATABASE_URL` is not set.
    pub async fn postgres() -> Option<Self> {
        let base_url = test_database_url()?;
        let schema_name = unique_schema_name();

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");
        pool.close().await;

        // Use ? or & depending on whether URL already has query parameters
        let separator = if base_url.contains('?') { "&" } else { "?" };
        let url = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let db = Database::new(&url, 5, 1)
            .await
            .expect("Failed to connect to test schema");
        db.run_migrations()
            .await
            .expect("Failed to run migrations");

        let mut config = InvoicingConfig::in_memory();
        config.store = StoreBackend::Postgres;
        config.database.url = Some(Secret::new(url));

        let mut app = Self::with_store(config, Arc::new(db));
        app.backend = "postgres";
        app.schema = Some(schema_name);
        Some(app)
    }

    /// The in-memory app, followed by the PostgreSQL one when configured.
    pub async fn every_store() -> Vec<Self> {
        let mut apps = vec![Self::new()];
        if let Some(app) = Self::postgres().await {
            apps.push(app);
        }
        apps
    }

    /// Drop this app's schema, if it has one.
    pub async fn cleanup(self) {
        let (Some(schema_name), Some(base_url)) = (self.schema, test_database_url()) else {
            return;
        };
        if let Ok(pool) = PgPoolOptions::new()
            .max_connections(1)
            .connect(&base_url)
            .await
        {
            sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
                .execute(&pool)
                .await
                .ok();
            pool.close().await;
        }
    }

    /// App whose store fails every call with a database error.
    pub fn failing(demo_mode: bool) -> Self {
        let mut config = InvoicingConfig::in_memory();
        config.demo_mode = demo_mode;
        Self::with_store(config, Arc::new(FailingStore))
    }

    /// Same app and store, acting as another user. The copy never drops the schema.
    pub fn as_user(&self, user_id: &str) -> Self {
        Self {
            router: self.router.clone(),
            user_id: user_id.to_string(),
            store: self.store.clone(),
            backend: self.backend,
            schema: None,
        }
    }

    pub async fn respond(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request")
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.respond(request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    /// GET the invoicing endpoint with `query` (without the leading `?`).
    pub async fn get(&self, query: &str) -> (StatusCode, Value) {
        let request = Request::get(format!("{}?{}", INVOICING_ROUTE, query))
            .header("X-User-ID", &self.user_id)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post(&self, body: Value) -> (StatusCode, Value) {
        let request = Request::post(INVOICING_ROUTE)
            .header("X-User-ID", &self.user_id)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// POST an action that must succeed and return its `data`.
    pub async fn post_ok(&self, body: Value) -> Value {
        let (status, response) = self.post(body.clone()).await;
        assert_eq!(
            status,
            StatusCode::OK,
            "{} failed: {}",
            body["action"],
            response
        );
        assert_eq!(response["success"], true);
        response["data"].clone()
    }

    /// Create an invoice and return its id.
    pub async fn create_invoice(&self, mut body: Value) -> Uuid {
        body["action"] = Value::from("create_invoice");
        let data = self.post_ok(body).await;
        id_of(&data)
    }

    /// Draft with a single 250.00 line at 10% tax.
    pub async fn create_simple_invoice(&self) -> Uuid {
        self.create_invoice(serde_json::json!({
            "client_name": "Acme Ltd",
            "client_email": "billing@acme.test",
            "tax_rate": 10,
            "items": [
                { "description": "Consulting", "quantity": 2, "unit_price": 125 }
            ]
        }))
        .await
    }
}

pub fn id_of(value: &Value) -> Uuid {
    value["id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .expect("Missing id")
}

pub fn money(value: &Value) -> f64 {
    value.as_f64().expect("Expected a number")
}

/// Spawn the full server on a random port; returns its base address.
pub async fn spawn_server() -> String {
    let mut config = InvoicingConfig::in_memory();
    config.common.port = 0;

    let app = Application::build_with_store(config, Arc::new(MemoryStore::new()))
        .await
        .expect("Failed to build test application");
    let address = format!("http://127.0.0.1:{}", app.port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    address
}

/// Store that is always down.
pub struct FailingStore;

fn down() -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("connection refused"))
}

#[async_trait::async_trait]
impl InvoiceStore for FailingStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Err(down())
    }

    async fn insert_invoice(&self, _invoice: &Invoice) -> Result<Invoice, AppError> {
        Err(down())
    }

    async fn get_invoice(
        &self,
        _user_id: &str,
        _invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        Err(down())
    }

    async fn list_invoices(
        &self,
        _user_id: &str,
        _filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        Err(down())
    }

    async fn update_invoice(&self, _invoice: &Invoice) -> Result<Invoice, AppError> {
        Err(down())
    }

    async fn delete_draft_invoice(
        &self,
        _user_id: &str,
        _invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        Err(down())
    }

    async fn add_item(
        &self,
        _user_id: &str,
        _invoice_id: Uuid,
        _item: &InvoiceItem,
    ) -> Result<Invoice, AppError> {
        Err(down())
    }

    async fn record_reminder(
        &self,
        _user_id: &str,
        _invoice_id: Uuid,
        _sent_at: DateTime<Utc>,
    ) -> Result<Invoice, AppError> {
        Err(down())
    }

    async fn mark_paid(
        &self,
        _invoice: &Invoice,
        _payment: Option<&Payment>,
    ) -> Result<Invoice, AppError> {
        Err(down())
    }

    async fn record_payment(
        &self,
        _payment: &Payment,
        _today: NaiveDate,
    ) -> Result<PaymentOutcome, AppError> {
        Err(down())
    }

    async fn list_payments(
        &self,
        _user_id: &str,
        _invoice_id: Option<Uuid>,
        _limit: i64,
        _offset: i64,
    ) -> Result<Vec<Payment>, AppError> {
        Err(down())
    }

    async fn insert_template(
        &self,
        _template: &InvoiceTemplate,
    ) -> Result<InvoiceTemplate, AppError> {
        Err(down())
    }

    async fn get_template(
        &self,
        _user_id: &str,
        _template_id: Uuid,
    ) -> Result<Option<InvoiceTemplate>, AppError> {
        Err(down())
    }

    async fn list_templates(&self, _user_id: &str) -> Result<Vec<InvoiceTemplate>, AppError> {
        Err(down())
    }

    async fn increment_template_usage(
        &self,
        _user_id: &str,
        _template_id: Uuid,
    ) -> Result<(), AppError> {
        Err(down())
    }

    async fn upsert_recurring(
        &self,
        _config: &RecurringInvoice,
    ) -> Result<RecurringInvoice, AppError> {
        Err(down())
    }

    async fn list_recurring(
        &self,
        _user_id: &str,
        _active: Option<bool>,
    ) -> Result<Vec<RecurringInvoice>, AppError> {
        Err(down())
    }

    async fn record_recurring_run(
        &self,
        _invoice: &Invoice,
        _due: &RecurringInvoice,
        _advanced: &RecurringInvoice,
    ) -> Result<Option<Invoice>, AppError> {
        Err(down())
    }

    async fn save_stats(&self, _user_id: &str, _stats: &BillingStats) -> Result<(), AppError> {
        Err(down())
    }
}
