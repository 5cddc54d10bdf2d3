//! Application startup and lifecycle management.

use crate::config::{InvoicingConfig, StoreBackend};
use crate::handlers::{
    health_check, invoicing_get, invoicing_post, metrics_handler, readiness_check,
};
use crate::services::{init_metrics, Database, InvoiceStore, InvoicingService, MemoryStore};
use axum::{middleware::from_fn, routing::get, Router};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::security_headers::security_headers_middleware;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub const INVOICING_ROUTE: &str = "/api/admin/invoicing";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: InvoicingConfig,
    pub service: InvoicingService,
}

impl AppState {
    pub fn new(config: InvoicingConfig, store: Arc<dyn InvoiceStore>) -> Self {
        Self {
            config,
            service: InvoicingService::new(store),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(INVOICING_ROUTE, get(invoicing_get).post(invoicing_post))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}

/// Open the configured store, running migrations for PostgreSQL when enabled.
async fn open_store(config: &InvoicingConfig) -> Result<Arc<dyn InvoiceStore>, AppError> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config.database.url.as_ref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
            })?;

            let db = Database::new(
                url.expose_secret(),
                config.database.max_connections,
                config.database.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                e
            })?;

            if config.database.run_migrations {
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
            }

            Ok(Arc::new(db))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the configured store.
    pub async fn build(config: InvoicingConfig) -> Result<Self, AppError> {
        let store = open_store(&config).await?;
        Self::build_with_store(config, store).await
    }

    /// Build the application around an already opened store.
    pub async fn build_with_store(
        config: InvoicingConfig,
        store: Arc<dyn InvoiceStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let router = build_router(AppState::new(config, store));

        tracing::info!(port = port, "Invoicing API listener bound");

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves, letting in-flight requests finish.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            service = "invoicing-api",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
