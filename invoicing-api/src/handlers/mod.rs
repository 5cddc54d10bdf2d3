//! HTTP handlers for invoicing-api.

pub mod demo;
pub mod health;
pub mod invoicing;

pub use health::{health_check, metrics_handler, readiness_check};
pub use invoicing::{invoicing_get, invoicing_post};
