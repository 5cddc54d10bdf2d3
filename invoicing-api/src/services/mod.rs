//! Services module for invoicing-api.

pub mod database;
pub mod invoicing;
pub mod memory;
pub mod metrics;
pub mod numbering;
pub mod stats;
pub mod store;
pub mod totals;

pub use database::Database;
pub use invoicing::{InvoicingService, Overview};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use stats::BillingStats;
pub use store::InvoiceStore;
