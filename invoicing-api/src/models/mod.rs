//! Domain models for invoicing-api.

mod invoice;
mod payment;
mod recurring;
mod status;
mod template;

#[cfg(test)]
pub(crate) use invoice::fixtures;
pub use invoice::{
    CreateInvoice, Invoice, InvoiceItem, ListInvoicesFilter, MarkPaid, NewLineItem, UpdateInvoice,
};
pub use payment::{completed_total, Payment, PaymentOutcome, PaymentStatus, RecordPayment};
pub use recurring::{RecurrenceCycle, RecurringInvoice, SetupRecurring};
pub use status::{InvoiceStatus, LifecycleError, Operation};
pub use template::{CreateTemplate, InvoiceTemplate, NewTemplateItem, TemplateItem};
