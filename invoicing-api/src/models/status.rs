//! Invoice status and the lifecycle rules that guard each operation.

use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Viewed => "viewed",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Lenient conversion for values read back from storage.
    pub fn from_string(s: &str) -> Self {
        s.parse().unwrap_or(InvoiceStatus::Draft)
    }

    /// Paid and cancelled invoices accept no further changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Issued to the client and still waiting for money.
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Sent | InvoiceStatus::Viewed | InvoiceStatus::Overdue
        )
    }

    /// Check whether `operation` may run against an invoice in this status.
    pub fn permits(&self, operation: Operation) -> Result<(), LifecycleError> {
        match operation {
            Operation::Delete if *self != InvoiceStatus::Draft => Err(LifecycleError::NotDraft),
            Operation::Edit | Operation::AddItem | Operation::Send | Operation::Cancel
                if self.is_terminal() =>
            {
                Err(LifecycleError::Closed(*self))
            }
            Operation::MarkPaid if self.is_terminal() => Err(LifecycleError::Closed(*self)),
            Operation::RecordPayment | Operation::Recur if *self == InvoiceStatus::Cancelled => {
                Err(LifecycleError::Closed(*self))
            }
            Operation::Remind if !self.is_outstanding() => Err(LifecycleError::NotIssued(*self)),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "viewed" => Ok(InvoiceStatus::Viewed),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "cancelled" | "canceled" => Ok(InvoiceStatus::Cancelled),
            other => Err(LifecycleError::UnknownStatus(other.to_string())),
        }
    }
}

/// Named operations that change an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Edit,
    AddItem,
    Send,
    MarkPaid,
    RecordPayment,
    Cancel,
    Delete,
    Recur,
    Remind,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Only draft invoices can be deleted")]
    NotDraft,

    #[error("Invoice is {0} and cannot be changed")]
    Closed(InvoiceStatus),

    #[error("Invoice is {0}; reminders are only sent for issued, unpaid invoices")]
    NotIssued(InvoiceStatus),

    #[error("Unknown invoice status: {0}")]
    UnknownStatus(String),
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        AppError::BadRequest(anyhow::Error::new(err))
    }
}
