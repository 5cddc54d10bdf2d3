//! Recurring invoice schedules.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing cycle of a recurring invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceCycle {
    Weekly,
    Monthly,
    Quarterly,
    #[serde(alias = "annually", alias = "annual")]
    Yearly,
}

impl RecurrenceCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceCycle::Weekly => "weekly",
            RecurrenceCycle::Monthly => "monthly",
            RecurrenceCycle::Quarterly => "quarterly",
            RecurrenceCycle::Yearly => "yearly",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "weekly" => RecurrenceCycle::Weekly,
            "quarterly" => RecurrenceCycle::Quarterly,
            "yearly" | "annually" | "annual" => RecurrenceCycle::Yearly,
            _ => RecurrenceCycle::Monthly,
        }
    }

    /// The date one cycle after `from`. Month arithmetic clamps to the last day
    /// of a shorter month, so Jan 31 + 1 month is Feb 28 (or 29).
    pub fn next_date(&self, from: NaiveDate) -> Option<NaiveDate> {
        match self {
            RecurrenceCycle::Weekly => from.checked_add_days(Days::new(7)),
            RecurrenceCycle::Monthly => from.checked_add_months(Months::new(1)),
            RecurrenceCycle::Quarterly => from.checked_add_months(Months::new(3)),
            RecurrenceCycle::Yearly => from.checked_add_months(Months::new(12)),
        }
    }
}

/// Schedule that regenerates an invoice on a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringInvoice {
    pub id: Uuid,
    pub user_id: String,
    pub invoice_id: Uuid,
    pub cycle: RecurrenceCycle,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub next_invoice_date: NaiveDate,
    pub occurrences: Option<i32>,
    pub current_occurrence: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringInvoice {
    /// Active, scheduled on or before `today`, and not past its end date.
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.is_active
            && self.next_invoice_date <= today
            && self.end_date.map_or(true, |end| self.next_invoice_date <= end)
    }

    /// Schedule state after one more invoice has been generated.
    pub fn advanced(&self, now: DateTime<Utc>) -> RecurringInvoice {
        let current_occurrence = self.current_occurrence + 1;
        let next = self.cycle.next_date(self.next_invoice_date);

        let within_cap = self
            .occurrences
            .map_or(true, |cap| current_occurrence < cap);
        let within_end = match (next, self.end_date) {
            (Some(next), Some(end)) => next <= end,
            (Some(_), None) => true,
            (None, _) => false,
        };

        RecurringInvoice {
            current_occurrence,
            next_invoice_date: next.unwrap_or(self.next_invoice_date),
            is_active: within_cap && within_end,
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Input for setting up (or replacing) the schedule of an invoice.
#[derive(Debug, Clone)]
pub struct SetupRecurring {
    pub invoice_id: Uuid,
    pub cycle: RecurrenceCycle,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub occurrences: Option<i32>,
}
