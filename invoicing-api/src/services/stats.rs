//! Billing statistics.

use crate::models::{Invoice, InvoiceStatus};
use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Summary counters over an owner's invoices.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingStats {
    pub total_outstanding: Decimal,
    pub paid_this_month: Decimal,
    pub overdue_amount: Decimal,
    pub average_invoice_value: Decimal,
    pub total_invoices: i64,
    pub paid_invoices: i64,
    pub pending_invoices: i64,
    pub overdue_invoices: i64,
}

impl BillingStats {
    /// Fold `invoices` using their effective status on `today`.
    pub fn from_invoices<'a, I>(invoices: I, today: NaiveDate) -> Self
    where
        I: IntoIterator<Item = &'a Invoice>,
    {
        let mut stats = BillingStats::default();
        let mut paid_sum = Decimal::ZERO;

        for invoice in invoices {
            stats.total_invoices += 1;

            match invoice.effective_status(today) {
                InvoiceStatus::Sent | InvoiceStatus::Viewed => {
                    stats.pending_invoices += 1;
                    stats.total_outstanding += invoice.total;
                }
                InvoiceStatus::Overdue => {
                    stats.overdue_invoices += 1;
                    stats.overdue_amount += invoice.total;
                    stats.total_outstanding += invoice.total;
                }
                InvoiceStatus::Paid => {
                    stats.paid_invoices += 1;
                    paid_sum += invoice.total;
                    let this_month = invoice.paid_date.is_some_and(|paid| {
                        paid.year() == today.year() && paid.month() == today.month()
                    });
                    if this_month {
                        stats.paid_this_month += invoice.total;
                    }
                }
                InvoiceStatus::Draft | InvoiceStatus::Cancelled => {}
            }
        }

        if stats.paid_invoices > 0 {
            stats.average_invoice_value = (paid_sum / Decimal::from(stats.paid_invoices))
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::invoice;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn paid_this_month_and_overdue_are_split() {
        let today = date(2024, 5, 20);
        let mut paid = invoice(InvoiceStatus::Paid, dec!(100), date(2024, 5, 30));
        paid.paid_date = Some(date(2024, 5, 3));
        let overdue = invoice(InvoiceStatus::Overdue, dec!(50), date(2024, 5, 1));

        let stats = BillingStats::from_invoices([&paid, &overdue], today);

        assert_eq!(stats.paid_this_month, dec!(100));
        assert_eq!(stats.overdue_amount, dec!(50));
        assert_eq!(stats.total_outstanding, dec!(50));
        assert_eq!(stats.total_invoices, 2);
        assert_eq!(stats.paid_invoices, 1);
        assert_eq!(stats.overdue_invoices, 1);
        assert_eq!(stats.average_invoice_value, dec!(100));
    }

    #[test]
    fn sent_invoice_past_due_counts_as_overdue() {
        let today = date(2024, 5, 20);
        let late = invoice(InvoiceStatus::Sent, dec!(75), date(2024, 5, 10));
        let current = invoice(InvoiceStatus::Viewed, dec!(25), date(2024, 6, 10));

        let stats = BillingStats::from_invoices([&late, &current], today);

        assert_eq!(stats.overdue_invoices, 1);
        assert_eq!(stats.overdue_amount, dec!(75));
        assert_eq!(stats.pending_invoices, 1);
        assert_eq!(stats.total_outstanding, dec!(100));
    }

    #[test]
    fn payments_from_last_month_are_excluded() {
        let today = date(2024, 5, 1);
        let mut paid = invoice(InvoiceStatus::Paid, dec!(40), date(2024, 5, 30));
        paid.paid_date = Some(date(2024, 4, 30));

        let stats = BillingStats::from_invoices([&paid], today);
        assert_eq!(stats.paid_this_month, Decimal::ZERO);
        assert_eq!(stats.average_invoice_value, dec!(40));
    }

    #[test]
    fn average_is_rounded_and_zero_when_nothing_paid() {
        let today = date(2024, 5, 20);
        assert_eq!(
            BillingStats::from_invoices(std::iter::empty(), today).average_invoice_value,
            Decimal::ZERO
        );

        let paid: Vec<_> = [dec!(10), dec!(10), dec!(20)]
            .into_iter()
            .map(|total| invoice(InvoiceStatus::Paid, total, date(2024, 5, 30)))
            .collect();
        let stats = BillingStats::from_invoices(&paid, today);
        assert_eq!(stats.average_invoice_value, dec!(13.33));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(BillingStats::default()).unwrap();
        assert!(json.get("totalOutstanding").is_some());
        assert!(json.get("averageInvoiceValue").is_some());
        assert!(json.get("overdueInvoices").is_some());
    }
}
