//! Invoice money arithmetic.

use crate::models::InvoiceItem;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use service_core::error::AppError;

/// Upper bound accepted for any single quantity, price or discount.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0); // 1e12

/// Tax rates are percentages.
pub const MAX_TAX_RATE: Decimal = Decimal::ONE_HUNDRED;

fn overflow() -> AppError {
    AppError::BadRequest(anyhow::anyhow!("Invoice amounts are too large"))
}

/// Derived money fields of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// `rate` percent of `amount`, rounded half away from zero to cents.
/// `None` when the product leaves `Decimal`'s range.
pub fn percent_of(amount: Decimal, rate: Decimal) -> Option<Decimal> {
    amount
        .checked_mul(rate)?
        .checked_div(Decimal::ONE_HUNDRED)
        .map(|tax| tax.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Price of one line, `quantity × unit_price`.
pub fn line_total(quantity: Decimal, unit_price: Decimal) -> Result<Decimal, AppError> {
    quantity.checked_mul(unit_price).ok_or_else(overflow)
}

/// subtotal = Σ quantity × unit_price, tax = (subtotal − discount) × rate / 100,
/// total = subtotal − discount + tax. Only the tax is rounded.
///
/// Arithmetic is checked; amounts beyond `Decimal`'s range are a bad request.
pub fn calculate<I>(
    lines: I,
    tax_rate: Decimal,
    discount: Decimal,
) -> Result<InvoiceTotals, AppError>
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    let subtotal = lines
        .into_iter()
        .try_fold(Decimal::ZERO, |sum, (quantity, unit_price)| {
            sum.checked_add(line_total(quantity, unit_price)?)
                .ok_or_else(overflow)
        })?;
    let taxable = subtotal.checked_sub(discount).ok_or_else(overflow)?;
    let tax_amount = percent_of(taxable, tax_rate).ok_or_else(overflow)?;
    let total = taxable.checked_add(tax_amount).ok_or_else(overflow)?;

    Ok(InvoiceTotals {
        subtotal,
        tax_amount,
        total,
    })
}

/// Totals for stored line items.
pub fn for_items(
    items: &[InvoiceItem],
    tax_rate: Decimal,
    discount: Decimal,
) -> Result<InvoiceTotals, AppError> {
    calculate(
        items.iter().map(|item| (item.quantity, item.unit_price)),
        tax_rate,
        discount,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn max_amount_is_one_trillion() {
        assert_eq!(MAX_AMOUNT, dec!(1000000000000));
    }

    #[test]
    fn computes_subtotal_tax_and_total() {
        let totals = calculate(
            vec![(dec!(2), dec!(100)), (dec!(1), dec!(50))],
            dec!(10),
            dec!(0),
        )
        .unwrap();
        assert_eq!(totals.subtotal, dec!(250));
        assert_eq!(totals.tax_amount, dec!(25));
        assert_eq!(totals.total, dec!(275));
    }

    #[test]
    fn tax_applies_to_the_discounted_amount() {
        let totals = calculate(vec![(dec!(1), dec!(200))], dec!(5), dec!(15)).unwrap();
        assert_eq!(totals.subtotal, dec!(200));
        assert_eq!(totals.tax_amount, dec!(9.25));
        assert_eq!(totals.total, dec!(194.25));
    }

    #[test]
    fn total_identity_holds_exactly() {
        let totals = calculate(
            vec![(dec!(3), dec!(19.99)), (dec!(0.75), dec!(120))],
            dec!(8.875),
            dec!(12.5),
        )
        .unwrap();
        assert_eq!(
            totals.total,
            totals.subtotal - dec!(12.5) + totals.tax_amount
        );
        let exact_tax = (totals.subtotal - dec!(12.5)) * dec!(8.875) / dec!(100);
        assert!((totals.tax_amount - exact_tax).abs() <= dec!(0.005));
    }

    #[test]
    fn tax_rounds_half_away_from_zero() {
        // 0.5 * 1 = 0.005 -> 0.01
        let totals = calculate(vec![(dec!(1), dec!(0.5))], dec!(1), dec!(0)).unwrap();
        assert_eq!(totals.tax_amount, dec!(0.01));

        let totals = calculate(vec![(dec!(3), dec!(33.33))], dec!(7.25), dec!(0)).unwrap();
        assert_eq!(totals.subtotal, dec!(99.99));
        assert_eq!(totals.tax_amount, dec!(7.25));
    }

    #[test]
    fn empty_invoice_totals_zero() {
        let totals = calculate(Vec::new(), dec!(20), Decimal::ZERO).unwrap();
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.tax_amount, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn overflowing_amounts_are_rejected() {
        let err = calculate(
            vec![(dec!(1000000000000), dec!(1000000000000))],
            dec!(1000000000000),
            dec!(0),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = calculate(vec![(Decimal::MAX, dec!(2))], dec!(0), dec!(0)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let many = std::iter::repeat((dec!(1000000000000), dec!(1000000000000))).take(80_000);
        assert!(calculate(many, dec!(0), dec!(0)).is_err());
    }

    #[test]
    fn largest_accepted_inputs_stay_in_range() {
        let totals = calculate(vec![(MAX_AMOUNT, MAX_AMOUNT)], MAX_TAX_RATE, dec!(0)).unwrap();
        assert_eq!(totals.subtotal, dec!(1000000000000000000000000));
        assert_eq!(totals.total, dec!(2000000000000000000000000));
    }

    #[test]
    fn fractional_quantities_stay_exact() {
        let totals = calculate(
            vec![(dec!(0.1), dec!(0.2)), (dec!(0.3), dec!(0.7))],
            dec!(0),
            dec!(0),
        )
        .unwrap();
        assert_eq!(totals.subtotal, dec!(0.23));
        assert_eq!(totals.total, dec!(0.23));
    }
}
