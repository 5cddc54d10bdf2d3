//! Human-readable invoice numbers.

use chrono::NaiveDate;
use rand::Rng;

/// `INV-YYYYMM-NNN` for `date` with a random three digit suffix.
/// Collisions are resolved by the caller retrying against the unique index.
pub fn generate_invoice_number(date: NaiveDate) -> String {
    generate_with(date, &mut rand::thread_rng())
}

pub fn generate_with<R: Rng + ?Sized>(date: NaiveDate, rng: &mut R) -> String {
    format!("INV-{}-{:03}", date.format("%Y%m"), rng.gen_range(0..1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn is_well_formed(number: &str) -> bool {
        let bytes = number.as_bytes();
        number.len() == 14
            && number.starts_with("INV-")
            && bytes[10] == b'-'
            && bytes[4..10].iter().all(u8::is_ascii_digit)
            && bytes[11..].iter().all(u8::is_ascii_digit)
    }

    #[test]
    fn number_carries_year_and_month() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let number = generate_invoice_number(date);
        assert!(number.starts_with("INV-202403-"), "got {number}");
        assert!(is_well_formed(&number), "got {number}");
    }

    #[test]
    fn suffix_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let number = generate_with(date, &mut rng);
            assert!(is_well_formed(&number), "got {number}");
        }
    }
}
