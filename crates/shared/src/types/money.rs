//! Money helpers for ledger amounts.
//!
//! CRITICAL: Never use floating-point for money calculations.
//! Every amount stored in the ledger is a `rust_decimal::Decimal` with exactly two
//! fractional digits and at most twelve significant digits (`NUMERIC(12, 2)`).

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits carried by every ledger amount.
pub const LEDGER_SCALE: u32 = 2;

/// Largest absolute amount representable in a `NUMERIC(12, 2)` column.
pub const MAX_LEDGER_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, LEDGER_SCALE);

/// Zero at ledger scale (`0.00`).
#[must_use]
pub fn zero() -> Decimal {
    Decimal::new(0, LEDGER_SCALE)
}

/// Rescales a value to exactly two fractional digits using Banker's Rounding.
#[must_use]
pub fn to_ledger_scale(amount: Decimal) -> Decimal {
    let mut scaled = amount.round_dp_with_strategy(LEDGER_SCALE, RoundingStrategy::MidpointNearestEven);
    scaled.rescale(LEDGER_SCALE);
    scaled
}

/// Returns true if the value can be stored without rounding or overflow.
#[must_use]
pub fn fits_ledger_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= LEDGER_SCALE && amount.abs() <= MAX_LEDGER_AMOUNT
}

/// Renders an amount with exactly two fractional digits ("10.00", "-0.50").
#[must_use]
pub fn format_amount(amount: Decimal) -> String {
    to_ledger_scale(amount).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_max_ledger_amount() {
        assert_eq!(MAX_LEDGER_AMOUNT, dec!(9999999999.99));
    }

    #[test]
    fn test_zero_has_ledger_scale() {
        assert_eq!(zero().scale(), 2);
        assert_eq!(zero().to_string(), "0.00");
    }

    #[rstest]
    #[case(dec!(10), "10.00")]
    #[case(dec!(10.5), "10.50")]
    #[case(dec!(-0.5), "-0.50")]
    #[case(dec!(1.005), "1.00")]
    #[case(dec!(1.015), "1.02")]
    fn test_format_amount(#[case] amount: Decimal, #[case] expected: &str) {
        assert_eq!(format_amount(amount), expected);
    }

    #[rstest]
    #[case(dec!(10.00), true)]
    #[case(dec!(10.010), true)]
    #[case(dec!(0.01), true)]
    #[case(dec!(0.001), false)]
    #[case(dec!(9999999999.99), true)]
    #[case(dec!(10000000000.00), false)]
    #[case(dec!(-9999999999.99), true)]
    fn test_fits_ledger_scale(#[case] amount: Decimal, #[case] expected: bool) {
        assert_eq!(fits_ledger_scale(amount), expected);
    }

    #[test]
    fn test_to_ledger_scale_preserves_value() {
        let scaled = to_ledger_scale(dec!(7));
        assert_eq!(scaled, dec!(7));
        assert_eq!(scaled.scale(), 2);
    }
}
