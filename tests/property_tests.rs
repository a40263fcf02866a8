//! Property-based tests for the conversion and clamp arithmetic.
//!
//! These verify the invariants the deduction pipeline relies on across a
//! wide range of quantities: unit conversion divides by the factor, clamping
//! never produces negative stock, and a reversal of the applied delta always
//! lands exactly on the pre-sale value.

use croffle_inventory::services::ingredient_mapping::convert_to_inventory_units;
use proptest::prelude::*;
use rust_decimal::Decimal;

// Strategies for generating test data

fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    // Quantities with up to two fractional digits, as they occur in recipes.
    (0i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn factor_strategy() -> impl Strategy<Value = Decimal> {
    // Positive conversion factors (recipe units per inventory unit).
    (1i64..100_000).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

/// The clamp arithmetic used by the deduction executor.
fn clamp_deduct(previous: Decimal, quantity: Decimal, allow_negative: bool) -> Decimal {
    if previous < quantity && !allow_negative {
        Decimal::ZERO
    } else {
        previous - quantity
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn conversion_is_division_by_factor(q in quantity_strategy(), f in factor_strategy()) {
        let delta = convert_to_inventory_units(q, f);
        prop_assert_eq!(delta, Some(q / f));
    }

    #[test]
    fn non_positive_factors_never_convert(q in quantity_strategy(), raw in -100_000i64..=0) {
        let f = Decimal::new(raw, 2);
        prop_assert_eq!(convert_to_inventory_units(q, f), None);
    }

    #[test]
    fn clamped_stock_is_never_negative(prev in quantity_strategy(), qty in quantity_strategy()) {
        let new_stock = clamp_deduct(prev, qty, false);
        prop_assert!(new_stock >= Decimal::ZERO);
    }

    #[test]
    fn restoring_the_applied_delta_is_exact(prev in quantity_strategy(), qty in quantity_strategy()) {
        // The rollback path restores previous - new, not the requested
        // quantity, so the round trip must be exact even when clamped.
        let new_stock = clamp_deduct(prev, qty, false);
        let applied = prev - new_stock;
        prop_assert_eq!(new_stock + applied, prev);
    }

    #[test]
    fn negative_policy_applies_the_full_quantity(prev in quantity_strategy(), qty in quantity_strategy()) {
        let new_stock = clamp_deduct(prev, qty, true);
        prop_assert_eq!(prev - new_stock, qty);
    }
}
