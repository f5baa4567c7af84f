//! Float quantity helpers.
//!
//! Quantities are `f64` rounded to a unit-of-measure precision. All
//! comparisons in the engine go through these helpers so that "equal",
//! "zero" and "covers the demand" mean the same thing everywhere.

use core::cmp::Ordering;

/// Default unit-of-measure rounding (one thousandth of a unit).
pub const DEFAULT_ROUNDING: f64 = 0.001;

/// Round `value` to the precision expressed by `rounding`
/// (e.g. `0.001` rounds to three decimals).
pub fn round(value: f64, rounding: f64) -> f64 {
    if rounding <= 0.0 {
        return value;
    }
    (value / rounding).round() * rounding
}

/// Compare two quantities at the given precision.
pub fn compare(a: f64, b: f64, rounding: f64) -> Ordering {
    let delta = round(a - b, rounding);
    if delta.abs() < rounding / 2.0 {
        Ordering::Equal
    } else if delta < 0.0 {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Whether a quantity is zero at the given precision.
pub fn is_zero(value: f64, rounding: f64) -> bool {
    compare(value, 0.0, rounding) == Ordering::Equal
}

/// Whether `value` is strictly positive at the given precision.
pub fn is_positive(value: f64, rounding: f64) -> bool {
    compare(value, 0.0, rounding) == Ordering::Greater
}
