//! Linear interpolation between two bracketing price points

use bigdecimal::BigDecimal;

use super::types::PricePoint;

/// Computes the price at `target` on the straight line through `before` and `after`.
///
/// The target is clamped into `[before.timestamp, after.timestamp]`, so a target
/// outside the bracket yields the nearer endpoint instead of an extrapolated value.
/// Brackets passed in reverse order are swapped. When both points share a
/// timestamp the earlier point's price is returned.
pub fn interpolate(target: i64, before: &PricePoint, after: &PricePoint) -> BigDecimal {
    let (before, after) = if before.timestamp <= after.timestamp {
        (before, after)
    } else {
        (after, before)
    };

    if before.timestamp == after.timestamp {
        return before.price.clone();
    }

    let clamped = target.clamp(before.timestamp, after.timestamp);
    if clamped != target {
        log::debug!(
            "Interpolation target {} outside bracket [{}, {}], clamped to {}",
            target,
            before.timestamp,
            after.timestamp,
            clamped
        );
    }

    let elapsed = BigDecimal::from(clamped - before.timestamp);
    let span = BigDecimal::from(after.timestamp - before.timestamp);

    // Multiply before dividing to keep exact results for terminating ratios
    let delta = &after.price - &before.price;
    before.price.clone() + (delta * elapsed) / span
}
