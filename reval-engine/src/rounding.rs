//! Retail price endings: snap a plan price to a fixed cents value
//! (e.g. 100.00 -> 100.90 for an ending of 90).

use crate::params::{RoundDirection, RoundingPolicy};
use crate::thresholds::ROUNDING_FRACTION_TOLERANCE;

/// Round `price` to the nearest value ending in `round_value` cents.
///
/// Non-positive prices are returned unchanged, as are prices whose cents
/// already lie within 0.01 of the target. The result is a fixed point:
/// rounding it again with the same policy returns it unchanged.
pub fn round_plan_price(price: f64, policy: &RoundingPolicy) -> f64 {
    if price.is_nan() || price <= 0.0 {
        return price;
    }
    let target = policy.target_fraction();
    let whole = price.floor();
    let frac = price - whole;
    if (frac - target).abs() < ROUNDING_FRACTION_TOLERANCE {
        return price;
    }

    let below = whole - 1.0 + target;
    let same = whole + target;
    let above = whole + 1.0 + target;

    let rounded = match policy.direction {
        RoundDirection::Up => {
            if frac <= target {
                same
            } else {
                above
            }
        }
        RoundDirection::Down => {
            if frac >= target {
                same
            } else {
                below
            }
        }
        RoundDirection::Nearest => {
            // Ties go to the lower candidate.
            [same, above].into_iter().fold(below, |best, c| {
                if (price - c).abs() < (price - best).abs() {
                    c
                } else {
                    best
                }
            })
        }
    };

    let rounded = to_cents(rounded);
    if rounded > 0.0 {
        rounded
    } else {
        price
    }
}

/// Apply the policy only when it is enabled.
pub fn apply_policy(price: f64, policy: &RoundingPolicy) -> f64 {
    if policy.enabled {
        round_plan_price(price, policy)
    } else {
        price
    }
}

fn to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
