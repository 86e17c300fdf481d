//! Pricing Calculator
//!
//! Pure derivation of a bundle's sale price and savings from its discount
//! rule and component price snapshot. No I/O; identical inputs always yield
//! identical outputs.

use serde::Serialize;

use crate::domain::bundle::{BundleItem, DiscountRule};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Pricing {
    /// Sum of unit_price_snapshot x quantity over all items, minor units.
    pub component_total: i64,
    pub effective_price: i64,
    pub total_savings: i64,
}

/// Derives the effective price for a discount rule over the item snapshot.
///
/// A zero component total (no items, or every item priced at zero) never
/// produces a legitimate sale price: both effective price and savings come
/// back 0 and the availability validator flags the bundle broken.
pub fn compute(rule: &DiscountRule, items: &[BundleItem]) -> Pricing {
    let component_total: i64 = items
        .iter()
        .map(|i| i.unit_price_snapshot.saturating_mul(i64::from(i.quantity)))
        .sum();

    if component_total <= 0 {
        return Pricing { component_total: component_total.max(0), effective_price: 0, total_savings: 0 };
    }

    let effective_price = match rule {
        DiscountRule::Fixed { fixed_price } => (*fixed_price).max(0),
        // Floor, never round up, so a percent discount cannot overcharge.
        DiscountRule::Percent { percent_off } => {
            let pct = i128::from((*percent_off).min(100));
            ((i128::from(component_total) * (100 - pct)) / 100) as i64
        }
    };

    Pricing {
        component_total,
        effective_price,
        total_savings: (component_total - effective_price).max(0),
    }
}

/// The bundle's own discount expressed as a fraction in [0, 1], the form the
/// promotion guard reasons in. Fixed rules derive it from the price spread.
pub fn discount_fraction(rule: &DiscountRule, pricing: &Pricing) -> f64 {
    match rule {
        DiscountRule::Percent { percent_off } => f64::from(*percent_off) / 100.0,
        DiscountRule::Fixed { .. } => {
            if pricing.component_total <= 0 {
                return 0.0;
            }
            let ratio = pricing.effective_price as f64 / pricing.component_total as f64;
            (1.0 - ratio).clamp(0.0, 1.0)
        }
    }
}
