//! Availability Validator
//!
//! Cross-checks a bundle's items against a catalog snapshot to derive the
//! virtual stock (whole bundles sellable right now) and the broken flag.
//! Side-effect free and recomputable on demand.

use serde::Serialize;
use uuid::Uuid;

use crate::catalog::CatalogSnapshot;
use crate::domain::bundle::BundleItem;

#[derive(Clone, Debug, Serialize)]
pub struct Availability {
    /// min over items of floor(variant stock / item quantity).
    pub bundle_virtual_stock: i64,
    pub is_broken: bool,
    pub broken_reason: Option<String>,
    /// Variants currently pinning the virtual stock at its minimum.
    pub constraining_variants: Vec<Uuid>,
}

impl Availability {
    pub fn broken(reason: impl Into<String>) -> Self {
        Self {
            bundle_virtual_stock: 0,
            is_broken: true,
            broken_reason: Some(reason.into()),
            constraining_variants: vec![],
        }
    }
}

pub fn compute(items: &[BundleItem], snapshot: &CatalogSnapshot) -> Availability {
    if items.is_empty() {
        return Availability::broken("bundle has no items");
    }

    let mut unresolved: Vec<Uuid> = vec![];
    let mut virtual_stock = i64::MAX;
    let mut per_item: Vec<(Uuid, i64)> = Vec::with_capacity(items.len());

    for item in items {
        match snapshot.get(item.product_variant_id) {
            Some(variant) if variant.enabled => {
                let sellable = variant.stock.max(0) / i64::from(item.quantity.max(1));
                per_item.push((item.product_variant_id, sellable));
                virtual_stock = virtual_stock.min(sellable);
            }
            // missing, deleted and disabled variants all break the bundle
            _ => unresolved.push(item.product_variant_id),
        }
    }

    if !unresolved.is_empty() {
        let named = unresolved.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ");
        return Availability {
            bundle_virtual_stock: 0,
            is_broken: true,
            broken_reason: Some(format!("unresolved component variants: {named}")),
            constraining_variants: unresolved,
        };
    }

    let component_total: i64 = items
        .iter()
        .map(|i| i.unit_price_snapshot.saturating_mul(i64::from(i.quantity)))
        .sum();
    if component_total <= 0 {
        // zero total is never a legitimate sale price
        return Availability::broken("component total is zero");
    }

    let constraining = per_item
        .into_iter()
        .filter(|(_, sellable)| *sellable == virtual_stock)
        .map(|(id, _)| id)
        .collect();

    Availability {
        bundle_virtual_stock: virtual_stock,
        is_broken: false,
        broken_reason: None,
        constraining_variants: constraining,
    }
}

/// Window expiry is a separate, simpler derivation; it never implies broken.
pub fn is_expired(now: chrono::DateTime<chrono::Utc>, valid_to: Option<chrono::DateTime<chrono::Utc>>) -> bool {
    matches!(valid_to, Some(t) if now > t)
}
