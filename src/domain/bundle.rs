//! Bundle Aggregate
//!
//! A bundle groups existing catalog variants into one sellable unit at a
//! derived discounted price. Status changes go through the transition methods
//! below; derived values (pricing, availability) are computed by the engine
//! and passed in, never stored as truth on the aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::events::BundleEvent;
use crate::engine::availability::Availability;
use crate::engine::pricing::Pricing;
use crate::{EngineError, Result};

/// Discount rule for a bundle. Exactly one variant is in effect at a time,
/// so a fixed price and a percentage can never both apply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "discount_type", rename_all = "lowercase")]
pub enum DiscountRule {
    /// Absolute bundle price in minor currency units.
    Fixed { fixed_price: i64 },
    /// Percentage off the summed component price, 0..=100.
    Percent { percent_off: u8 },
}

impl DiscountRule {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Fixed { fixed_price } if *fixed_price < 0 => Err(EngineError::validation(
                "fixed_price",
                "fixed price must not be negative",
            )),
            Self::Percent { percent_off } if *percent_off > 100 => Err(EngineError::validation(
                "percent_off",
                "percent off must be between 0 and 100",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BundleStatus {
    #[default]
    Draft,
    Active,
    Broken,
    Expired,
    Archived,
}

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Broken => "BROKEN",
            Self::Expired => "EXPIRED",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(Self::Draft),
            "ACTIVE" => Some(Self::Active),
            "BROKEN" => Some(Self::Broken),
            "EXPIRED" => Some(Self::Expired),
            "ARCHIVED" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One component line inside a bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleItem {
    pub product_variant_id: Uuid,
    pub quantity: u32,
    /// Per-unit price in minor units, captured when the item was added.
    /// Authoritative for pricing; live catalog prices only affect availability.
    pub unit_price_snapshot: i64,
    pub display_order: u32,
}

#[derive(Clone, Debug)]
pub struct Bundle {
    id: Uuid,
    shell_product_id: Uuid,
    discount: DiscountRule,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    bundle_cap: Option<i64>,
    bundle_reserved_open: i64,
    allow_external_promos: bool,
    status: BundleStatus,
    broken_reason: Option<String>,
    archive_reason: Option<String>,
    last_recomputed_at: Option<DateTime<Utc>>,
    items: Vec<BundleItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<BundleEvent>,
}

impl Bundle {
    pub fn create(shell_product_id: Uuid, discount: DiscountRule) -> Result<Self> {
        discount.validate()?;
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut bundle = Self {
            id,
            shell_product_id,
            discount,
            valid_from: None,
            valid_to: None,
            bundle_cap: None,
            bundle_reserved_open: 0,
            allow_external_promos: false,
            status: BundleStatus::Draft,
            broken_reason: None,
            archive_reason: None,
            last_recomputed_at: None,
            items: vec![],
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        bundle.raise_event(BundleEvent::Created { bundle_id: id });
        Ok(bundle)
    }

    /// Reconstructs a bundle from persisted state. Items are re-sorted by
    /// display order so callers always observe the merchant-defined ordering.
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: Uuid,
        shell_product_id: Uuid,
        discount: DiscountRule,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
        bundle_cap: Option<i64>,
        bundle_reserved_open: i64,
        allow_external_promos: bool,
        status: BundleStatus,
        broken_reason: Option<String>,
        archive_reason: Option<String>,
        last_recomputed_at: Option<DateTime<Utc>>,
        mut items: Vec<BundleItem>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        items.sort_by_key(|i| i.display_order);
        Self {
            id,
            shell_product_id,
            discount,
            valid_from,
            valid_to,
            bundle_cap,
            bundle_reserved_open,
            allow_external_promos,
            status,
            broken_reason,
            archive_reason,
            last_recomputed_at,
            items,
            created_at,
            updated_at,
            events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn shell_product_id(&self) -> Uuid { self.shell_product_id }
    pub fn discount(&self) -> &DiscountRule { &self.discount }
    pub fn valid_from(&self) -> Option<DateTime<Utc>> { self.valid_from }
    pub fn valid_to(&self) -> Option<DateTime<Utc>> { self.valid_to }
    pub fn bundle_cap(&self) -> Option<i64> { self.bundle_cap }
    pub fn bundle_reserved_open(&self) -> i64 { self.bundle_reserved_open }
    pub fn allow_external_promos(&self) -> bool { self.allow_external_promos }
    pub fn status(&self) -> BundleStatus { self.status }
    pub fn broken_reason(&self) -> Option<&str> { self.broken_reason.as_deref() }
    pub fn archive_reason(&self) -> Option<&str> { self.archive_reason.as_deref() }
    pub fn last_recomputed_at(&self) -> Option<DateTime<Utc>> { self.last_recomputed_at }
    pub fn items(&self) -> &[BundleItem] { &self.items }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn variant_ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|i| i.product_variant_id).collect()
    }

    /// Whether the validity window has passed. A display-level derivation
    /// until a recompute persists it as the EXPIRED status.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.valid_to, Some(valid_to) if now > valid_to)
    }

    // -------------------------------------------------------------------------
    // Mutations (legal while DRAFT or ACTIVE; rejected once ARCHIVED)
    // -------------------------------------------------------------------------

    pub fn ensure_editable(&self) -> Result<()> {
        if self.status == BundleStatus::Archived {
            return Err(self.transition_error("UPDATE"));
        }
        Ok(())
    }

    pub fn set_items(&mut self, mut items: Vec<BundleItem>) -> Result<()> {
        self.ensure_editable()?;
        if items.iter().any(|i| i.quantity == 0) {
            return Err(EngineError::validation("items", "item quantity must be at least 1"));
        }
        if items.iter().any(|i| i.unit_price_snapshot < 0) {
            return Err(EngineError::validation("items", "item price snapshot must not be negative"));
        }
        items.sort_by_key(|i| i.display_order);
        self.items = items;
        self.touch();
        Ok(())
    }

    pub fn set_discount(&mut self, discount: DiscountRule) -> Result<()> {
        self.ensure_editable()?;
        discount.validate()?;
        self.discount = discount;
        self.touch();
        Ok(())
    }

    pub fn set_window(
        &mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.ensure_editable()?;
        if let (Some(from), Some(to)) = (valid_from, valid_to) {
            if to < from {
                return Err(EngineError::validation("valid_to", "window ends before it starts"));
            }
        }
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self.touch();
        Ok(())
    }

    pub fn set_cap(&mut self, cap: Option<i64>) -> Result<()> {
        self.ensure_editable()?;
        if matches!(cap, Some(c) if c < 0) {
            return Err(EngineError::validation("bundle_cap", "cap must not be negative"));
        }
        self.bundle_cap = cap;
        self.touch();
        Ok(())
    }

    pub fn set_allow_external_promos(&mut self, allow: bool) -> Result<()> {
        self.ensure_editable()?;
        self.allow_external_promos = allow;
        self.touch();
        Ok(())
    }

    /// Only the reservation tracker adjusts this, and only via the atomic
    /// store counter; the aggregate copy just mirrors the returned value.
    pub fn sync_reserved_open(&mut self, reserved_open: i64) {
        self.bundle_reserved_open = reserved_open.max(0);
    }

    pub fn record_recompute(&mut self, at: DateTime<Utc>) {
        self.last_recomputed_at = Some(at);
    }

    // -------------------------------------------------------------------------
    // Lifecycle transitions
    // -------------------------------------------------------------------------

    /// DRAFT -> ACTIVE. All-or-nothing: any failed precondition leaves the
    /// status untouched.
    pub fn publish(&mut self, pricing: &Pricing, availability: &Availability) -> Result<()> {
        if self.status != BundleStatus::Draft {
            return Err(self.transition_error("ACTIVE"));
        }
        if self.items.is_empty() {
            return Err(EngineError::validation("items", "cannot publish a bundle with no items"));
        }
        self.discount.validate()?;
        if availability.is_broken {
            return Err(EngineError::validation(
                "items",
                availability
                    .broken_reason
                    .clone()
                    .unwrap_or_else(|| "component variants do not resolve".to_string()),
            ));
        }
        if pricing.effective_price <= 0 {
            return Err(EngineError::validation(
                "effective_price",
                "computed effective price must be positive",
            ));
        }
        self.status = BundleStatus::Active;
        self.broken_reason = None;
        self.touch();
        self.raise_event(BundleEvent::Published { bundle_id: self.id });
        Ok(())
    }

    /// Engine-driven degradation when a recompute finds the bundle broken
    /// while ACTIVE. Returns whether the status actually changed.
    pub fn mark_broken(&mut self, reason: impl Into<String>) -> bool {
        if self.status != BundleStatus::Active {
            return false;
        }
        let reason = reason.into();
        self.status = BundleStatus::Broken;
        self.broken_reason = Some(reason.clone());
        self.touch();
        self.raise_event(BundleEvent::Broken { bundle_id: self.id, reason });
        true
    }

    /// Engine-driven degradation when a recompute observes `now > valid_to`
    /// while ACTIVE.
    pub fn mark_expired(&mut self) -> bool {
        if self.status != BundleStatus::Active {
            return false;
        }
        self.status = BundleStatus::Expired;
        self.touch();
        self.raise_event(BundleEvent::Expired { bundle_id: self.id });
        true
    }

    /// BROKEN | EXPIRED -> ACTIVE, after re-validation. An expired bundle
    /// additionally needs its window extended or cleared first.
    pub fn restore(&mut self, availability: &Availability, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            BundleStatus::Broken | BundleStatus::Expired => {}
            _ => return Err(self.transition_error("ACTIVE")),
        }
        if availability.is_broken {
            return Err(EngineError::validation(
                "items",
                availability
                    .broken_reason
                    .clone()
                    .unwrap_or_else(|| "component variants do not resolve".to_string()),
            ));
        }
        if self.status == BundleStatus::Expired && self.is_expired(now) {
            return Err(EngineError::validation(
                "valid_to",
                "validity window must be extended or cleared before restore",
            ));
        }
        self.status = BundleStatus::Active;
        self.broken_reason = None;
        self.touch();
        self.raise_event(BundleEvent::Restored { bundle_id: self.id });
        Ok(())
    }

    /// ACTIVE | BROKEN | EXPIRED -> ARCHIVED. Terminal; never legal from
    /// DRAFT (nothing to retire).
    pub fn archive(&mut self, reason: impl Into<String>) -> Result<()> {
        match self.status {
            BundleStatus::Active | BundleStatus::Broken | BundleStatus::Expired => {}
            _ => return Err(self.transition_error("ARCHIVED")),
        }
        let reason = reason.into();
        self.status = BundleStatus::Archived;
        self.archive_reason = Some(reason.clone());
        self.touch();
        self.raise_event(BundleEvent::Archived { bundle_id: self.id, reason });
        Ok(())
    }

    /// Delete is only legal from DRAFT; anything with sale history must be
    /// archived instead.
    pub fn ensure_deletable(&self) -> Result<()> {
        if self.status != BundleStatus::Draft {
            return Err(self.transition_error("DELETED"));
        }
        Ok(())
    }

    fn transition_error(&self, requested: &str) -> EngineError {
        EngineError::StateTransition {
            current: self.status.to_string(),
            requested: requested.to_string(),
        }
    }

    pub fn take_events(&mut self) -> Vec<BundleEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: BundleEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{availability, pricing};
    use chrono::Duration;

    fn item(price: i64, qty: u32) -> BundleItem {
        BundleItem {
            product_variant_id: Uuid::new_v4(),
            quantity: qty,
            unit_price_snapshot: price,
            display_order: 0,
        }
    }

    fn ok_availability() -> availability::Availability {
        availability::Availability {
            bundle_virtual_stock: 5,
            is_broken: false,
            broken_reason: None,
            constraining_variants: vec![],
        }
    }

    fn broken_availability(reason: &str) -> availability::Availability {
        availability::Availability {
            bundle_virtual_stock: 0,
            is_broken: true,
            broken_reason: Some(reason.to_string()),
            constraining_variants: vec![],
        }
    }

    fn draft_with_items() -> Bundle {
        let mut b = Bundle::create(Uuid::new_v4(), DiscountRule::Fixed { fixed_price: 5000 }).unwrap();
        b.set_items(vec![item(3000, 1), item(2500, 1)]).unwrap();
        b
    }

    #[test]
    fn test_publish_happy_path() {
        let mut b = draft_with_items();
        let pricing = pricing::compute(b.discount(), b.items());
        b.publish(&pricing, &ok_availability()).unwrap();
        assert_eq!(b.status(), BundleStatus::Active);
    }

    #[test]
    fn test_publish_without_items_fails_and_stays_draft() {
        let mut b = Bundle::create(Uuid::new_v4(), DiscountRule::Percent { percent_off: 20 }).unwrap();
        let pricing = pricing::compute(b.discount(), b.items());
        let err = b.publish(&pricing, &ok_availability()).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "items", .. }));
        assert_eq!(b.status(), BundleStatus::Draft);
    }

    #[test]
    fn test_publish_broken_availability_fails() {
        let mut b = draft_with_items();
        let pricing = pricing::compute(b.discount(), b.items());
        let err = b.publish(&pricing, &broken_availability("variant missing")).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        assert_eq!(b.status(), BundleStatus::Draft);
    }

    #[test]
    fn test_publish_zero_price_fails() {
        let mut b = draft_with_items();
        b.set_discount(DiscountRule::Percent { percent_off: 100 }).unwrap();
        let pricing = pricing::compute(b.discount(), b.items());
        let err = b.publish(&pricing, &ok_availability()).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "effective_price", .. }));
        assert_eq!(b.status(), BundleStatus::Draft);
    }

    #[test]
    fn test_publish_twice_is_a_transition_error() {
        let mut b = draft_with_items();
        let pricing = pricing::compute(b.discount(), b.items());
        b.publish(&pricing, &ok_availability()).unwrap();
        let err = b.publish(&pricing, &ok_availability()).unwrap_err();
        assert!(matches!(err, EngineError::StateTransition { .. }));
    }

    #[test]
    fn test_archive_from_draft_rejected() {
        let mut b = draft_with_items();
        let err = b.archive("cleanup").unwrap_err();
        assert!(matches!(err, EngineError::StateTransition { .. }));
        assert_eq!(b.status(), BundleStatus::Draft);
    }

    #[test]
    fn test_archive_is_terminal() {
        let mut b = draft_with_items();
        let pricing = pricing::compute(b.discount(), b.items());
        b.publish(&pricing, &ok_availability()).unwrap();
        b.archive("season over").unwrap();
        assert_eq!(b.status(), BundleStatus::Archived);
        assert!(b.restore(&ok_availability(), Utc::now()).is_err());
        assert!(b.publish(&pricing, &ok_availability()).is_err());
        assert!(b.archive("again").is_err());
        assert!(b.ensure_editable().is_err());
    }

    #[test]
    fn test_broken_then_restore() {
        let mut b = draft_with_items();
        let pricing = pricing::compute(b.discount(), b.items());
        b.publish(&pricing, &ok_availability()).unwrap();
        assert!(b.mark_broken("variant disabled"));
        assert_eq!(b.status(), BundleStatus::Broken);
        assert_eq!(b.broken_reason(), Some("variant disabled"));

        // still broken: restore refuses
        assert!(b.restore(&broken_availability("variant disabled"), Utc::now()).is_err());
        assert_eq!(b.status(), BundleStatus::Broken);

        b.restore(&ok_availability(), Utc::now()).unwrap();
        assert_eq!(b.status(), BundleStatus::Active);
        assert_eq!(b.broken_reason(), None);
    }

    #[test]
    fn test_mark_broken_only_degrades_active() {
        let mut b = draft_with_items();
        assert!(!b.mark_broken("whatever"));
        assert_eq!(b.status(), BundleStatus::Draft);
    }

    #[test]
    fn test_expired_restore_needs_new_window() {
        let now = Utc::now();
        let mut b = draft_with_items();
        b.set_window(None, Some(now - Duration::days(1))).unwrap();
        let pricing = pricing::compute(b.discount(), b.items());
        b.publish(&pricing, &ok_availability()).unwrap();
        assert!(b.is_expired(now));
        assert!(b.mark_expired());
        assert_eq!(b.status(), BundleStatus::Expired);

        let err = b.restore(&ok_availability(), now).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "valid_to", .. }));

        b.set_window(None, None).unwrap();
        b.restore(&ok_availability(), now).unwrap();
        assert_eq!(b.status(), BundleStatus::Active);
    }

    #[test]
    fn test_delete_only_from_draft() {
        let mut b = draft_with_items();
        b.ensure_deletable().unwrap();
        let pricing = pricing::compute(b.discount(), b.items());
        b.publish(&pricing, &ok_availability()).unwrap();
        assert!(matches!(b.ensure_deletable(), Err(EngineError::StateTransition { .. })));
    }

    #[test]
    fn test_item_quantity_must_be_positive() {
        let mut b = Bundle::create(Uuid::new_v4(), DiscountRule::Fixed { fixed_price: 100 }).unwrap();
        let err = b.set_items(vec![item(100, 0)]).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "items", .. }));
    }

    #[test]
    fn test_item_price_snapshot_must_not_be_negative() {
        let mut b = Bundle::create(Uuid::new_v4(), DiscountRule::Fixed { fixed_price: 100 }).unwrap();
        let err = b.set_items(vec![item(-1, 1)]).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "items", .. }));
        assert!(b.items().is_empty());
    }

    #[test]
    fn test_every_content_edit_advances_updated_at() {
        // transition commits are guarded on the updated_at observed at fetch
        // time, so any interleaved edit has to move the timestamp
        let mut b = draft_with_items();
        let mut last = b.updated_at();
        std::thread::sleep(std::time::Duration::from_millis(2));
        b.set_discount(DiscountRule::Percent { percent_off: 10 }).unwrap();
        assert!(b.updated_at() > last);
        last = b.updated_at();
        std::thread::sleep(std::time::Duration::from_millis(2));
        b.set_items(vec![item(2000, 1)]).unwrap();
        assert!(b.updated_at() > last);
        last = b.updated_at();
        std::thread::sleep(std::time::Duration::from_millis(2));
        b.set_cap(Some(5)).unwrap();
        assert!(b.updated_at() > last);
        last = b.updated_at();
        std::thread::sleep(std::time::Duration::from_millis(2));
        b.set_window(None, None).unwrap();
        assert!(b.updated_at() > last);
    }

    #[test]
    fn test_invalid_discount_rules_rejected() {
        assert!(DiscountRule::Percent { percent_off: 101 }.validate().is_err());
        assert!(DiscountRule::Fixed { fixed_price: -1 }.validate().is_err());
        assert!(DiscountRule::Percent { percent_off: 100 }.validate().is_ok());
    }

    #[test]
    fn test_events_raised_on_transitions() {
        let mut b = draft_with_items();
        let pricing = pricing::compute(b.discount(), b.items());
        b.publish(&pricing, &ok_availability()).unwrap();
        let events = b.take_events();
        assert!(events.iter().any(|e| matches!(e, BundleEvent::Created { .. })));
        assert!(events.iter().any(|e| matches!(e, BundleEvent::Published { .. })));
        assert!(b.take_events().is_empty());
    }
}
