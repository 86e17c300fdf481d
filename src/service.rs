//! Bundle service
//!
//! The single validation and transition boundary in front of the engine.
//! Administrative mutations and storefront reads both come through here;
//! derived fields are recomputed per call, never trusted as stored truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::catalog::{CatalogReader, CatalogSnapshot};
use crate::domain::bundle::{Bundle, BundleItem, BundleStatus, DiscountRule};
use crate::domain::config::{BundleConfig, SiteWidePromoPolicy};
use crate::domain::events::BundleEvent;
use crate::engine::{availability, pricing, promo, reservation};
use crate::store::{BundleSort, BundleStore};
use crate::{EngineError, Result};

// =============================================================================
// Requests
// =============================================================================

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountTypeInput {
    Fixed,
    Percent,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DiscountInput {
    pub discount_type: DiscountTypeInput,
    pub fixed_price: Option<i64>,
    #[validate(range(min = 0, max = 100))]
    pub percent_off: Option<u8>,
}

impl DiscountInput {
    /// The discount type picks which value is meaningful; the other is
    /// ignored rather than rejected.
    fn into_rule(self) -> Result<DiscountRule> {
        let rule = match self.discount_type {
            DiscountTypeInput::Fixed => DiscountRule::Fixed {
                fixed_price: self.fixed_price.ok_or_else(|| {
                    EngineError::validation("fixed_price", "required for a fixed discount")
                })?,
            },
            DiscountTypeInput::Percent => DiscountRule::Percent {
                percent_off: self.percent_off.ok_or_else(|| {
                    EngineError::validation("percent_off", "required for a percent discount")
                })?,
            },
        };
        rule.validate()?;
        Ok(rule)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct BundleItemInput {
    pub product_variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: u32,
    /// Omitted: captured from the live catalog price at add time.
    pub unit_price_snapshot: Option<i64>,
    pub display_order: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowInput {
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CapInput {
    pub bundle_cap: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBundleRequest {
    pub shell_product_id: Uuid,
    #[validate]
    pub discount: DiscountInput,
    pub window: Option<WindowInput>,
    pub cap: Option<CapInput>,
    pub allow_external_promos: Option<bool>,
    #[validate]
    pub items: Vec<BundleItemInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBundleRequest {
    #[validate]
    pub discount: Option<DiscountInput>,
    /// Present replaces the whole window; nulls inside clear it.
    pub window: Option<WindowInput>,
    pub cap: Option<CapInput>,
    pub allow_external_promos: Option<bool>,
    /// Quantity bounds are re-checked by the aggregate on apply.
    pub items: Option<Vec<BundleItemInput>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReserveRequest {
    #[validate(range(min = 1))]
    pub qty: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PromoCheckRequest {
    #[validate(range(min = 0.0, max = 1.0))]
    pub proposed_external_discount_pct: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateConfigRequest {
    pub site_wide_promos_affect_bundles: SiteWidePromoPolicy,
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_cumulative_discount_pct: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBundlesQuery {
    pub status: Option<String>,
    /// One of created_at, updated_at, status. Defaults to created_at.
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

// =============================================================================
// Responses
// =============================================================================

/// A bundle plus its freshly recomputed derived fields. `stale` marks a read
/// served from last-known state because the catalog was unreachable.
#[derive(Debug, Serialize)]
pub struct BundleView {
    pub id: Uuid,
    pub shell_product_id: Uuid,
    #[serde(flatten)]
    pub discount: DiscountRule,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub bundle_cap: Option<i64>,
    pub bundle_reserved_open: i64,
    pub is_overbooked: bool,
    pub allow_external_promos: bool,
    pub status: BundleStatus,
    pub broken_reason: Option<String>,
    pub archive_reason: Option<String>,
    pub last_recomputed_at: Option<DateTime<Utc>>,
    pub items: Vec<BundleItem>,
    pub component_total: i64,
    pub effective_price: i64,
    pub total_savings: i64,
    pub bundle_virtual_stock: i64,
    pub is_expired: bool,
    pub is_broken: bool,
    pub constraining_variants: Vec<Uuid>,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BundleList {
    pub items: Vec<BundleView>,
    pub total_items: i64,
    pub page: u32,
}

#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub result: &'static str,
    pub message: String,
}

// =============================================================================
// Event publishing
// =============================================================================

/// Best-effort domain event fan-out over NATS; failures are logged and never
/// fail the mutation that raised the event.
#[derive(Clone)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self {
        Self { nats }
    }

    pub async fn publish(&self, event: &BundleEvent) {
        let Some(client) = &self.nats else { return };
        match serde_json::to_vec(event) {
            Ok(payload) => {
                if let Err(e) = client.publish("bundles.events".to_string(), payload.into()).await {
                    tracing::warn!(error = %e, "failed to publish bundle event");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode bundle event"),
        }
    }

    async fn drain(&self, bundle: &mut Bundle) {
        for event in bundle.take_events() {
            self.publish(&event).await;
        }
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct BundleService {
    store: BundleStore,
    catalog: Arc<dyn CatalogReader>,
    events: EventPublisher,
}

impl BundleService {
    pub fn new(
        store: BundleStore,
        catalog: Arc<dyn CatalogReader>,
        events: EventPublisher,
    ) -> Self {
        Self { store, catalog, events }
    }

    pub async fn create_bundle(&self, req: CreateBundleRequest) -> Result<BundleView> {
        req.validate().map_err(map_validation)?;
        let mut bundle = Bundle::create(req.shell_product_id, req.discount.into_rule()?)?;
        if let Some(window) = req.window {
            bundle.set_window(window.valid_from, window.valid_to)?;
        }
        if let Some(cap) = req.cap {
            bundle.set_cap(cap.bundle_cap)?;
        }
        if let Some(allow) = req.allow_external_promos {
            bundle.set_allow_external_promos(allow)?;
        }
        let items = self.resolve_items(req.items).await?;
        bundle.set_items(items)?;

        self.store.insert(&bundle).await?;
        self.events.drain(&mut bundle).await;
        Ok(self.read_view(bundle, false).await)
    }

    pub async fn update_bundle(&self, id: Uuid, req: UpdateBundleRequest) -> Result<BundleView> {
        req.validate().map_err(map_validation)?;
        let mut bundle = self.store.fetch(id).await?;
        bundle.ensure_editable()?;
        if let Some(discount) = req.discount {
            bundle.set_discount(discount.into_rule()?)?;
        }
        if let Some(window) = req.window {
            bundle.set_window(window.valid_from, window.valid_to)?;
        }
        if let Some(cap) = req.cap {
            bundle.set_cap(cap.bundle_cap)?;
        }
        if let Some(allow) = req.allow_external_promos {
            bundle.set_allow_external_promos(allow)?;
        }
        if let Some(items) = req.items {
            let items = self.resolve_items(items).await?;
            bundle.set_items(items)?;
        }
        self.store.save_editable(&bundle).await?;
        Ok(self.read_view(bundle, true).await)
    }

    /// Storefront/admin read; derived fields are recomputed and a broken or
    /// expired ACTIVE bundle is degraded on observation.
    pub async fn get_bundle(&self, id: Uuid) -> Result<BundleView> {
        let bundle = self.store.fetch(id).await?;
        Ok(self.read_view(bundle, true).await)
    }

    pub async fn list_bundles(&self, query: ListBundlesQuery) -> Result<BundleList> {
        let status = match &query.status {
            Some(s) => Some(
                BundleStatus::parse(s)
                    .ok_or_else(|| EngineError::validation("status", format!("unknown status {s}")))?,
            ),
            None => None,
        };
        let sort = match &query.sort {
            Some(s) => BundleSort::parse(s)
                .ok_or_else(|| EngineError::validation("sort", format!("unknown sort {s}")))?,
            None => BundleSort::default(),
        };
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
        let (bundles, total_items) = self.store.list(status, sort, page, per_page).await?;

        // one snapshot for the whole page; a failure degrades every row
        let ids: Vec<Uuid> = bundles.iter().flat_map(Bundle::variant_ids).collect();
        let snapshot = match self.catalog.snapshot(&ids).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "catalog unavailable, serving stale bundle list");
                None
            }
        };
        let now = Utc::now();
        let items = bundles
            .into_iter()
            .map(|b| match &snapshot {
                Some(snapshot) => fresh_view(&b, snapshot, now),
                None => stale_view(&b, now),
            })
            .collect();
        Ok(BundleList { items, total_items, page })
    }

    /// Validation and the status write form one logical unit: the commit is
    /// conditional on the `updated_at` observed here, so a concurrent content
    /// edit that would invalidate the validation surfaces as a conflict
    /// rather than an invalid ACTIVE bundle.
    pub async fn publish_bundle(&self, id: Uuid) -> Result<BundleView> {
        let mut bundle = self.store.fetch(id).await?;
        let observed = bundle.updated_at();
        let snapshot = self.require_snapshot(&bundle).await?;
        let pricing = pricing::compute(bundle.discount(), bundle.items());
        let avail = availability::compute(bundle.items(), &snapshot);
        bundle.publish(&pricing, &avail)?;
        self.store.commit_transition(&bundle, BundleStatus::Draft, observed).await?;
        self.events.drain(&mut bundle).await;
        Ok(view_from_parts(&bundle, pricing, avail, Utc::now(), false))
    }

    pub async fn restore_bundle(&self, id: Uuid) -> Result<BundleView> {
        let mut bundle = self.store.fetch(id).await?;
        let from = bundle.status();
        let observed = bundle.updated_at();
        let snapshot = self.require_snapshot(&bundle).await?;
        let pricing = pricing::compute(bundle.discount(), bundle.items());
        let avail = availability::compute(bundle.items(), &snapshot);
        let now = Utc::now();
        bundle.restore(&avail, now)?;
        self.store.commit_transition(&bundle, from, observed).await?;
        self.events.drain(&mut bundle).await;
        Ok(view_from_parts(&bundle, pricing, avail, now, false))
    }

    pub async fn archive_bundle(&self, id: Uuid, reason: String) -> Result<BundleView> {
        let mut bundle = self.store.fetch(id).await?;
        let from = bundle.status();
        let observed = bundle.updated_at();
        bundle.archive(reason)?;
        self.store.commit_transition(&bundle, from, observed).await?;
        self.events.drain(&mut bundle).await;
        Ok(self.read_view(bundle, false).await)
    }

    pub async fn delete_bundle(&self, id: Uuid) -> Result<DeleteResult> {
        let bundle = self.store.fetch(id).await?;
        bundle.ensure_deletable()?;
        self.store.delete_draft(id).await?;
        self.events.publish(&BundleEvent::Deleted { bundle_id: id }).await;
        Ok(DeleteResult { result: "deleted", message: format!("bundle {id} deleted") })
    }

    /// Optimistic reservation at order placement: the increment always lands
    /// and overbooking comes back as a warning flag, never a hard block.
    pub async fn reserve(&self, id: Uuid, req: ReserveRequest) -> Result<reservation::ReservationOutcome> {
        req.validate().map_err(map_validation)?;
        let (reserved_open, cap) = self.store.adjust_reserved_up(id, req.qty).await?;
        let outcome = reservation::reserve_outcome(reserved_open, cap);
        self.events
            .publish(&BundleEvent::Reserved {
                bundle_id: id,
                qty: req.qty,
                reserved_open: outcome.reserved_open,
                is_overbooked: outcome.is_overbooked,
            })
            .await;
        Ok(outcome)
    }

    /// Order cancellation path; the counter floors at zero.
    pub async fn release(&self, id: Uuid, req: ReserveRequest) -> Result<reservation::ReservationOutcome> {
        req.validate().map_err(map_validation)?;
        let (reserved_open, cap) = self.store.adjust_reserved_down(id, req.qty).await?;
        self.events
            .publish(&BundleEvent::Released { bundle_id: id, qty: req.qty, reserved_open })
            .await;
        Ok(reservation::release_outcome(reserved_open, cap))
    }

    /// Coupon application on an order containing bundle-derived lines. The
    /// config is fetched fresh per evaluation.
    pub async fn decide_promo(&self, id: Uuid, req: PromoCheckRequest) -> Result<promo::PromoDecision> {
        req.validate().map_err(map_validation)?;
        let bundle = self.store.fetch(id).await?;
        let config = self.store.get_config().await?;
        let pricing = pricing::compute(bundle.discount(), bundle.items());
        let bundle_pct = pricing::discount_fraction(bundle.discount(), &pricing);
        Ok(promo::decide(
            bundle_pct,
            bundle.allow_external_promos(),
            &config,
            req.proposed_external_discount_pct,
        ))
    }

    pub async fn get_config(&self) -> Result<BundleConfig> {
        self.store.get_config().await
    }

    pub async fn update_config(&self, req: UpdateConfigRequest) -> Result<BundleConfig> {
        req.validate().map_err(map_validation)?;
        let config = BundleConfig {
            site_wide_promos_affect_bundles: req.site_wide_promos_affect_bundles,
            max_cumulative_discount_pct: req.max_cumulative_discount_pct,
            updated_at: Utc::now(),
        };
        config.validate()?;
        let saved = self.store.update_config(&config).await?;
        self.events.publish(&BundleEvent::ConfigUpdated).await;
        Ok(saved)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Fills in missing price snapshots from the live catalog price at add
    /// time; after that the snapshot is the authority for pricing.
    async fn resolve_items(&self, inputs: Vec<BundleItemInput>) -> Result<Vec<BundleItem>> {
        let need_lookup: Vec<Uuid> = inputs
            .iter()
            .filter(|i| i.unit_price_snapshot.is_none())
            .map(|i| i.product_variant_id)
            .collect();
        let snapshot = if need_lookup.is_empty() {
            CatalogSnapshot::new()
        } else {
            self.catalog
                .snapshot(&need_lookup)
                .await
                .map_err(|e| EngineError::validation("items", format!("catalog unavailable: {e}")))?
        };

        inputs
            .into_iter()
            .enumerate()
            .map(|(idx, input)| {
                let unit_price_snapshot = match input.unit_price_snapshot {
                    Some(price) => price,
                    None => snapshot
                        .get(input.product_variant_id)
                        .ok_or(EngineError::VariantNotFound(input.product_variant_id))?
                        .price,
                };
                Ok(BundleItem {
                    product_variant_id: input.product_variant_id,
                    quantity: input.quantity,
                    unit_price_snapshot,
                    display_order: input.display_order.unwrap_or(idx as u32),
                })
            })
            .collect()
    }

    /// Mutating transitions need a real snapshot; a catalog outage aborts the
    /// mutation instead of validating against stale data.
    async fn require_snapshot(&self, bundle: &Bundle) -> Result<CatalogSnapshot> {
        self.catalog
            .snapshot(&bundle.variant_ids())
            .await
            .map_err(|e| EngineError::validation("items", format!("catalog unavailable: {e}")))
    }

    /// Builds the response view. When the catalog is reachable this also
    /// persists engine-driven degradation (ACTIVE observed broken or past its
    /// window) and the recompute timestamp; when it is not, the read degrades
    /// to last-known state flagged stale instead of failing.
    async fn read_view(&self, mut bundle: Bundle, persist_degradation: bool) -> BundleView {
        let now = Utc::now();
        let snapshot = match self.catalog.snapshot(&bundle.variant_ids()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(bundle_id = %bundle.id(), error = %e, "catalog unavailable, serving stale view");
                return stale_view(&bundle, now);
            }
        };
        let avail = availability::compute(bundle.items(), &snapshot);

        if persist_degradation {
            if let Some(kind) = degradation_for(bundle.status(), &avail, bundle.is_expired(now)) {
                let observed = bundle.updated_at();
                let degraded = match kind {
                    Degradation::Broken => {
                        bundle.mark_broken(avail.broken_reason.clone().unwrap_or_default())
                    }
                    Degradation::Expired => bundle.mark_expired(),
                };
                if degraded {
                    // a lost race means a concurrent request already degraded it
                    match self.store.commit_transition(&bundle, BundleStatus::Active, observed).await {
                        Ok(()) => self.events.drain(&mut bundle).await,
                        Err(EngineError::ConcurrencyConflict) => {
                            tracing::debug!(bundle_id = %bundle.id(), "degradation already persisted elsewhere");
                        }
                        Err(e) => tracing::warn!(bundle_id = %bundle.id(), error = %e, "failed to persist degradation"),
                    }
                }
            }
        }
        if let Err(e) = self.store.touch_recomputed(bundle.id(), now).await {
            tracing::warn!(bundle_id = %bundle.id(), error = %e, "failed to record recompute time");
        }
        bundle.record_recompute(now);

        let pricing = pricing::compute(bundle.discount(), bundle.items());
        view_from_parts(&bundle, pricing, avail, now, false)
    }
}

/// What a recompute observation should persist for a bundle. Only ACTIVE
/// degrades; a broken observation wins over an elapsed window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Degradation {
    Broken,
    Expired,
}

fn degradation_for(
    status: BundleStatus,
    avail: &availability::Availability,
    is_expired: bool,
) -> Option<Degradation> {
    if status != BundleStatus::Active {
        return None;
    }
    if avail.is_broken {
        Some(Degradation::Broken)
    } else if is_expired {
        Some(Degradation::Expired)
    } else {
        None
    }
}

/// Derivation without persistence, for list pages.
fn fresh_view(bundle: &Bundle, snapshot: &CatalogSnapshot, now: DateTime<Utc>) -> BundleView {
    let pricing = pricing::compute(bundle.discount(), bundle.items());
    let avail = availability::compute(bundle.items(), snapshot);
    view_from_parts(bundle, pricing, avail, now, false)
}

/// Last-known state when the catalog is unreachable: pricing still derives
/// from the item snapshot, the broken flag keeps its persisted value and the
/// virtual stock is unknown.
fn stale_view(bundle: &Bundle, now: DateTime<Utc>) -> BundleView {
    let pricing = pricing::compute(bundle.discount(), bundle.items());
    let avail = availability::Availability {
        bundle_virtual_stock: 0,
        is_broken: bundle.status() == BundleStatus::Broken,
        broken_reason: bundle.broken_reason().map(str::to_string),
        constraining_variants: vec![],
    };
    view_from_parts(bundle, pricing, avail, now, true)
}

fn view_from_parts(
    bundle: &Bundle,
    pricing: pricing::Pricing,
    avail: availability::Availability,
    now: DateTime<Utc>,
    stale: bool,
) -> BundleView {
    BundleView {
        id: bundle.id(),
        shell_product_id: bundle.shell_product_id(),
        discount: bundle.discount().clone(),
        valid_from: bundle.valid_from(),
        valid_to: bundle.valid_to(),
        bundle_cap: bundle.bundle_cap(),
        bundle_reserved_open: bundle.bundle_reserved_open(),
        is_overbooked: matches!(bundle.bundle_cap(), Some(cap) if bundle.bundle_reserved_open() > cap),
        allow_external_promos: bundle.allow_external_promos(),
        status: bundle.status(),
        broken_reason: bundle.broken_reason().map(str::to_string),
        archive_reason: bundle.archive_reason().map(str::to_string),
        last_recomputed_at: bundle.last_recomputed_at(),
        items: bundle.items().to_vec(),
        component_total: pricing.component_total,
        effective_price: pricing.effective_price,
        total_savings: pricing.total_savings,
        bundle_virtual_stock: avail.bundle_virtual_stock,
        is_expired: bundle.is_expired(now),
        is_broken: avail.is_broken,
        constraining_variants: avail.constraining_variants,
        stale,
        created_at: bundle.created_at(),
        updated_at: bundle.updated_at(),
    }
}

fn map_validation(errors: validator::ValidationErrors) -> EngineError {
    for (field, errs) in errors.field_errors() {
        if let Some(e) = errs.first() {
            let message = e
                .message
                .clone()
                .map(|m| m.to_string())
                .unwrap_or_else(|| e.code.to_string());
            return EngineError::Validation { field, message };
        }
    }
    EngineError::validation("input", "invalid input")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, VariantRecord};

    #[test]
    fn test_discount_input_requires_matching_value() {
        let input = DiscountInput { discount_type: DiscountTypeInput::Fixed, fixed_price: None, percent_off: Some(20) };
        assert!(matches!(input.into_rule(), Err(EngineError::Validation { field: "fixed_price", .. })));

        // the off-type value is ignored, not rejected
        let input = DiscountInput { discount_type: DiscountTypeInput::Percent, fixed_price: Some(999), percent_off: Some(20) };
        assert_eq!(input.into_rule().unwrap(), DiscountRule::Percent { percent_off: 20 });
    }

    fn ok_avail(stock: i64) -> availability::Availability {
        availability::Availability {
            bundle_virtual_stock: stock,
            is_broken: false,
            broken_reason: None,
            constraining_variants: vec![],
        }
    }

    fn broken_avail() -> availability::Availability {
        availability::Availability {
            bundle_virtual_stock: 0,
            is_broken: true,
            broken_reason: Some("unresolved component variants".to_string()),
            constraining_variants: vec![],
        }
    }

    #[test]
    fn test_active_bundle_observed_broken_degrades() {
        assert_eq!(
            degradation_for(BundleStatus::Active, &broken_avail(), false),
            Some(Degradation::Broken)
        );
    }

    #[test]
    fn test_active_bundle_past_window_degrades_to_expired() {
        assert_eq!(
            degradation_for(BundleStatus::Active, &ok_avail(3), true),
            Some(Degradation::Expired)
        );
    }

    #[test]
    fn test_broken_observation_wins_over_elapsed_window() {
        assert_eq!(
            degradation_for(BundleStatus::Active, &broken_avail(), true),
            Some(Degradation::Broken)
        );
    }

    #[test]
    fn test_healthy_active_bundle_does_not_degrade() {
        assert_eq!(degradation_for(BundleStatus::Active, &ok_avail(3), false), None);
    }

    #[test]
    fn test_only_active_degrades_on_observation() {
        for status in [
            BundleStatus::Draft,
            BundleStatus::Broken,
            BundleStatus::Expired,
            BundleStatus::Archived,
        ] {
            assert_eq!(degradation_for(status, &broken_avail(), true), None);
        }
    }

    #[test]
    fn test_stale_view_keeps_last_known_broken_state() {
        let mut bundle = Bundle::create(Uuid::new_v4(), DiscountRule::Fixed { fixed_price: 5000 }).unwrap();
        bundle
            .set_items(vec![BundleItem {
                product_variant_id: Uuid::new_v4(),
                quantity: 1,
                unit_price_snapshot: 6000,
                display_order: 0,
            }])
            .unwrap();
        let view = stale_view(&bundle, Utc::now());
        assert!(view.stale);
        assert!(!view.is_broken);
        // pricing needs no catalog, so it stays fresh even on a stale read
        assert_eq!(view.effective_price, 5000);
        assert_eq!(view.total_savings, 1000);
    }

    #[tokio::test]
    async fn test_fresh_view_recomputes_derived_fields() {
        let variant = Uuid::new_v4();
        let mut catalog = InMemoryCatalog::new();
        catalog.upsert(VariantRecord { id: variant, stock: 8, enabled: true, price: 2750 });

        let mut bundle = Bundle::create(Uuid::new_v4(), DiscountRule::Percent { percent_off: 20 }).unwrap();
        bundle
            .set_items(vec![BundleItem {
                product_variant_id: variant,
                quantity: 2,
                unit_price_snapshot: 2750,
                display_order: 0,
            }])
            .unwrap();

        let snapshot = catalog.snapshot(&bundle.variant_ids()).await.unwrap();
        let view = fresh_view(&bundle, &snapshot, Utc::now());
        assert_eq!(view.component_total, 5500);
        assert_eq!(view.effective_price, 4400);
        assert_eq!(view.bundle_virtual_stock, 4);
        assert!(!view.stale);
    }
}
