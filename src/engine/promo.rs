//! Promotion Guard
//!
//! Decides whether an externally-issued promotion code may additionally
//! discount a bundle's order lines, and clamps the external contribution to
//! the cumulative discount ceiling. Stateless: a function of the global
//! policy, the bundle's opt-in flag and its own computed discount.

use serde::Serialize;

use crate::domain::config::{BundleConfig, SiteWidePromoPolicy};

#[derive(Clone, Copy, Debug, Serialize)]
pub struct PromoDecision {
    pub allowed: bool,
    /// Bundle discount + (possibly clamped) external discount, as a fraction.
    pub effective_combined_discount_pct: f64,
    pub clamped: bool,
}

/// `bundle_discount_pct` is the bundle's own discount as a fraction in
/// [0, 1] (see `pricing::discount_fraction`). The global `Exclude` policy
/// wins unconditionally; a bundle-level opt-in can only narrow `Allow`,
/// never widen `Exclude`.
pub fn decide(
    bundle_discount_pct: f64,
    allow_external_promos: bool,
    config: &BundleConfig,
    proposed_external_pct: f64,
) -> PromoDecision {
    let bundle_pct = bundle_discount_pct.clamp(0.0, 1.0);

    if config.site_wide_promos_affect_bundles == SiteWidePromoPolicy::Exclude
        || !allow_external_promos
    {
        return PromoDecision {
            allowed: false,
            effective_combined_discount_pct: bundle_pct,
            clamped: false,
        };
    }

    let proposed = proposed_external_pct.clamp(0.0, 1.0);
    let ceiling = config.max_cumulative_discount_pct;
    // The bundle's own discount is immovable: when it already meets the
    // ceiling, the external contribution clamps to zero.
    let headroom = (ceiling - bundle_pct).max(0.0);
    let granted = proposed.min(headroom);

    PromoDecision {
        allowed: true,
        effective_combined_discount_pct: bundle_pct + granted,
        clamped: granted < proposed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config(policy: SiteWidePromoPolicy, ceiling: f64) -> BundleConfig {
        BundleConfig {
            site_wide_promos_affect_bundles: policy,
            max_cumulative_discount_pct: ceiling,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_global_exclude_beats_bundle_opt_in() {
        let cfg = config(SiteWidePromoPolicy::Exclude, 0.5);
        for opt_in in [true, false] {
            let d = decide(0.2, opt_in, &cfg, 0.1);
            assert!(!d.allowed);
            assert!(!d.clamped);
        }
    }

    #[test]
    fn test_bundle_can_opt_out_under_allow() {
        let cfg = config(SiteWidePromoPolicy::Allow, 0.5);
        let d = decide(0.2, false, &cfg, 0.1);
        assert!(!d.allowed);
    }

    #[test]
    fn test_within_ceiling_passes_unclamped() {
        let cfg = config(SiteWidePromoPolicy::Allow, 0.5);
        let d = decide(0.2, true, &cfg, 0.1);
        assert!(d.allowed);
        assert!(!d.clamped);
        assert!((d.effective_combined_discount_pct - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_clamps_external_contribution_to_ceiling() {
        let cfg = config(SiteWidePromoPolicy::Allow, 0.5);
        let d = decide(0.2, true, &cfg, 0.4);
        assert!(d.allowed);
        assert!(d.clamped);
        assert!((d.effective_combined_discount_pct - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bundle_discount_already_at_ceiling() {
        let cfg = config(SiteWidePromoPolicy::Allow, 0.5);
        let d = decide(0.6, true, &cfg, 0.1);
        assert!(d.allowed);
        assert!(d.clamped);
        // external contribution clamps to zero, the bundle's own discount stays
        assert!((d.effective_combined_discount_pct - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_and_side_effect_free() {
        let cfg = config(SiteWidePromoPolicy::Allow, 0.5);
        let a = decide(0.2, true, &cfg, 0.4);
        let b = decide(0.2, true, &cfg, 0.4);
        assert_eq!(a.allowed, b.allowed);
        assert_eq!(a.clamped, b.clamped);
        assert_eq!(a.effective_combined_discount_pct, b.effective_combined_discount_pct);
    }
}
