//! Global bundle policy record
//!
//! A single versioned record fetched per evaluation; never held as a mutable
//! process-wide singleton, so concurrent readers cannot observe a
//! half-updated policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Whether site-wide promotions may touch bundle-derived order lines at all.
/// `Exclude` is the safety default and cannot be overridden upward by a
/// bundle-level setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteWidePromoPolicy {
    #[default]
    Exclude,
    Allow,
}

impl SiteWidePromoPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclude => "exclude",
            Self::Allow => "allow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exclude" => Some(Self::Exclude),
            "allow" => Some(Self::Allow),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleConfig {
    pub site_wide_promos_affect_bundles: SiteWidePromoPolicy,
    /// Ceiling on bundle discount + external promotion discount, as a
    /// fraction in [0, 1].
    pub max_cumulative_discount_pct: f64,
    pub updated_at: DateTime<Utc>,
}

impl BundleConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_cumulative_discount_pct) {
            return Err(EngineError::validation(
                "max_cumulative_discount_pct",
                "cumulative discount ceiling must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            site_wide_promos_affect_bundles: SiteWidePromoPolicy::Exclude,
            max_cumulative_discount_pct: 0.5,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_bounds() {
        let mut cfg = BundleConfig::default();
        cfg.validate().unwrap();
        cfg.max_cumulative_discount_pct = 1.2;
        assert!(cfg.validate().is_err());
        cfg.max_cumulative_discount_pct = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_policy_round_trip() {
        assert_eq!(SiteWidePromoPolicy::parse("allow"), Some(SiteWidePromoPolicy::Allow));
        assert_eq!(SiteWidePromoPolicy::parse("exclude"), Some(SiteWidePromoPolicy::Exclude));
        assert_eq!(SiteWidePromoPolicy::parse("bogus"), None);
    }
}
