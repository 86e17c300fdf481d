//! Postgres persistence for bundles and the global bundle config
//!
//! Status transitions are guarded updates matching the expected source
//! status, and the reservation counter is adjusted in a single UPDATE, so
//! concurrent writers can never lose increments or commit a transition that
//! another request already invalidated.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::bundle::{Bundle, BundleItem, BundleStatus, DiscountRule};
use crate::domain::config::{BundleConfig, SiteWidePromoPolicy};
use crate::{EngineError, Result};

#[derive(Debug, sqlx::FromRow)]
struct BundleRow {
    id: Uuid,
    shell_product_id: Uuid,
    discount_type: String,
    fixed_price: Option<i64>,
    percent_off: Option<i16>,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    bundle_cap: Option<i64>,
    bundle_reserved_open: i64,
    allow_external_promos: bool,
    status: String,
    broken_reason: Option<String>,
    archive_reason: Option<String>,
    last_recomputed_at: Option<DateTime<Utc>>,
    items: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BundleRow> for Bundle {
    type Error = EngineError;

    fn try_from(row: BundleRow) -> Result<Bundle> {
        let discount = match row.discount_type.as_str() {
            "fixed" => DiscountRule::Fixed {
                fixed_price: row.fixed_price.ok_or_else(|| corrupt(row.id, "missing fixed_price"))?,
            },
            "percent" => DiscountRule::Percent {
                percent_off: row
                    .percent_off
                    .and_then(|p| u8::try_from(p).ok())
                    .ok_or_else(|| corrupt(row.id, "missing or invalid percent_off"))?,
            },
            other => return Err(corrupt(row.id, &format!("unknown discount_type {other}"))),
        };
        let status = BundleStatus::parse(&row.status)
            .ok_or_else(|| corrupt(row.id, &format!("unknown status {}", row.status)))?;
        let items: Vec<BundleItem> = serde_json::from_value(row.items)
            .map_err(|e| corrupt(row.id, &format!("bad items payload: {e}")))?;

        Ok(Bundle::rehydrate(
            row.id,
            row.shell_product_id,
            discount,
            row.valid_from,
            row.valid_to,
            row.bundle_cap,
            row.bundle_reserved_open,
            row.allow_external_promos,
            status,
            row.broken_reason,
            row.archive_reason,
            row.last_recomputed_at,
            items,
            row.created_at,
            row.updated_at,
        ))
    }
}

fn corrupt(id: Uuid, detail: &str) -> EngineError {
    EngineError::Storage(format!("corrupt bundle record {id}: {detail}"))
}

fn discount_columns(rule: &DiscountRule) -> (&'static str, Option<i64>, Option<i16>) {
    match rule {
        DiscountRule::Fixed { fixed_price } => ("fixed", Some(*fixed_price), None),
        DiscountRule::Percent { percent_off } => ("percent", None, Some(i16::from(*percent_off))),
    }
}

fn items_json(items: &[BundleItem]) -> Result<serde_json::Value> {
    serde_json::to_value(items).map_err(|e| EngineError::Storage(format!("encode items: {e}")))
}

/// Whitelisted sort orders for bundle listings.
#[derive(Clone, Copy, Debug, Default)]
pub enum BundleSort {
    #[default]
    CreatedDesc,
    UpdatedDesc,
    Status,
}

impl BundleSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created_at" => Some(Self::CreatedDesc),
            "updated_at" => Some(Self::UpdatedDesc),
            "status" => Some(Self::Status),
            _ => None,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            Self::CreatedDesc => "created_at DESC",
            Self::UpdatedDesc => "updated_at DESC",
            Self::Status => "status ASC, created_at DESC",
        }
    }
}

#[derive(Clone)]
pub struct BundleStore {
    pool: PgPool,
}

impl BundleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, bundle: &Bundle) -> Result<()> {
        let (discount_type, fixed_price, percent_off) = discount_columns(bundle.discount());
        sqlx::query(
            "INSERT INTO bundles (id, shell_product_id, discount_type, fixed_price, percent_off, \
             valid_from, valid_to, bundle_cap, bundle_reserved_open, allow_external_promos, status, \
             broken_reason, archive_reason, last_recomputed_at, items, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(bundle.id())
        .bind(bundle.shell_product_id())
        .bind(discount_type)
        .bind(fixed_price)
        .bind(percent_off)
        .bind(bundle.valid_from())
        .bind(bundle.valid_to())
        .bind(bundle.bundle_cap())
        .bind(bundle.bundle_reserved_open())
        .bind(bundle.allow_external_promos())
        .bind(bundle.status().as_str())
        .bind(bundle.broken_reason())
        .bind(bundle.archive_reason())
        .bind(bundle.last_recomputed_at())
        .bind(items_json(bundle.items())?)
        .bind(bundle.created_at())
        .bind(bundle.updated_at())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Bundle> {
        sqlx::query_as::<_, BundleRow>("SELECT * FROM bundles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::BundleNotFound)?
            .try_into()
    }

    pub async fn list(
        &self,
        status: Option<BundleStatus>,
        sort: BundleSort,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Bundle>, i64)> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(per_page);
        let rows = sqlx::query_as::<_, BundleRow>(&format!(
            "SELECT * FROM bundles WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY {} LIMIT $2 OFFSET $3",
            sort.order_by()
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(i64::from(per_page))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bundles WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;

        let bundles = rows.into_iter().map(Bundle::try_from).collect::<Result<Vec<_>>>()?;
        Ok((bundles, total.0))
    }

    /// Persists the editable fields (items, rule, window, cap, opt-in).
    /// Guarded against ARCHIVED so a racing archive cannot be edited over.
    pub async fn save_editable(&self, bundle: &Bundle) -> Result<()> {
        let (discount_type, fixed_price, percent_off) = discount_columns(bundle.discount());
        let done = sqlx::query(
            "UPDATE bundles SET discount_type = $2, fixed_price = $3, percent_off = $4, \
             valid_from = $5, valid_to = $6, bundle_cap = $7, allow_external_promos = $8, \
             items = $9, updated_at = $10 WHERE id = $1 AND status <> 'ARCHIVED'",
        )
        .bind(bundle.id())
        .bind(discount_type)
        .bind(fixed_price)
        .bind(percent_off)
        .bind(bundle.valid_from())
        .bind(bundle.valid_to())
        .bind(bundle.bundle_cap())
        .bind(bundle.allow_external_promos())
        .bind(items_json(bundle.items())?)
        .bind(bundle.updated_at())
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict);
        }
        Ok(())
    }

    /// Commits a status transition already validated on the aggregate. The
    /// guard matches both the expected source status and the `updated_at`
    /// observed at fetch time; every content edit touches `updated_at`, so an
    /// edit interleaved between validation and commit misses the predicate
    /// and surfaces as a conflict instead of activating stale validation.
    pub async fn commit_transition(
        &self,
        bundle: &Bundle,
        expected_from: BundleStatus,
        observed_updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let done = sqlx::query(
            "UPDATE bundles SET status = $3, broken_reason = $4, archive_reason = $5, \
             updated_at = $6 WHERE id = $1 AND status = $2 AND updated_at = $7",
        )
        .bind(bundle.id())
        .bind(expected_from.as_str())
        .bind(bundle.status().as_str())
        .bind(bundle.broken_reason())
        .bind(bundle.archive_reason())
        .bind(bundle.updated_at())
        .bind(observed_updated_at)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict);
        }
        Ok(())
    }

    pub async fn touch_recomputed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE bundles SET last_recomputed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomic reservation increment; returns the counter after the update
    /// plus the cap so the caller can derive the overbooked flag.
    pub async fn adjust_reserved_up(&self, id: Uuid, qty: i64) -> Result<(i64, Option<i64>)> {
        let row: Option<(i64, Option<i64>)> = sqlx::query_as(
            "UPDATE bundles SET bundle_reserved_open = bundle_reserved_open + $2 \
             WHERE id = $1 RETURNING bundle_reserved_open, bundle_cap",
        )
        .bind(id)
        .bind(qty)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(EngineError::BundleNotFound)
    }

    /// Atomic reservation decrement, floored at zero in SQL.
    pub async fn adjust_reserved_down(&self, id: Uuid, qty: i64) -> Result<(i64, Option<i64>)> {
        let row: Option<(i64, Option<i64>)> = sqlx::query_as(
            "UPDATE bundles SET bundle_reserved_open = GREATEST(bundle_reserved_open - $2, 0) \
             WHERE id = $1 RETURNING bundle_reserved_open, bundle_cap",
        )
        .bind(id)
        .bind(qty)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(EngineError::BundleNotFound)
    }

    /// Deletes a draft. The status guard means a concurrent publish wins the
    /// race and the delete reports a conflict.
    pub async fn delete_draft(&self, id: Uuid) -> Result<()> {
        let done = sqlx::query("DELETE FROM bundles WHERE id = $1 AND status = 'DRAFT'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict);
        }
        Ok(())
    }

    pub async fn get_config(&self) -> Result<BundleConfig> {
        let row: Option<(String, f64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT site_wide_promos_affect_bundles, max_cumulative_discount_pct, updated_at \
             FROM bundle_config WHERE id = TRUE",
        )
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((policy, max_pct, updated_at)) => Ok(BundleConfig {
                site_wide_promos_affect_bundles: SiteWidePromoPolicy::parse(&policy)
                    .ok_or_else(|| EngineError::Storage(format!("unknown promo policy {policy}")))?,
                max_cumulative_discount_pct: max_pct,
                updated_at,
            }),
            None => Ok(BundleConfig::default()),
        }
    }

    pub async fn update_config(&self, config: &BundleConfig) -> Result<BundleConfig> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO bundle_config (id, site_wide_promos_affect_bundles, max_cumulative_discount_pct, updated_at) \
             VALUES (TRUE, $1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET site_wide_promos_affect_bundles = $1, \
             max_cumulative_discount_pct = $2, updated_at = $3",
        )
        .bind(config.site_wide_promos_affect_bundles.as_str())
        .bind(config.max_cumulative_discount_pct)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(BundleConfig { updated_at: now, ..config.clone() })
    }
}
