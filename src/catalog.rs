//! Catalog collaborator
//!
//! The engine treats the product catalog as an external read-only source of
//! per-variant stock, enabled state and price. Lookups may fail or time out;
//! callers degrade to last-known availability rather than failing reads.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug)]
pub struct VariantRecord {
    pub id: Uuid,
    pub stock: i64,
    pub enabled: bool,
    /// Live catalog price in minor units. Pricing uses the per-item snapshot
    /// captured at add time; this is carried for display comparison only.
    pub price: i64,
}

/// Point-in-time view of the variants a bundle references.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    variants: HashMap<Uuid, VariantRecord>,
}

impl CatalogSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: VariantRecord) {
        self.variants.insert(record.id, record);
    }

    pub fn get(&self, id: Uuid) -> Option<&VariantRecord> {
        self.variants.get(&id)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

impl FromIterator<VariantRecord> for CatalogSnapshot {
    fn from_iter<T: IntoIterator<Item = VariantRecord>>(iter: T) -> Self {
        let mut snapshot = Self::new();
        for record in iter {
            snapshot.insert(record);
        }
        snapshot
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("catalog lookup timed out")]
    Timeout,
}

#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Fetches a consistent snapshot for the given variant ids. Variants the
    /// catalog no longer knows are simply absent from the snapshot.
    async fn snapshot(&self, variant_ids: &[Uuid]) -> Result<CatalogSnapshot, CatalogError>;
}

/// In-memory catalog used by tests and local demos.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    variants: HashMap<Uuid, VariantRecord>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, record: VariantRecord) {
        self.variants.insert(record.id, record);
    }

    pub fn remove(&mut self, id: Uuid) {
        self.variants.remove(&id);
    }
}

#[async_trait]
impl CatalogReader for InMemoryCatalog {
    async fn snapshot(&self, variant_ids: &[Uuid]) -> Result<CatalogSnapshot, CatalogError> {
        Ok(variant_ids
            .iter()
            .filter_map(|id| self.variants.get(id))
            .copied()
            .collect())
    }
}

/// Catalog reader over the shared Postgres instance the catalog service
/// writes to. Disabled variants are returned as-is; deleted ones are simply
/// absent, and both break a bundle downstream.
#[derive(Clone)]
pub struct PgCatalog {
    pool: sqlx::PgPool,
}

impl PgCatalog {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogReader for PgCatalog {
    async fn snapshot(&self, variant_ids: &[Uuid]) -> Result<CatalogSnapshot, CatalogError> {
        let rows: Vec<(Uuid, i64, bool, i64)> = sqlx::query_as(
            "SELECT id, stock, enabled, price FROM catalog_variants WHERE id = ANY($1)",
        )
        .bind(variant_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(id, stock, enabled, price)| VariantRecord { id, stock, enabled, price })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_omits_unknown_variants() {
        let known = Uuid::new_v4();
        let unknown = Uuid::new_v4();
        let mut catalog = InMemoryCatalog::new();
        catalog.upsert(VariantRecord { id: known, stock: 3, enabled: true, price: 100 });

        let snap = catalog.snapshot(&[known, unknown]).await.unwrap();
        assert_eq!(snap.len(), 1);
        assert!(snap.get(known).is_some());
        assert!(snap.get(unknown).is_none());
    }
}
