//! Bundle Pricing & Lifecycle Engine
//!
//! Domain logic for selling groups of catalog items as a single discounted
//! "bundle" unit.
//!
//! ## Features
//! - Effective price and savings derivation (fixed or percent discount rules)
//! - Stock-derived sellability and broken-bundle detection
//! - Lifecycle state machine (draft, active, broken, expired, archived)
//! - External promotion stacking policy with a cumulative discount ceiling
//! - Sales cap tracking against open reservations
//!
//! The engine itself is plain data in, plain data out: pricing, availability,
//! promotion and reservation decisions are pure functions over an explicit
//! snapshot. Persistence (Postgres) and transport (HTTP) live at the edges.

use thiserror::Error;

pub mod catalog;
pub mod domain;
pub mod engine;
pub mod service;
pub mod store;

pub use domain::bundle::{Bundle, BundleItem, BundleStatus, DiscountRule};
pub use domain::config::{BundleConfig, SiteWidePromoPolicy};
pub use domain::events::BundleEvent;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input or a precondition failure; carries field-level detail.
    #[error("validation failed on {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("bundle not found")]
    BundleNotFound,

    #[error("component variant {0} not found")]
    VariantNotFound(uuid::Uuid),

    /// Transition requested from an illegal source state. Never a silent no-op.
    #[error("illegal transition: {current} -> {requested}")]
    StateTransition { current: String, requested: String },

    /// A guarded update lost a race; the caller should retry or fail the line.
    #[error("concurrent update conflict")]
    ConcurrencyConflict,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
