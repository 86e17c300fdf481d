//! Domain module
pub mod bundle;
pub mod config;
pub mod events;

pub use bundle::{Bundle, BundleItem, BundleStatus, DiscountRule};
pub use config::{BundleConfig, SiteWidePromoPolicy};
pub use events::BundleEvent;
