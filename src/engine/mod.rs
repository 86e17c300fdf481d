//! Engine module
//!
//! Pure or near-pure functions over explicit snapshots. Nothing in here
//! performs I/O or reaches into global state.

pub mod availability;
pub mod pricing;
pub mod promo;
pub mod reservation;

pub use availability::Availability;
pub use pricing::Pricing;
pub use promo::PromoDecision;
pub use reservation::ReservationOutcome;
