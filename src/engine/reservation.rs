//! Cap & Reservation Tracker
//!
//! Reservation is optimistic: the increment is always applied and the cap is
//! surfaced as an overbooked warning, never a hard sale block. The counter
//! itself is adjusted atomically by the store; these functions derive the
//! outcome from the post-adjustment value.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct ReservationOutcome {
    pub accepted: bool,
    pub is_overbooked: bool,
    pub reserved_open: i64,
}

fn outcome(reserved_open: i64, cap: Option<i64>) -> ReservationOutcome {
    ReservationOutcome {
        accepted: true,
        is_overbooked: matches!(cap, Some(cap) if reserved_open > cap),
        reserved_open,
    }
}

/// Outcome for a reserve of `qty` that moved the counter to `reserved_open`.
pub fn reserve_outcome(reserved_open: i64, cap: Option<i64>) -> ReservationOutcome {
    outcome(reserved_open, cap)
}

/// Outcome after a release moved the counter to `reserved_open`. The
/// overbooked flag can stay raised while the counter remains above the cap.
pub fn release_outcome(reserved_open: i64, cap: Option<i64>) -> ReservationOutcome {
    outcome(reserved_open, cap)
}

/// New counter value after releasing `qty`, floored at zero so cancellations
/// can never drive the count negative.
pub fn apply_release(reserved_open: i64, qty: i64) -> i64 {
    (reserved_open - qty.max(0)).max(0)
}

/// New counter value after reserving `qty`. Mirrors the SQL-side increment
/// for in-memory callers and tests.
pub fn apply_reserve(reserved_open: i64, qty: i64) -> i64 {
    reserved_open.saturating_add(qty.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncapped_never_overbooks() {
        let open = apply_reserve(999, 5);
        let outcome = reserve_outcome(open, None);
        assert!(outcome.accepted);
        assert!(!outcome.is_overbooked);
        assert_eq!(outcome.reserved_open, 1004);
    }

    #[test]
    fn test_overbooking_is_accepted_and_flagged() {
        // cap 10, 9 open, reserve 2: optimistic policy applies the increment
        let open = apply_reserve(9, 2);
        let outcome = reserve_outcome(open, Some(10));
        assert!(outcome.accepted);
        assert!(outcome.is_overbooked);
        assert_eq!(outcome.reserved_open, 11);
    }

    #[test]
    fn test_at_cap_is_not_overbooked() {
        let open = apply_reserve(9, 1);
        let outcome = reserve_outcome(open, Some(10));
        assert!(outcome.accepted);
        assert!(!outcome.is_overbooked);
    }

    #[test]
    fn test_release_outcome_tracks_cap() {
        // still above the cap after a partial release
        let open = apply_release(12, 1);
        let outcome = release_outcome(open, Some(10));
        assert!(outcome.is_overbooked);
        assert_eq!(outcome.reserved_open, 11);

        // back under the cap clears the flag
        let open = apply_release(11, 3);
        let outcome = release_outcome(open, Some(10));
        assert!(!outcome.is_overbooked);
        assert_eq!(outcome.reserved_open, 8);
    }

    #[test]
    fn test_release_floors_at_zero() {
        assert_eq!(apply_release(3, 5), 0);
        assert_eq!(apply_release(5, 3), 2);
        assert_eq!(apply_release(0, 1), 0);
    }

    #[test]
    fn test_negative_quantities_are_inert() {
        assert_eq!(apply_reserve(4, -2), 4);
        assert_eq!(apply_release(4, -2), 4);
    }
}
