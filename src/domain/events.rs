//! Domain events

use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BundleEvent {
    Created { bundle_id: Uuid },
    Published { bundle_id: Uuid },
    Broken { bundle_id: Uuid, reason: String },
    Expired { bundle_id: Uuid },
    Restored { bundle_id: Uuid },
    Archived { bundle_id: Uuid, reason: String },
    Deleted { bundle_id: Uuid },
    Reserved { bundle_id: Uuid, qty: i64, reserved_open: i64, is_overbooked: bool },
    Released { bundle_id: Uuid, qty: i64, reserved_open: i64 },
    ConfigUpdated,
}
