use serde::{Deserialize, Serialize};

use florist_core::StockItemId;

use crate::item::ReservationPool;

/// A committed change to one stock item's counters.
///
/// Engines return these so callers can show what was reserved, released,
/// consumed or returned by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockMovement {
    Reserved {
        item_id: StockItemId,
        pool: ReservationPool,
        quantity: i64,
    },
    Released {
        item_id: StockItemId,
        pool: ReservationPool,
        quantity: i64,
    },
    /// `used` left the shop; `released` is the reservation that was dropped
    /// (`released - used` units flowed back into availability).
    Consumed {
        item_id: StockItemId,
        pool: ReservationPool,
        used: i64,
        released: i64,
    },
    Returned {
        item_id: StockItemId,
        quantity: i64,
    },
    Received {
        item_id: StockItemId,
        quantity: i64,
    },
    WrittenOff {
        item_id: StockItemId,
        quantity: i64,
    },
}

impl StockMovement {
    pub fn item_id(&self) -> &StockItemId {
        match self {
            StockMovement::Reserved { item_id, .. }
            | StockMovement::Released { item_id, .. }
            | StockMovement::Consumed { item_id, .. }
            | StockMovement::Returned { item_id, .. }
            | StockMovement::Received { item_id, .. }
            | StockMovement::WrittenOff { item_id, .. } => item_id,
        }
    }

    /// Net change applied to `stock_total`.
    pub fn stock_total_delta(&self) -> i64 {
        match self {
            StockMovement::Consumed { used, .. } => -used,
            StockMovement::WrittenOff { quantity, .. } => -quantity,
            StockMovement::Returned { quantity, .. } | StockMovement::Received { quantity, .. } => {
                *quantity
            }
            StockMovement::Reserved { .. } | StockMovement::Released { .. } => 0,
        }
    }
}
