//! Stock ledger domain module.
//!
//! This crate contains the counter arithmetic for stockable items (flowers,
//! containers, event props), implemented purely as deterministic domain logic
//! (no IO, no storage). The infrastructure layer loads a row, applies one of
//! these operations and writes it back inside a transaction.

pub mod item;
pub mod movement;

pub use item::{NewStockItem, ReservationPool, StockCategory, StockCounters, StockItem};
pub use movement::StockMovement;
