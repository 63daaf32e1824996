//! Orders domain module.
//!
//! Customer orders, their captured input lines and the order state machine,
//! implemented purely as deterministic domain logic (no IO, no storage). The
//! ledger side effects each transition requires are carried out by the
//! infrastructure engines.

pub mod order;
pub mod state;

pub use order::{CapturedInput, LineConsumption, NewOrder, Order, OrderLine};
pub use state::{OrderState, OrderTransition, RECLASSIFY_LOOKBACK_DAYS};
