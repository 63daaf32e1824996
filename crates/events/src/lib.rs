//! Events domain: large multi-line quotations (weddings, corporate
//! installations) and their quote / confirm / deliver / return lifecycle.
//!
//! Ledger-backed lines reserve against `reserved_for_events`; product and
//! free-form lines only contribute cost.

pub mod event;
pub mod line;
pub mod state;

pub use event::{Event, EventPatch, EventStatus, LineReturn, NewEvent};
pub use line::{EventLine, EventLineKind, EventLineRow, NewEventLine};
pub use state::{EventState, EventStockStatus, EventTransition};
