//! Infrastructure layer: persistence, the reservation engine services,
//! configuration and background workers.

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod service;
pub mod store;
pub mod workers;


pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, FloristConfig};
pub use error::{ServiceError, ServiceResult, StoreError, StoreResult};
pub use ledger::LedgerOp;
pub use service::{
    AddEventLine, CreateOrder, EventOutcome, Florist, OrderInputs, OrderOutcome, ReclassifyReport,
    Reclassified, ReservationDrift,
};
pub use store::{InMemoryStore, PostgresStore, Store, StoreTx};
pub use workers::{ReclassifyWorker, WorkerHandle};
