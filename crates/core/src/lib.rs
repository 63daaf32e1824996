//! `florist-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the stock ledger,
//! recipe catalog, orders and events (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, Shortage};
pub use id::{CustomerId, EventId, EventLineId, OrderId, OrderLineId, ProductId, StockItemId};
pub use money::Money;
pub use value_object::ValueObject;
