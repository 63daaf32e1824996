//! Persistence port.
//!
//! Every engine operation runs inside one [`StoreTx`]. A transaction is
//! serialisable: concurrent transactions behave as if they ran one after the
//! other, so two racing reservations can never jointly overdraw an item.
//! Dropping a transaction without calling [`StoreTx::commit`] rolls it back.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

use florist_core::{AggregateRoot, EventId, ExpectedVersion, OrderId, ProductId, StockItemId};
use florist_events::Event;
use florist_inventory::{StockCategory, StockItem};
use florist_orders::{Order, OrderState};
use florist_products::Product;

use crate::error::{StoreError, StoreResult};

/// Transaction factory.
pub trait Store: Send + Sync {
    type Tx<'a>: StoreTx
    where
        Self: 'a;

    fn begin(&self) -> StoreResult<Self::Tx<'_>>;
}

/// One serialisable unit of work.
///
/// Loads return the committed state as seen by this transaction (including
/// its own earlier writes). Stock items read through `load_stock_item` are
/// locked until the transaction ends.
pub trait StoreTx {
    /// Load one stock item for update.
    fn load_stock_item(&mut self, id: &StockItemId) -> StoreResult<Option<StockItem>>;
    /// Items among `ids` that exist, ordered by id, read without row locks.
    fn read_stock_items(&mut self, ids: &[StockItemId]) -> StoreResult<Vec<StockItem>>;
    /// Items ordered by id, optionally restricted to one category.
    fn list_stock_items(&mut self, category: Option<StockCategory>) -> StoreResult<Vec<StockItem>>;
    /// Insert or update.
    fn save_stock_item(&mut self, item: &StockItem) -> StoreResult<()>;

    fn load_product(&mut self, id: ProductId) -> StoreResult<Option<Product>>;
    /// Insert or update; the recipe is replaced wholesale.
    fn save_product(&mut self, product: &Product) -> StoreResult<()>;

    fn load_order(&mut self, id: OrderId) -> StoreResult<Option<Order>>;
    /// Orders in any of `states`, or every order when `states` is `None`.
    fn list_orders(&mut self, states: Option<&[OrderState]>) -> StoreResult<Vec<Order>>;
    /// Insert or update; lines are replaced wholesale.
    fn save_order(&mut self, order: &Order) -> StoreResult<()>;
    /// Delete an order and its lines. Returns whether it existed.
    fn delete_order(&mut self, id: OrderId) -> StoreResult<bool>;

    fn load_event(&mut self, id: EventId) -> StoreResult<Option<Event>>;
    fn list_events(&mut self) -> StoreResult<Vec<Event>>;
    /// Insert or update; lines are replaced wholesale.
    fn save_event(&mut self, event: &Event) -> StoreResult<()>;

    fn commit(self) -> StoreResult<()>
    where
        Self: Sized;
}

/// Saving an aggregate at version `v` expects the stored row at `v - 1`, or
/// no row at all for a freshly created aggregate (version 0).
pub(crate) fn check_version<A: AggregateRoot>(
    aggregate: &A,
    stored: Option<u64>,
    operation: &'static str,
) -> StoreResult<()> {
    let expected = match aggregate.version() {
        0 => ExpectedVersion::New,
        v => ExpectedVersion::Exact(v - 1),
    };
    expected
        .check(stored)
        .map_err(|_| StoreError::SerializationConflict(operation))
}
