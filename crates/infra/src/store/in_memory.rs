use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use florist_core::{AggregateRoot, Entity, EventId, OrderId, ProductId, StockItemId};
use florist_events::Event;
use florist_inventory::{StockCategory, StockItem};
use florist_orders::{Order, OrderState};
use florist_products::Product;

use super::{Store, StoreTx, check_version};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
struct Tables {
    stock_items: BTreeMap<StockItemId, StockItem>,
    products: HashMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    events: BTreeMap<EventId, Event>,
}

/// In-memory store.
///
/// Intended for tests/dev. A transaction holds the lock for its whole
/// lifetime, which makes transactions serial, and works on a private copy
/// that replaces the shared tables only on commit.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    type Tx<'a> = InMemoryTx<'a>;

    fn begin(&self) -> StoreResult<InMemoryTx<'_>> {
        let guard = self
            .tables
            .lock()
            .map_err(|_| StoreError::backend("begin", "lock poisoned"))?;
        let work = guard.clone();
        Ok(InMemoryTx { guard, work })
    }
}

/// Transaction over [`InMemoryStore`]. Dropping it discards `work`.
pub struct InMemoryTx<'a> {
    guard: MutexGuard<'a, Tables>,
    work: Tables,
}

impl StoreTx for InMemoryTx<'_> {
    fn load_stock_item(&mut self, id: &StockItemId) -> StoreResult<Option<StockItem>> {
        Ok(self.work.stock_items.get(id).cloned())
    }

    fn read_stock_items(&mut self, ids: &[StockItemId]) -> StoreResult<Vec<StockItem>> {
        let mut items: Vec<StockItem> = ids
            .iter()
            .filter_map(|id| self.work.stock_items.get(id).cloned())
            .collect();
        items.sort_by(|a, b| a.id().cmp(b.id()));
        items.dedup_by(|a, b| a.id() == b.id());
        Ok(items)
    }

    fn list_stock_items(&mut self, category: Option<StockCategory>) -> StoreResult<Vec<StockItem>> {
        Ok(self
            .work
            .stock_items
            .values()
            .filter(|i| category.is_none_or(|c| i.category() == c))
            .cloned()
            .collect())
    }

    fn save_stock_item(&mut self, item: &StockItem) -> StoreResult<()> {
        self.work.stock_items.insert(item.id().clone(), item.clone());
        Ok(())
    }

    fn load_product(&mut self, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.work.products.get(&id).cloned())
    }

    fn save_product(&mut self, product: &Product) -> StoreResult<()> {
        self.work.products.insert(*product.id(), product.clone());
        Ok(())
    }

    fn load_order(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.work.orders.get(&id).cloned())
    }

    fn list_orders(&mut self, states: Option<&[OrderState]>) -> StoreResult<Vec<Order>> {
        Ok(self
            .work
            .orders
            .values()
            .filter(|o| states.is_none_or(|s| s.contains(&o.state())))
            .cloned()
            .collect())
    }

    fn save_order(&mut self, order: &Order) -> StoreResult<()> {
        let stored = self.work.orders.get(order.id()).map(|o| o.version());
        check_version(order, stored, "save_order")?;
        self.work.orders.insert(*order.id(), order.clone());
        Ok(())
    }

    fn delete_order(&mut self, id: OrderId) -> StoreResult<bool> {
        Ok(self.work.orders.remove(&id).is_some())
    }

    fn load_event(&mut self, id: EventId) -> StoreResult<Option<Event>> {
        Ok(self.work.events.get(&id).cloned())
    }

    fn list_events(&mut self) -> StoreResult<Vec<Event>> {
        Ok(self.work.events.values().cloned().collect())
    }

    fn save_event(&mut self, event: &Event) -> StoreResult<()> {
        let stored = self.work.events.get(event.id()).map(|e| e.version());
        check_version(event, stored, "save_event")?;
        self.work.events.insert(*event.id(), event.clone());
        Ok(())
    }

    fn commit(mut self) -> StoreResult<()> {
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }
}
