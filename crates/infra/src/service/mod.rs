//! Application services: the operations callers (HTTP handlers, importers,
//! schedulers) run against the core.
//!
//! Each public operation runs in exactly one store transaction. Domain
//! decisions are made by the aggregates; the services load them, turn their
//! decisions into ledger batches, and persist the result. Any error drops the
//! transaction, so an operation commits whole or not at all.

pub mod audit;
pub mod catalog;
pub mod events;
pub mod orders;
pub mod reclassify;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use florist_core::{DomainError, Entity, EventId, OrderId, StockItemId};
use florist_events::Event;
use florist_inventory::{StockItem, StockMovement};
use florist_orders::Order;

use crate::clock::{Clock, SystemClock};
use crate::config::FloristConfig;
use crate::error::ServiceResult;
use crate::store::{Store, StoreTx};

pub use audit::ReservationDrift;
pub use events::AddEventLine;
pub use orders::{CreateOrder, OrderInputs};
pub use reclassify::{ReclassifyReport, Reclassified};

/// An order after an operation, with the ledger movements it caused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderOutcome {
    pub order: Order,
    pub movements: Vec<StockMovement>,
}

/// An event after an operation, with the ledger movements it caused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventOutcome {
    pub event: Event,
    pub movements: Vec<StockMovement>,
}

/// Entry point to the florist core over a [`Store`].
pub struct Florist<S> {
    store: S,
    clock: Arc<dyn Clock>,
    lookback_days: u64,
}

impl<S: Store> Florist<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            lookback_days: FloristConfig::default().reclassify_lookback_days,
        }
    }

    /// Apply the tunables of `config`.
    pub fn configured(mut self, config: &FloristConfig) -> Self {
        self.lookback_days = config.reclassify_lookback_days;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `op` in a fresh transaction and commit it if `op` succeeds.
    pub(crate) fn in_tx<'s, R>(
        &'s self,
        op: impl FnOnce(&mut S::Tx<'s>) -> ServiceResult<R>,
    ) -> ServiceResult<R> {
        let mut tx = self.store.begin()?;
        let out = op(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }
}

pub(crate) fn require_stock_item<T: StoreTx>(tx: &mut T, id: &StockItemId) -> ServiceResult<StockItem> {
    tx.load_stock_item(id)?
        .ok_or_else(|| DomainError::not_found(StockItem::KIND, id).into())
}

/// Current rows for `ids`, keyed by id, without locking them. Row locks are
/// left to the ledger, which takes them in ascending item-id order.
pub(crate) fn read_stock_items<'a, T: StoreTx>(
    tx: &mut T,
    ids: impl IntoIterator<Item = &'a StockItemId>,
) -> ServiceResult<BTreeMap<StockItemId, StockItem>> {
    let wanted: BTreeSet<&StockItemId> = ids.into_iter().collect();
    let keys: Vec<StockItemId> = wanted.iter().map(|id| (*id).clone()).collect();
    let found: BTreeMap<StockItemId, StockItem> = tx
        .read_stock_items(&keys)?
        .into_iter()
        .map(|item| (item.id().clone(), item))
        .collect();
    if let Some(missing) = keys.iter().find(|id| !found.contains_key(*id)) {
        return Err(DomainError::not_found(StockItem::KIND, missing).into());
    }
    Ok(found)
}

pub(crate) fn require_order<T: StoreTx>(tx: &mut T, id: OrderId) -> ServiceResult<Order> {
    tx.load_order(id)?
        .ok_or_else(|| DomainError::not_found(Order::KIND, id).into())
}

pub(crate) fn require_event<T: StoreTx>(tx: &mut T, id: EventId) -> ServiceResult<Event> {
    tx.load_event(id)?
        .ok_or_else(|| DomainError::not_found(Event::KIND, id).into())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{Days, Utc};

    use florist_core::{CustomerId, Money, ProductId};
    use florist_events::{EventLineKind, NewEvent};
    use florist_inventory::{NewStockItem, StockCategory};
    use florist_orders::OrderState;
    use florist_products::{NewProduct, Product, RecipeInput, RecipeLine};

    use super::*;
    use crate::error::StoreResult;
    use crate::store::InMemoryStore;
    use crate::store::in_memory::InMemoryTx;

    /// In-memory store that records which stock rows were loaded for update.
    #[derive(Default)]
    struct LockLog {
        inner: InMemoryStore,
        locked: Mutex<Vec<StockItemId>>,
    }

    impl LockLog {
        fn take(&self) -> Vec<String> {
            let mut locked = self.locked.lock().unwrap();
            locked.drain(..).map(|id| id.to_string()).collect()
        }
    }

    struct LockLogTx<'a> {
        inner: InMemoryTx<'a>,
        locked: &'a Mutex<Vec<StockItemId>>,
    }

    impl Store for LockLog {
        type Tx<'a> = LockLogTx<'a>;

        fn begin(&self) -> StoreResult<LockLogTx<'_>> {
            Ok(LockLogTx {
                inner: self.inner.begin()?,
                locked: &self.locked,
            })
        }
    }

    impl StoreTx for LockLogTx<'_> {
        fn load_stock_item(&mut self, id: &StockItemId) -> StoreResult<Option<StockItem>> {
            self.locked.lock().unwrap().push(id.clone());
            self.inner.load_stock_item(id)
        }
        fn read_stock_items(&mut self, ids: &[StockItemId]) -> StoreResult<Vec<StockItem>> {
            self.inner.read_stock_items(ids)
        }
        fn list_stock_items(&mut self, category: Option<StockCategory>) -> StoreResult<Vec<StockItem>> {
            self.inner.list_stock_items(category)
        }
        fn save_stock_item(&mut self, item: &StockItem) -> StoreResult<()> {
            self.inner.save_stock_item(item)
        }
        fn load_product(&mut self, id: ProductId) -> StoreResult<Option<Product>> {
            self.inner.load_product(id)
        }
        fn save_product(&mut self, product: &Product) -> StoreResult<()> {
            self.inner.save_product(product)
        }
        fn load_order(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
            self.inner.load_order(id)
        }
        fn list_orders(&mut self, states: Option<&[OrderState]>) -> StoreResult<Vec<Order>> {
            self.inner.list_orders(states)
        }
        fn save_order(&mut self, order: &Order) -> StoreResult<()> {
            self.inner.save_order(order)
        }
        fn delete_order(&mut self, id: OrderId) -> StoreResult<bool> {
            self.inner.delete_order(id)
        }
        fn load_event(&mut self, id: EventId) -> StoreResult<Option<Event>> {
            self.inner.load_event(id)
        }
        fn list_events(&mut self) -> StoreResult<Vec<Event>> {
            self.inner.list_events()
        }
        fn save_event(&mut self, event: &Event) -> StoreResult<()> {
            self.inner.save_event(event)
        }
        fn commit(self) -> StoreResult<()> {
            self.inner.commit()
        }
    }

    fn florist_with(items: &[&str]) -> Florist<LockLog> {
        let florist = Florist::new(LockLog::default());
        for item in items {
            florist
                .create_stock_item(NewStockItem {
                    id: StockItemId::new(*item),
                    category: StockCategory::Flower,
                    name: item.to_string(),
                    variety: None,
                    colour: None,
                    location: None,
                    unit_cost: Money::from_cents(100),
                    stock_total: 50,
                })
                .unwrap();
        }
        florist.store().take();
        florist
    }

    fn inputs(items: &[&str]) -> Vec<RecipeInput> {
        items
            .iter()
            .map(|item| RecipeInput {
                stock_item_id: StockItemId::new(*item),
                quantity: 2,
            })
            .collect()
    }

    fn order_cmd(items: &[&str]) -> CreateOrder {
        CreateOrder {
            order_id: OrderId::new(),
            customer_id: CustomerId::new(),
            fulfilment_date: Utc::now().date_naive() + Days::new(4),
            delivery_address: None,
            pickup_at_store: true,
            inputs: OrderInputs::Lines {
                lines: inputs(items),
            },
            sale_price: Some(Money::from_cents(3_000)),
            deposit: Money::ZERO,
            notes: None,
        }
    }

    #[test]
    fn order_capture_locks_rows_once_in_item_order() {
        let f = florist_with(&["anemone", "briza", "cosmos"]);

        let created = f.create_order(order_cmd(&["cosmos", "anemone", "cosmos"])).unwrap();
        assert_eq!(f.store().take(), ["anemone", "cosmos"]);
        assert_eq!(created.order.lines()[0].unit_cost, Money::from_cents(100));

        f.edit_order_lines(*created.order.id(), inputs(&["briza", "anemone"]))
            .unwrap();
        assert_eq!(f.store().take(), ["anemone", "briza", "cosmos"]);
    }

    #[test]
    fn unknown_items_fail_before_any_row_is_locked() {
        let f = florist_with(&["anemone"]);

        let err = f.create_order(order_cmd(&["anemone", "zinnia"])).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound { .. })));
        assert!(f.store().take().is_empty());
    }

    #[test]
    fn costing_product_event_lines_takes_no_locks() {
        let f = florist_with(&["anemone", "briza"]);
        let product_id = ProductId::new();
        f.create_product(NewProduct {
            id: product_id,
            name: "Meadow posy".to_string(),
            category: "posy".to_string(),
            sale_price: Money::from_cents(1_800),
        })
        .unwrap();
        f.set_recipe(
            product_id,
            ["briza", "anemone"]
                .iter()
                .map(|item| RecipeLine {
                    stock_item_id: StockItemId::new(*item),
                    quantity: 3,
                    unit: "stem".to_string(),
                    optional: false,
                })
                .collect(),
        )
        .unwrap();
        let event = f
            .create_event(NewEvent {
                id: EventId::new(),
                customer_id: CustomerId::new(),
                event_date: Utc::now().date_naive() + Days::new(30),
                name: "Garden party".to_string(),
                venue: None,
                notes: None,
                labour_cost: Money::ZERO,
                transport_cost: Money::ZERO,
                other_cost: Money::ZERO,
                margin_bps: 0,
                deposit: Money::ZERO,
            })
            .unwrap();
        f.store().take();

        let added = f
            .add_event_line(
                *event.id(),
                AddEventLine {
                    kind: EventLineKind::Product { product_id },
                    quantity: 2,
                    unit_cost: None,
                    notes: None,
                },
            )
            .unwrap();
        assert_eq!(added.event.cost_inputs(), Money::from_cents(1_200));
        assert!(f.store().take().is_empty());
    }
}
