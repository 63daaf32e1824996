//! Stock ledger batch executor.
//!
//! Engines describe the counter changes of an operation as a list of
//! [`LedgerOp`]s and apply them here, inside their transaction. Rows are
//! touched in ascending item-id order; ops on the same item keep the order in
//! which they were pushed (a release queued before a reserve frees the units
//! first).

use tracing::{debug, warn};

use florist_core::{DomainError, Entity, Shortage, StockItemId};
use florist_inventory::{ReservationPool, StockItem, StockMovement};

use crate::error::ServiceResult;
use crate::store::StoreTx;

/// One counter change on one stock item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    Reserve {
        pool: ReservationPool,
        item_id: StockItemId,
        quantity: i64,
    },
    Release {
        pool: ReservationPool,
        item_id: StockItemId,
        quantity: i64,
    },
    Consume {
        pool: ReservationPool,
        item_id: StockItemId,
        used: i64,
        reserved_previously: i64,
    },
    Return {
        item_id: StockItemId,
        quantity: i64,
    },
}

impl LedgerOp {
    pub fn item_id(&self) -> &StockItemId {
        match self {
            LedgerOp::Reserve { item_id, .. }
            | LedgerOp::Release { item_id, .. }
            | LedgerOp::Consume { item_id, .. }
            | LedgerOp::Return { item_id, .. } => item_id,
        }
    }

    fn apply(&self, item: &mut StockItem) -> Result<StockMovement, DomainError> {
        match self {
            LedgerOp::Reserve { pool, quantity, .. } => item.reserve(*pool, *quantity),
            LedgerOp::Release { pool, quantity, .. } => item.release(*pool, *quantity),
            LedgerOp::Consume {
                pool,
                used,
                reserved_previously,
                ..
            } => item.consume(*pool, *used, *reserved_previously),
            LedgerOp::Return { quantity, .. } => item.return_to_stock(*quantity),
        }
    }
}

/// Apply `ops` inside `tx`.
///
/// Every shortage in the batch is collected and reported together in one
/// `InsufficientStock`; any other failure (unknown item, inconsistent
/// reservation) stops the batch at once. On error nothing should be
/// committed: the caller drops the transaction.
pub fn apply<T: StoreTx>(tx: &mut T, mut ops: Vec<LedgerOp>) -> ServiceResult<Vec<StockMovement>> {
    ops.sort_by(|a, b| a.item_id().cmp(b.item_id()));

    let mut movements = Vec::with_capacity(ops.len());
    let mut shortages: Vec<Shortage> = Vec::new();

    for group in ops.chunk_by(|a, b| a.item_id() == b.item_id()) {
        let item_id = group[0].item_id();
        let mut item = tx
            .load_stock_item(item_id)?
            .ok_or_else(|| DomainError::not_found(StockItem::KIND, item_id))?;

        for op in group {
            match op.apply(&mut item) {
                Ok(movement) => {
                    debug!(item_id = %item_id, ?movement, "ledger movement");
                    movements.push(movement);
                }
                Err(DomainError::InsufficientStock(mut found)) => {
                    shortages.append(&mut found);
                }
                Err(err) => return Err(err.into()),
            }
        }

        item.counters().check()?;
        tx.save_stock_item(&item)?;
    }

    if !shortages.is_empty() {
        warn!(shortages = shortages.len(), "ledger batch rejected");
        return Err(DomainError::InsufficientStock(shortages).into());
    }
    Ok(movements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Store};
    use florist_core::Money;
    use florist_inventory::{NewStockItem, StockCategory};

    fn seed(store: &InMemoryStore, items: &[(&str, i64)]) {
        let mut tx = store.begin().unwrap();
        for (id, stock) in items {
            let item = StockItem::create(NewStockItem {
                id: StockItemId::new(*id),
                category: StockCategory::Flower,
                name: id.to_string(),
                variety: None,
                colour: None,
                location: None,
                unit_cost: Money::from_cents(100),
                stock_total: *stock,
            })
            .unwrap();
            tx.save_stock_item(&item).unwrap();
        }
        tx.commit().unwrap();
    }

    fn reserve(item: &str, quantity: i64) -> LedgerOp {
        LedgerOp::Reserve {
            pool: ReservationPool::Orders,
            item_id: StockItemId::new(item),
            quantity,
        }
    }

    #[test]
    fn movements_come_back_in_item_order() {
        let store = InMemoryStore::new();
        seed(&store, &[("b", 5), ("a", 5)]);
        let mut tx = store.begin().unwrap();
        let movements = apply(&mut tx, vec![reserve("b", 1), reserve("a", 2)]).unwrap();
        let ids: Vec<_> = movements.iter().map(|m| m.item_id().as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn all_shortages_are_reported() {
        let store = InMemoryStore::new();
        seed(&store, &[("a", 1), ("b", 0), ("c", 9)]);
        let mut tx = store.begin().unwrap();
        let err = apply(&mut tx, vec![reserve("c", 2), reserve("b", 1), reserve("a", 2)])
            .unwrap_err();
        let shortages = err.domain().unwrap().shortages().to_vec();
        assert_eq!(
            shortages,
            vec![
                Shortage::new(StockItemId::new("a"), 2, 1),
                Shortage::new(StockItemId::new("b"), 1, 0),
            ]
        );
    }

    #[test]
    fn release_before_reserve_on_the_same_item() {
        let store = InMemoryStore::new();
        seed(&store, &[("a", 3)]);
        let mut tx = store.begin().unwrap();
        apply(&mut tx, vec![reserve("a", 3)]).unwrap();
        let release = LedgerOp::Release {
            pool: ReservationPool::Orders,
            item_id: StockItemId::new("a"),
            quantity: 3,
        };
        apply(&mut tx, vec![release, reserve("a", 3)]).unwrap();
        let item = tx.load_stock_item(&StockItemId::new("a")).unwrap().unwrap();
        assert_eq!(item.reserved_for_orders(), 3);
    }

    #[test]
    fn unknown_items_abort_the_batch() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let err = apply(&mut tx, vec![reserve("ghost", 1)]).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound { .. })));
    }

    #[test]
    fn over_release_is_inconsistent() {
        let store = InMemoryStore::new();
        seed(&store, &[("a", 3)]);
        let mut tx = store.begin().unwrap();
        let err = apply(
            &mut tx,
            vec![LedgerOp::Release {
                pool: ReservationPool::Events,
                item_id: StockItemId::new("a"),
                quantity: 1,
            }],
        )
        .unwrap_err();
        assert!(err.is_internal());
    }
}
