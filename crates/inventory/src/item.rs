use serde::{Deserialize, Serialize};

use florist_core::{DomainError, DomainResult, Entity, Money, StockItemId};

use crate::movement::StockMovement;

/// What kind of stockable input an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockCategory {
    Flower,
    Container,
    EventProp,
}

impl StockCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockCategory::Flower => "flower",
            StockCategory::Container => "container",
            StockCategory::EventProp => "event_prop",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "flower" => Some(StockCategory::Flower),
            "container" => Some(StockCategory::Container),
            "event_prop" => Some(StockCategory::EventProp),
            _ => None,
        }
    }
}

/// Which reservation counter an operation works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationPool {
    Orders,
    Events,
}

impl ReservationPool {
    pub fn counter_name(&self) -> &'static str {
        match self {
            ReservationPool::Orders => "reserved_for_orders",
            ReservationPool::Events => "reserved_for_events",
        }
    }
}

/// Snapshot of the three counters of a stock item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCounters {
    pub stock_total: i64,
    pub reserved_for_orders: i64,
    pub reserved_for_events: i64,
}

impl StockCounters {
    pub fn available(&self) -> i64 {
        self.stock_total - self.reserved_for_orders - self.reserved_for_events
    }

    fn reserved(&self, pool: ReservationPool) -> i64 {
        match pool {
            ReservationPool::Orders => self.reserved_for_orders,
            ReservationPool::Events => self.reserved_for_events,
        }
    }

    fn reserved_mut(&mut self, pool: ReservationPool) -> &mut i64 {
        match pool {
            ReservationPool::Orders => &mut self.reserved_for_orders,
            ReservationPool::Events => &mut self.reserved_for_events,
        }
    }

    /// All counters non-negative and availability non-negative.
    pub fn check(&self) -> DomainResult<()> {
        if self.stock_total < 0 || self.reserved_for_orders < 0 || self.reserved_for_events < 0 {
            return Err(DomainError::inconsistent(format!(
                "negative counter: {self:?}"
            )));
        }
        if self.available() < 0 {
            return Err(DomainError::inconsistent(format!(
                "reservations exceed stock: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Input for registering a new stock item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStockItem {
    pub id: StockItemId,
    pub category: StockCategory,
    pub name: String,
    pub variety: Option<String>,
    pub colour: Option<String>,
    pub location: Option<String>,
    pub unit_cost: Money,
    pub stock_total: i64,
}

/// A stockable item and its ledger counters.
///
/// The counters are private: they only change through the ledger operations
/// below, each of which either applies fully or leaves the item untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    id: StockItemId,
    category: StockCategory,
    name: String,
    variety: Option<String>,
    colour: Option<String>,
    location: Option<String>,
    unit_cost: Money,
    counters: StockCounters,
}

impl Entity for StockItem {
    type Id = StockItemId;
    const KIND: &'static str = "stock item";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl StockItem {
    pub fn create(input: NewStockItem) -> DomainResult<Self> {
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("stock item name cannot be empty"));
        }
        if input.id.as_str().trim().is_empty() {
            return Err(DomainError::validation("stock item id cannot be empty"));
        }
        if input.stock_total < 0 {
            return Err(DomainError::validation("initial stock cannot be negative"));
        }
        if input.unit_cost.is_negative() {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        Ok(Self {
            id: input.id,
            category: input.category,
            name: input.name,
            variety: input.variety,
            colour: input.colour,
            location: input.location,
            unit_cost: input.unit_cost,
            counters: StockCounters {
                stock_total: input.stock_total,
                reserved_for_orders: 0,
                reserved_for_events: 0,
            },
        })
    }

    /// Rebuild an item from a persisted row, rejecting corrupt counters.
    pub fn restore(input: NewStockItem, counters: StockCounters) -> DomainResult<Self> {
        counters.check()?;
        let mut item = Self::create(NewStockItem {
            stock_total: counters.stock_total,
            ..input
        })?;
        item.counters = counters;
        Ok(item)
    }

    pub fn category(&self) -> StockCategory {
        self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variety(&self) -> Option<&str> {
        self.variety.as_deref()
    }

    pub fn colour(&self) -> Option<&str> {
        self.colour.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn unit_cost(&self) -> Money {
        self.unit_cost
    }

    pub fn counters(&self) -> StockCounters {
        self.counters
    }

    pub fn stock_total(&self) -> i64 {
        self.counters.stock_total
    }

    pub fn reserved_for_orders(&self) -> i64 {
        self.counters.reserved_for_orders
    }

    pub fn reserved_for_events(&self) -> i64 {
        self.counters.reserved_for_events
    }

    pub fn available(&self) -> i64 {
        self.counters.available()
    }

    /// Change the cost captured by future order/event lines.
    pub fn set_unit_cost(&mut self, unit_cost: Money) -> DomainResult<()> {
        if unit_cost.is_negative() {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        self.unit_cost = unit_cost;
        Ok(())
    }

    pub fn reserve_for_order(&mut self, n: i64) -> DomainResult<StockMovement> {
        self.reserve(ReservationPool::Orders, n)
    }

    pub fn release_order_reservation(&mut self, n: i64) -> DomainResult<StockMovement> {
        self.release(ReservationPool::Orders, n)
    }

    pub fn consume_from_order(
        &mut self,
        used: i64,
        reserved_previously: i64,
    ) -> DomainResult<StockMovement> {
        self.consume(ReservationPool::Orders, used, reserved_previously)
    }

    pub fn reserve_for_event(&mut self, n: i64) -> DomainResult<StockMovement> {
        self.reserve(ReservationPool::Events, n)
    }

    pub fn release_event_reservation(&mut self, n: i64) -> DomainResult<StockMovement> {
        self.release(ReservationPool::Events, n)
    }

    pub fn consume_from_event(
        &mut self,
        used: i64,
        reserved_previously: i64,
    ) -> DomainResult<StockMovement> {
        self.consume(ReservationPool::Events, used, reserved_previously)
    }

    /// Claim `n` units against `pool`. Fails with `InsufficientStock` when
    /// fewer than `n` units are available.
    pub fn reserve(&mut self, pool: ReservationPool, n: i64) -> DomainResult<StockMovement> {
        ensure_non_negative("reserve quantity", n)?;
        let available = self.available();
        if available < n {
            return Err(DomainError::insufficient(self.id.clone(), n, available));
        }
        *self.counters.reserved_mut(pool) += n;
        Ok(StockMovement::Reserved {
            item_id: self.id.clone(),
            pool,
            quantity: n,
        })
    }

    /// Drop `n` reserved units from `pool`.
    pub fn release(&mut self, pool: ReservationPool, n: i64) -> DomainResult<StockMovement> {
        ensure_non_negative("release quantity", n)?;
        let reserved = self.counters.reserved(pool);
        if reserved < n {
            return Err(DomainError::inconsistent(format!(
                "{}: cannot release {n} from {} = {reserved}",
                self.id,
                pool.counter_name()
            )));
        }
        *self.counters.reserved_mut(pool) -= n;
        Ok(StockMovement::Released {
            item_id: self.id.clone(),
            pool,
            quantity: n,
        })
    }

    /// Turn a reservation of `reserved_previously` units into a consumption of
    /// `used` units.
    ///
    /// The whole reservation is dropped but only `used` leaves `stock_total`,
    /// so `reserved_previously - used` flows back into availability. `used`
    /// may exceed the reservation as long as the extra units are available:
    /// `used <= available + reserved_previously`.
    pub fn consume(
        &mut self,
        pool: ReservationPool,
        used: i64,
        reserved_previously: i64,
    ) -> DomainResult<StockMovement> {
        ensure_non_negative("used quantity", used)?;
        ensure_non_negative("reserved quantity", reserved_previously)?;
        let reserved = self.counters.reserved(pool);
        if reserved < reserved_previously {
            return Err(DomainError::inconsistent(format!(
                "{}: {} = {reserved} is below the {reserved_previously} being consumed",
                self.id,
                pool.counter_name()
            )));
        }
        let coverable = self.available() + reserved_previously;
        if used > coverable {
            return Err(DomainError::insufficient(self.id.clone(), used, coverable));
        }
        *self.counters.reserved_mut(pool) -= reserved_previously;
        self.counters.stock_total -= used;
        Ok(StockMovement::Consumed {
            item_id: self.id.clone(),
            pool,
            used,
            released: reserved_previously,
        })
    }

    /// Put `n` units back on the shelf. Never touches reservations.
    pub fn return_to_stock(&mut self, n: i64) -> DomainResult<StockMovement> {
        ensure_non_negative("returned quantity", n)?;
        self.add_to_stock(n)?;
        Ok(StockMovement::Returned {
            item_id: self.id.clone(),
            quantity: n,
        })
    }

    /// Supplier delivery.
    pub fn receive(&mut self, n: i64) -> DomainResult<StockMovement> {
        if n <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        self.add_to_stock(n)?;
        Ok(StockMovement::Received {
            item_id: self.id.clone(),
            quantity: n,
        })
    }

    /// Shrinkage (wilted, broken, lost). Only unreserved units can be written off.
    pub fn write_off(&mut self, n: i64) -> DomainResult<StockMovement> {
        if n <= 0 {
            return Err(DomainError::validation("written-off quantity must be positive"));
        }
        let available = self.available();
        if available < n {
            return Err(DomainError::insufficient(self.id.clone(), n, available));
        }
        self.counters.stock_total -= n;
        Ok(StockMovement::WrittenOff {
            item_id: self.id.clone(),
            quantity: n,
        })
    }

    fn add_to_stock(&mut self, n: i64) -> DomainResult<()> {
        self.counters.stock_total = self
            .counters
            .stock_total
            .checked_add(n)
            .ok_or_else(|| DomainError::validation(format!("{}: stock total would overflow", self.id)))?;
        Ok(())
    }
}

fn ensure_non_negative(what: &str, n: i64) -> DomainResult<()> {
    if n < 0 {
        return Err(DomainError::validation(format!("{what} cannot be negative")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flower(stock_total: i64) -> StockItem {
        StockItem::create(NewStockItem {
            id: StockItemId::new("F1"),
            category: StockCategory::Flower,
            name: "Red rose".to_string(),
            variety: Some("rose".to_string()),
            colour: Some("red".to_string()),
            location: Some("cold room".to_string()),
            unit_cost: Money::from_cents(120),
            stock_total,
        })
        .unwrap()
    }

    #[test]
    fn reserve_reduces_available_without_touching_total() {
        let mut item = flower(10);
        item.reserve_for_order(3).unwrap();
        assert_eq!(item.stock_total(), 10);
        assert_eq!(item.reserved_for_orders(), 3);
        assert_eq!(item.available(), 7);
    }

    #[test]
    fn reserve_beyond_available_reports_shortage_and_changes_nothing() {
        let mut item = flower(5);
        item.reserve_for_order(4).unwrap();
        let before = item.clone();

        let err = item.reserve_for_order(2).unwrap_err();
        assert_eq!(
            err,
            DomainError::insufficient(StockItemId::new("F1"), 2, 1)
        );
        assert_eq!(item, before);
    }

    #[test]
    fn event_reservations_block_order_reservations() {
        let mut item = flower(1);
        item.reserve_for_event(1).unwrap();
        assert!(matches!(
            item.reserve_for_order(1),
            Err(DomainError::InsufficientStock(_))
        ));
    }

    #[test]
    fn release_more_than_reserved_is_inconsistent() {
        let mut item = flower(10);
        item.reserve_for_order(2).unwrap();
        let err = item.release_order_reservation(3).unwrap_err();
        assert!(err.is_internal());
        assert_eq!(item.reserved_for_orders(), 2);
    }

    #[test]
    fn consume_less_than_reserved_releases_the_residual() {
        let mut item = flower(10);
        item.reserve_for_order(3).unwrap();

        let movement = item.consume_from_order(2, 3).unwrap();
        assert_eq!(
            movement,
            StockMovement::Consumed {
                item_id: StockItemId::new("F1"),
                pool: ReservationPool::Orders,
                used: 2,
                released: 3,
            }
        );
        assert_eq!(item.stock_total(), 8);
        assert_eq!(item.reserved_for_orders(), 0);
        assert_eq!(item.available(), 8);
    }

    #[test]
    fn consume_more_than_reserved_draws_on_available() {
        let mut item = flower(10);
        item.reserve_for_order(3).unwrap();
        item.consume_from_order(5, 3).unwrap();
        assert_eq!(item.stock_total(), 5);
        assert_eq!(item.available(), 5);
    }

    #[test]
    fn consume_respects_reservations_held_by_events() {
        let mut item = flower(10);
        item.reserve_for_event(6).unwrap();
        item.reserve_for_order(2).unwrap();

        // available = 2, own reservation = 2 -> at most 4 can be used
        let err = item.consume_from_order(5, 2).unwrap_err();
        assert_eq!(err, DomainError::insufficient(StockItemId::new("F1"), 5, 4));
        item.consume_from_order(4, 2).unwrap();
        assert_eq!(item.available(), 0);
        assert_eq!(item.reserved_for_events(), 6);
    }

    #[test]
    fn consume_with_phantom_reservation_is_inconsistent() {
        let mut item = flower(10);
        let err = item.consume_from_event(1, 1).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn negative_quantities_are_rejected() {
        let mut item = flower(10);
        assert!(matches!(item.reserve_for_order(-1), Err(DomainError::Validation(_))));
        assert!(matches!(item.consume_from_order(-1, 0), Err(DomainError::Validation(_))));
        assert!(matches!(item.return_to_stock(-2), Err(DomainError::Validation(_))));
    }

    #[test]
    fn write_off_only_touches_unreserved_units() {
        let mut item = flower(4);
        item.reserve_for_order(3).unwrap();
        assert!(item.write_off(2).is_err());
        item.write_off(1).unwrap();
        assert_eq!(item.stock_total(), 3);
        assert_eq!(item.available(), 0);
    }

    #[test]
    fn restore_rejects_corrupt_counters() {
        let base = NewStockItem {
            id: StockItemId::new("C1"),
            category: StockCategory::Container,
            name: "Glass vase".to_string(),
            variety: None,
            colour: None,
            location: None,
            unit_cost: Money::from_cents(900),
            stock_total: 0,
        };
        let corrupt = StockCounters {
            stock_total: 1,
            reserved_for_orders: 1,
            reserved_for_events: 1,
        };
        assert!(StockItem::restore(base.clone(), corrupt).is_err());

        let ok = StockCounters {
            stock_total: 3,
            reserved_for_orders: 1,
            reserved_for_events: 1,
        };
        let item = StockItem::restore(base, ok).unwrap();
        assert_eq!(item.available(), 1);
    }

    #[test]
    fn stock_total_overflow_is_rejected_and_changes_nothing() {
        let mut item = flower(10);
        let before = item.clone();

        assert!(matches!(item.receive(i64::MAX), Err(DomainError::Validation(_))));
        assert!(matches!(item.return_to_stock(i64::MAX), Err(DomainError::Validation(_))));
        assert_eq!(item, before);

        item.receive(i64::MAX - 10).unwrap();
        assert_eq!(item.stock_total(), i64::MAX);
    }

    #[test]
    fn category_round_trips_through_its_column_value() {
        for c in [StockCategory::Flower, StockCategory::Container, StockCategory::EventProp] {
            assert_eq!(StockCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(StockCategory::parse("vase"), None);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Reserve(ReservationPool, i64),
            Release(ReservationPool, i64),
            Consume(ReservationPool, i64, i64),
            Return(i64),
            WriteOff(i64),
        }

        fn pool() -> impl Strategy<Value = ReservationPool> {
            prop_oneof![Just(ReservationPool::Orders), Just(ReservationPool::Events)]
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (pool(), 0i64..20).prop_map(|(p, n)| Op::Reserve(p, n)),
                (pool(), 0i64..20).prop_map(|(p, n)| Op::Release(p, n)),
                (pool(), 0i64..20, 0i64..20).prop_map(|(p, u, r)| Op::Consume(p, u, r)),
                (0i64..20).prop_map(Op::Return),
                (1i64..20).prop_map(Op::WriteOff),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: no sequence of ledger operations breaks the counter
            /// invariants, and a failed operation leaves the item untouched.
            #[test]
            fn counters_stay_consistent(initial in 0i64..50, ops in prop::collection::vec(op(), 0..40)) {
                let mut item = flower(initial);
                for op in ops {
                    let before = item.clone();
                    let result = match op {
                        Op::Reserve(p, n) => item.reserve(p, n),
                        Op::Release(p, n) => item.release(p, n),
                        Op::Consume(p, u, r) => item.consume(p, u, r),
                        Op::Return(n) => item.return_to_stock(n),
                        Op::WriteOff(n) => item.write_off(n),
                    };
                    if result.is_err() {
                        prop_assert_eq!(&item, &before);
                    }
                    prop_assert!(item.counters().check().is_ok());
                }
            }

            /// Property: reserve then release of the same quantity is a no-op.
            #[test]
            fn reserve_release_round_trip(initial in 0i64..50, n in 0i64..50) {
                let mut item = flower(initial);
                let before = item.counters();
                if item.reserve_for_order(n).is_ok() {
                    item.release_order_reservation(n).unwrap();
                }
                prop_assert_eq!(item.counters(), before);
            }
        }
    }
}
