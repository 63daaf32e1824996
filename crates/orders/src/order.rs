use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use florist_core::{
    AggregateRoot, CustomerId, DomainError, DomainResult, Entity, Money, OrderId, OrderLineId,
    ProductId, StockItemId,
};

use crate::state::{OrderState, OrderTransition};

/// A captured input: one stock item reserved by an order, with its cost frozen
/// at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub unit_cost: Money,
    pub total_cost: Money,
    /// `false`: the quantity is held in `reserved_for_orders`.
    /// `true`: the quantity has left `stock_total`.
    pub consumed: bool,
}

/// Input to line capture, after the unit cost was read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedInput {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub unit_cost: Money,
}

/// One line's share of a workshop consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConsumption {
    pub line_id: OrderLineId,
    pub stock_item_id: StockItemId,
    pub reserved: i64,
    pub used: i64,
}

/// Input for creating an order header. Lines are captured separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: Option<ProductId>,
    pub fulfilment_date: NaiveDate,
    pub delivery_address: Option<String>,
    pub pickup_at_store: bool,
    pub sale_price: Money,
    pub deposit: Money,
    pub notes: Option<String>,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    product_id: Option<ProductId>,
    fulfilment_date: NaiveDate,
    delivery_address: Option<String>,
    pickup_at_store: bool,
    state: OrderState,
    sale_price: Money,
    deposit: Money,
    paid: bool,
    notes: Option<String>,
    cancellation_reason: Option<String>,
    lines: Vec<OrderLine>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Entity for Order {
    type Id = OrderId;
    const KIND: &'static str = "order";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl AggregateRoot for Order {
    fn version(&self) -> u64 {
        self.version
    }
}

impl Order {
    /// Create an order with no lines. The initial state is the scheduling
    /// state matching the fulfilment date as seen at `now`.
    pub fn create(input: NewOrder, now: DateTime<Utc>) -> DomainResult<Self> {
        if !input.pickup_at_store
            && input
                .delivery_address
                .as_deref()
                .map_or(true, |a| a.trim().is_empty())
        {
            return Err(DomainError::validation(
                "delivery address is required unless the order is picked up at the store",
            ));
        }
        if input.sale_price.is_negative() || input.deposit.is_negative() {
            return Err(DomainError::validation("prices cannot be negative"));
        }

        Ok(Self {
            id: input.id,
            customer_id: input.customer_id,
            product_id: input.product_id,
            fulfilment_date: input.fulfilment_date,
            delivery_address: input.delivery_address,
            pickup_at_store: input.pickup_at_store,
            state: OrderState::for_fulfilment_date(input.fulfilment_date, now.date_naive()),
            sale_price: input.sale_price,
            deposit: input.deposit,
            paid: false,
            notes: input.notes,
            cancellation_reason: None,
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Rebuild an order from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        input: NewOrder,
        state: OrderState,
        paid: bool,
        cancellation_reason: Option<String>,
        lines: Vec<OrderLine>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id: input.id,
            customer_id: input.customer_id,
            product_id: input.product_id,
            fulfilment_date: input.fulfilment_date,
            delivery_address: input.delivery_address,
            pickup_at_store: input.pickup_at_store,
            state,
            sale_price: input.sale_price,
            deposit: input.deposit,
            paid,
            notes: input.notes,
            cancellation_reason,
            lines,
            created_at,
            updated_at,
            version,
        }
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn fulfilment_date(&self) -> NaiveDate {
        self.fulfilment_date
    }

    pub fn delivery_address(&self) -> Option<&str> {
        self.delivery_address.as_deref()
    }

    pub fn pickup_at_store(&self) -> bool {
        self.pickup_at_store
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn sale_price(&self) -> Money {
        self.sale_price
    }

    pub fn deposit(&self) -> Money {
        self.deposit
    }

    pub fn paid(&self) -> bool {
        self.paid
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Cost of the captured inputs.
    pub fn inputs_cost(&self) -> Money {
        self.lines.iter().map(|l| l.total_cost).sum()
    }

    /// Post-workshop state this order naturally finishes in.
    pub fn finished_state(&self) -> OrderState {
        if self.pickup_at_store {
            OrderState::PickupAtStore
        } else {
            OrderState::ReadyToDispatch
        }
    }

    pub fn is_modifiable(&self) -> bool {
        self.state.is_pre_dispatch()
    }

    pub fn has_consumed_lines(&self) -> bool {
        self.lines.iter().any(|l| l.consumed)
    }

    /// Lines still holding a reservation.
    pub fn pending_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines.iter().filter(|l| !l.consumed)
    }

    /// Sum of this order's pending reservations on `item`.
    pub fn own_reservation(&self, item: &StockItemId) -> i64 {
        self.pending_lines()
            .filter(|l| &l.stock_item_id == item)
            .map(|l| l.quantity)
            .sum()
    }

    pub fn plan_transition(&self, to: OrderState) -> DomainResult<OrderTransition> {
        self.state.plan_transition(to, self.has_consumed_lines())
    }

    /// Append freshly captured lines (reservations are taken by the caller in
    /// the same transaction).
    pub fn capture_lines(&mut self, inputs: Vec<CapturedInput>) -> DomainResult<&[OrderLine]> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(format!(
                "cannot change the inputs of an order in state {}",
                self.state
            )));
        }
        for input in &inputs {
            if input.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "quantity for {} must be positive",
                    input.stock_item_id
                )));
            }
        }

        let start = self.lines.len();
        self.lines.extend(inputs.into_iter().map(|input| OrderLine {
            id: OrderLineId::new(),
            order_id: self.id,
            total_cost: input.unit_cost.times(input.quantity),
            stock_item_id: input.stock_item_id,
            quantity: input.quantity,
            unit_cost: input.unit_cost,
            consumed: false,
        }));
        Ok(&self.lines[start..])
    }

    /// Drop every pending line, returning them so the caller can release
    /// their reservations.
    pub fn take_pending_lines(&mut self) -> DomainResult<Vec<OrderLine>> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(format!(
                "cannot change the inputs of an order in state {}",
                self.state
            )));
        }
        let (pending, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.lines).into_iter().partition(|l| !l.consumed);
        self.lines = kept;
        Ok(pending)
    }

    /// Work out how much each pending line actually used.
    ///
    /// Lines missing from `actuals` used exactly what they reserved. Keys must
    /// name pending lines of this order.
    pub fn plan_consumption(
        &self,
        actuals: &BTreeMap<OrderLineId, i64>,
    ) -> DomainResult<Vec<LineConsumption>> {
        let pending: HashSet<OrderLineId> = self.pending_lines().map(|l| l.id).collect();
        for (line_id, used) in actuals {
            if !pending.contains(line_id) {
                if self.lines.iter().any(|l| &l.id == line_id) {
                    return Err(DomainError::invariant(format!(
                        "order line {line_id} was already consumed"
                    )));
                }
                return Err(DomainError::not_found("order line", line_id));
            }
            if *used < 0 {
                return Err(DomainError::validation(format!(
                    "used quantity for line {line_id} cannot be negative"
                )));
            }
        }

        Ok(self
            .pending_lines()
            .map(|l| LineConsumption {
                line_id: l.id,
                stock_item_id: l.stock_item_id.clone(),
                reserved: l.quantity,
                used: actuals.get(&l.id).copied().unwrap_or(l.quantity),
            })
            .collect())
    }

    /// Freeze a line after its consumption was booked in the ledger.
    pub fn mark_consumed(&mut self, line_id: OrderLineId, used: i64) -> DomainResult<()> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| DomainError::not_found("order line", line_id))?;
        if line.consumed {
            return Err(DomainError::invariant(format!(
                "order line {line_id} was already consumed"
            )));
        }
        line.consumed = true;
        line.quantity = used;
        line.total_cost = line.unit_cost.times(used);
        Ok(())
    }

    pub fn set_state(&mut self, state: OrderState) {
        self.state = state;
    }

    pub fn cancel(&mut self, reason: Option<String>) {
        self.state = OrderState::Cancelled;
        self.cancellation_reason = reason;
    }

    pub fn mark_paid(&mut self, paid: bool) {
        self.paid = paid;
    }

    /// Record a committed mutation.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-10T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn new_order(days_ahead: u64, pickup: bool) -> NewOrder {
        NewOrder {
            id: OrderId::new(),
            customer_id: CustomerId::new(),
            product_id: None,
            fulfilment_date: now()
                .date_naive()
                .checked_add_days(chrono::Days::new(days_ahead))
                .unwrap(),
            delivery_address: (!pickup).then(|| "12 Garden Lane".to_string()),
            pickup_at_store: pickup,
            sale_price: Money::from_cents(5_000),
            deposit: Money::ZERO,
            notes: None,
        }
    }

    fn input(item: &str, quantity: i64, unit_cents: i64) -> CapturedInput {
        CapturedInput {
            stock_item_id: StockItemId::new(item),
            quantity,
            unit_cost: Money::from_cents(unit_cents),
        }
    }

    #[test]
    fn initial_state_follows_fulfilment_date() {
        assert_eq!(Order::create(new_order(0, false), now()).unwrap().state(), OrderState::Today);
        assert_eq!(
            Order::create(new_order(1, false), now()).unwrap().state(),
            OrderState::Tomorrow
        );
        assert_eq!(Order::create(new_order(5, true), now()).unwrap().state(), OrderState::Week);
    }

    #[test]
    fn delivery_orders_need_an_address() {
        let mut input = new_order(2, false);
        input.delivery_address = Some("   ".to_string());
        assert!(matches!(
            Order::create(input, now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn captured_lines_freeze_costs() {
        let mut order = Order::create(new_order(2, true), now()).unwrap();
        let lines = order
            .capture_lines(vec![input("F1", 3, 150), input("C1", 1, 900)])
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].total_cost, Money::from_cents(450));
        assert!(!lines[0].consumed);
        assert_eq!(order.inputs_cost(), Money::from_cents(1_350));
    }

    #[test]
    fn capture_rejects_non_positive_quantities() {
        let mut order = Order::create(new_order(2, true), now()).unwrap();
        assert!(order.capture_lines(vec![input("F1", 0, 150)]).is_err());
        assert!(order.lines().is_empty());
    }

    #[test]
    fn own_reservation_sums_lines_on_the_same_item() {
        let mut order = Order::create(new_order(2, true), now()).unwrap();
        order
            .capture_lines(vec![input("F1", 4, 100), input("F1", 3, 100), input("C1", 1, 100)])
            .unwrap();
        assert_eq!(order.own_reservation(&StockItemId::new("F1")), 7);
        assert_eq!(order.own_reservation(&StockItemId::new("C1")), 1);
        assert_eq!(order.own_reservation(&StockItemId::new("X")), 0);
    }

    #[test]
    fn consumption_plan_defaults_to_reserved_quantities() {
        let mut order = Order::create(new_order(2, true), now()).unwrap();
        order
            .capture_lines(vec![input("F1", 4, 100), input("F2", 3, 100)])
            .unwrap();
        let first = order.lines()[0].id;

        let plan = order
            .plan_consumption(&BTreeMap::from([(first, 2)]))
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!((plan[0].reserved, plan[0].used), (4, 2));
        assert_eq!((plan[1].reserved, plan[1].used), (3, 3));
    }

    #[test]
    fn consumption_plan_rejects_foreign_and_negative_lines() {
        let mut order = Order::create(new_order(2, true), now()).unwrap();
        order.capture_lines(vec![input("F1", 4, 100)]).unwrap();
        let line = order.lines()[0].id;

        assert!(matches!(
            order.plan_consumption(&BTreeMap::from([(OrderLineId::new(), 1)])),
            Err(DomainError::NotFound { .. })
        ));
        assert!(matches!(
            order.plan_consumption(&BTreeMap::from([(line, -1)])),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn mark_consumed_rewrites_quantity_and_cost() {
        let mut order = Order::create(new_order(2, true), now()).unwrap();
        order.capture_lines(vec![input("F1", 3, 200)]).unwrap();
        let line = order.lines()[0].id;

        order.mark_consumed(line, 2).unwrap();
        let l = &order.lines()[0];
        assert!(l.consumed);
        assert_eq!(l.quantity, 2);
        assert_eq!(l.total_cost, Money::from_cents(400));
        assert!(order.has_consumed_lines());
        assert!(order.mark_consumed(line, 2).is_err());
    }

    #[test]
    fn lines_are_frozen_after_the_workshop() {
        let mut order = Order::create(new_order(0, true), now()).unwrap();
        order.set_state(OrderState::PickupAtStore);
        assert!(matches!(
            order.capture_lines(vec![input("F1", 1, 100)]),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(order.take_pending_lines().is_err());
    }

    #[test]
    fn finished_state_follows_pickup_flag() {
        let pickup = Order::create(new_order(3, true), now()).unwrap();
        let delivery = Order::create(new_order(3, false), now()).unwrap();
        assert_eq!(pickup.finished_state(), OrderState::PickupAtStore);
        assert_eq!(delivery.finished_state(), OrderState::ReadyToDispatch);
    }
}
