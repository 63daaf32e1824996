//! Order reservation engine.
//!
//! - capture: reserve every input when the order is created
//! - edit: release pending lines and capture the new ones
//! - workshop: convert reservations into consumptions of the quantities used
//! - cancel: release what is still reserved and return what was consumed

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use florist_core::{
    CustomerId, DomainError, Entity, Money, OrderId, OrderLineId, ProductId, StockItemId,
};
use florist_inventory::ReservationPool;
use florist_orders::{CapturedInput, NewOrder, Order, OrderState, OrderTransition};
use florist_products::{Product, RecipeInput};

use super::{Florist, OrderOutcome, read_stock_items, require_order};
use crate::error::ServiceResult;
use crate::ledger::{self, LedgerOp};
use crate::store::{Store, StoreTx};

/// Where the inputs of a new order come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OrderInputs {
    /// Expand a product's recipe `units` times.
    Product {
        product_id: ProductId,
        units: i64,
        include_optional: bool,
    },
    /// Explicit stock items and quantities.
    Lines { lines: Vec<RecipeInput> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub fulfilment_date: NaiveDate,
    pub delivery_address: Option<String>,
    pub pickup_at_store: bool,
    pub inputs: OrderInputs,
    /// Defaults to the product's price times `units` for product orders,
    /// zero otherwise.
    pub sale_price: Option<Money>,
    pub deposit: Money,
    pub notes: Option<String>,
}

struct ResolvedInputs {
    product_id: Option<ProductId>,
    inputs: Vec<RecipeInput>,
    default_price: Money,
}

fn resolve_inputs<T: StoreTx>(tx: &mut T, inputs: &OrderInputs) -> ServiceResult<ResolvedInputs> {
    match inputs {
        OrderInputs::Product {
            product_id,
            units,
            include_optional,
        } => {
            let product = tx
                .load_product(*product_id)?
                .ok_or_else(|| DomainError::not_found(Product::KIND, product_id))?;
            Ok(ResolvedInputs {
                product_id: Some(*product_id),
                inputs: product.order_inputs(*units, *include_optional)?,
                default_price: product.sale_price().times(*units),
            })
        }
        OrderInputs::Lines { lines } => Ok(ResolvedInputs {
            product_id: None,
            inputs: lines.clone(),
            default_price: Money::ZERO,
        }),
    }
}

/// Freeze current unit costs on new lines and queue their
/// reservations.
fn capture<T: StoreTx>(
    tx: &mut T,
    order: &mut Order,
    inputs: Vec<RecipeInput>,
) -> ServiceResult<Vec<LedgerOp>> {
    let items = read_stock_items(tx, inputs.iter().map(|i| &i.stock_item_id))?;
    let captured = inputs
        .into_iter()
        .filter_map(|input| {
            let item = items.get(&input.stock_item_id)?;
            Some(CapturedInput {
                unit_cost: item.unit_cost(),
                stock_item_id: input.stock_item_id,
                quantity: input.quantity,
            })
        })
        .collect();

    let lines = order.capture_lines(captured)?;
    Ok(lines
        .iter()
        .map(|l| LedgerOp::Reserve {
            pool: ReservationPool::Orders,
            item_id: l.stock_item_id.clone(),
            quantity: l.quantity,
        })
        .collect())
}

/// Consume every pending line, `actuals` overriding the reserved
/// quantity per line.
///
/// Lines are grouped per item so the check made by the ledger is the
/// own-reservation rule: the order's total use of an item must fit in what is
/// available plus what this order itself holds on it.
fn consume_lines<T: StoreTx>(
    tx: &mut T,
    order: &mut Order,
    actuals: &BTreeMap<OrderLineId, i64>,
) -> ServiceResult<Vec<florist_inventory::StockMovement>> {
    let plan = order.plan_consumption(actuals)?;

    let mut per_item: BTreeMap<StockItemId, (i64, i64)> = BTreeMap::new();
    for c in &plan {
        let entry = per_item.entry(c.stock_item_id.clone()).or_default();
        entry.0 += c.used;
        entry.1 += c.reserved;
    }
    let ops = per_item
        .into_iter()
        .map(|(item_id, (used, reserved_previously))| LedgerOp::Consume {
            pool: ReservationPool::Orders,
            item_id,
            used,
            reserved_previously,
        })
        .collect();
    let movements = ledger::apply(tx, ops)?;

    for c in plan {
        order.mark_consumed(c.line_id, c.used)?;
    }
    Ok(movements)
}

/// Unwind an order: pending lines release, consumed lines go back on the shelf.
fn unwind_lines<T: StoreTx>(
    tx: &mut T,
    order: &Order,
) -> ServiceResult<Vec<florist_inventory::StockMovement>> {
    let ops = order
        .lines()
        .iter()
        .filter(|l| l.quantity > 0)
        .map(|l| {
            if l.consumed {
                LedgerOp::Return {
                    item_id: l.stock_item_id.clone(),
                    quantity: l.quantity,
                }
            } else {
                LedgerOp::Release {
                    pool: ReservationPool::Orders,
                    item_id: l.stock_item_id.clone(),
                    quantity: l.quantity,
                }
            }
        })
        .collect();
    ledger::apply(tx, ops)
}

impl<S: Store> Florist<S> {
    /// Create an order and reserve its inputs.
    #[instrument(skip(self, cmd), fields(order_id = %cmd.order_id), err)]
    pub fn create_order(&self, cmd: CreateOrder) -> ServiceResult<OrderOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            if tx.load_order(cmd.order_id)?.is_some() {
                return Err(DomainError::conflict(format!(
                    "order {} already exists",
                    cmd.order_id
                ))
                .into());
            }
            let resolved = resolve_inputs(tx, &cmd.inputs)?;

            let mut order = Order::create(
                NewOrder {
                    id: cmd.order_id,
                    customer_id: cmd.customer_id,
                    product_id: resolved.product_id,
                    fulfilment_date: cmd.fulfilment_date,
                    delivery_address: cmd.delivery_address,
                    pickup_at_store: cmd.pickup_at_store,
                    sale_price: cmd.sale_price.unwrap_or(resolved.default_price),
                    deposit: cmd.deposit,
                    notes: cmd.notes,
                },
                now,
            )?;
            let ops = capture(tx, &mut order, resolved.inputs)?;
            let movements = ledger::apply(tx, ops)?;
            tx.save_order(&order)?;

            info!(
                state = %order.state(),
                lines = order.lines().len(),
                "order created"
            );
            Ok(OrderOutcome { order, movements })
        })
    }

    /// Replace the pending inputs of an order that has not left the workshop.
    #[instrument(skip(self, lines), fields(order_id = %order_id), err)]
    pub fn edit_order_lines(
        &self,
        order_id: OrderId,
        lines: Vec<RecipeInput>,
    ) -> ServiceResult<OrderOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut order = require_order(tx, order_id)?;
            let released = order.take_pending_lines()?;

            let mut ops: Vec<LedgerOp> = released
                .into_iter()
                .map(|l| LedgerOp::Release {
                    pool: ReservationPool::Orders,
                    item_id: l.stock_item_id,
                    quantity: l.quantity,
                })
                .collect();
            ops.extend(capture(tx, &mut order, lines)?);
            let movements = ledger::apply(tx, ops)?;

            order.touch(now);
            tx.save_order(&order)?;
            info!(lines = order.lines().len(), "order lines replaced");
            Ok(OrderOutcome { order, movements })
        })
    }

    /// Move an order to `to`, running the stock effects of the transition.
    ///
    /// `actuals` (line → units used) only applies to the workshop transition;
    /// lines it does not mention used exactly what they reserved.
    #[instrument(skip(self, actuals), fields(order_id = %order_id, to = %to), err)]
    pub fn transition_order_state(
        &self,
        order_id: OrderId,
        to: OrderState,
        actuals: Option<BTreeMap<OrderLineId, i64>>,
    ) -> ServiceResult<OrderOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut order = require_order(tx, order_id)?;
            let from = order.state();
            let plan = order.plan_transition(to)?;

            if actuals.is_some() && plan != OrderTransition::Consume {
                return Err(DomainError::validation(
                    "actual quantities only apply when leaving the workshop",
                )
                .into());
            }

            let movements = match plan {
                OrderTransition::NoOp => {
                    return Ok(OrderOutcome {
                        order,
                        movements: Vec::new(),
                    });
                }
                OrderTransition::Consume => {
                    let m = consume_lines(tx, &mut order, &actuals.unwrap_or_default())?;
                    order.set_state(to);
                    m
                }
                OrderTransition::Cancel => {
                    let m = unwind_lines(tx, &order)?;
                    order.cancel(None);
                    m
                }
                OrderTransition::Reschedule
                | OrderTransition::Regress
                | OrderTransition::SwitchFulfilment
                | OrderTransition::Dispatch => {
                    order.set_state(to);
                    Vec::new()
                }
            };

            order.touch(now);
            tx.save_order(&order)?;
            info!(%from, to = %order.state(), movements = movements.len(), "order state changed");
            Ok(OrderOutcome { order, movements })
        })
    }

    /// Cancel an order: release pending reservations and return consumed units.
    #[instrument(skip(self, reason), fields(order_id = %order_id), err)]
    pub fn cancel_order(
        &self,
        order_id: OrderId,
        reason: Option<String>,
    ) -> ServiceResult<OrderOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut order = require_order(tx, order_id)?;
            order.plan_transition(OrderState::Cancelled)?;

            let movements = unwind_lines(tx, &order)?;
            order.cancel(reason);
            order.touch(now);
            tx.save_order(&order)?;
            info!(movements = movements.len(), "order cancelled");
            Ok(OrderOutcome { order, movements })
        })
    }

    /// Record whether the order has been paid. No stock effect.
    #[instrument(skip(self), err)]
    pub fn record_order_payment(&self, order_id: OrderId, paid: bool) -> ServiceResult<Order> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut order = require_order(tx, order_id)?;
            order.mark_paid(paid);
            order.touch(now);
            tx.save_order(&order)?;
            Ok(order)
        })
    }

    pub fn get_order(&self, order_id: OrderId) -> ServiceResult<Order> {
        self.in_tx(|tx| require_order(tx, order_id))
    }

    /// Delete a cancelled or dispatched order and its lines.
    #[instrument(skip(self), err)]
    pub fn delete_order(&self, order_id: OrderId) -> ServiceResult<()> {
        self.in_tx(|tx| {
            let order = require_order(tx, order_id)?;
            if !order.state().is_terminal() {
                return Err(DomainError::invariant(format!(
                    "order {order_id} is {} and may still hold stock",
                    order.state()
                ))
                .into());
            }
            tx.delete_order(order_id)?;
            info!("order deleted");
            Ok(())
        })
    }
}
