//! Event reservation engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use florist_core::{DomainError, Entity, EventId, EventLineId, Money, StockItemId};
use florist_events::{
    Event, EventLineKind, EventPatch, EventState, EventTransition, NewEvent, NewEventLine,
};
use florist_inventory::{ReservationPool, StockItem};
use florist_products::Product;

use super::catalog::recipe_cost;
use super::{EventOutcome, Florist, read_stock_items, require_event};
use crate::error::ServiceResult;
use crate::ledger::{self, LedgerOp};
use crate::store::{Store, StoreTx};

/// A line to add to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEventLine {
    pub kind: EventLineKind,
    pub quantity: i64,
    /// Overrides the captured cost. Defaults: the stock item's unit cost, the
    /// product's recipe cost, or zero for free-form lines.
    pub unit_cost: Option<Money>,
    pub notes: Option<String>,
}

fn resolve_unit_cost<T: StoreTx>(tx: &mut T, line: &AddEventLine) -> ServiceResult<Money> {
    if let Some(item_id) = line.kind.stock_item_id() {
        let items = read_stock_items(tx, [item_id])?;
        let Some(item) = items.get(item_id) else {
            return Err(DomainError::not_found(StockItem::KIND, item_id).into());
        };
        line.kind.check_category(item.category())?;
        return Ok(line.unit_cost.unwrap_or(item.unit_cost()));
    }
    match (&line.kind, line.unit_cost) {
        (_, Some(cost)) => Ok(cost),
        (EventLineKind::Product { product_id }, None) => {
            let product = tx
                .load_product(*product_id)?
                .ok_or_else(|| DomainError::not_found(Product::KIND, product_id))?;
            recipe_cost(tx, &product)
        }
        _ => Ok(Money::ZERO),
    }
}

fn pool_ops(
    lines: Vec<(StockItemId, i64)>,
    op: impl Fn(StockItemId, i64) -> LedgerOp,
) -> Vec<LedgerOp> {
    lines.into_iter().map(|(item, q)| op(item, q)).collect()
}

fn reserve(item_id: StockItemId, quantity: i64) -> LedgerOp {
    LedgerOp::Reserve {
        pool: ReservationPool::Events,
        item_id,
        quantity,
    }
}

fn release(item_id: StockItemId, quantity: i64) -> LedgerOp {
    LedgerOp::Release {
        pool: ReservationPool::Events,
        item_id,
        quantity,
    }
}

impl<S: Store> Florist<S> {
    /// Create an event in Quote. Nothing is reserved.
    #[instrument(skip(self, input), fields(event_id = %input.id), err)]
    pub fn create_event(&self, input: NewEvent) -> ServiceResult<Event> {
        let now = self.now();
        self.in_tx(|tx| {
            if tx.load_event(input.id)?.is_some() {
                return Err(
                    DomainError::conflict(format!("event {} already exists", input.id)).into(),
                );
            }
            let event = Event::create(input, now)?;
            tx.save_event(&event)?;
            info!(name = event.name(), "event quoted");
            Ok(event)
        })
    }

    /// Update header fields; totals are recomputed.
    #[instrument(skip(self, patch), fields(event_id = %event_id), err)]
    pub fn mutate_event(&self, event_id: EventId, patch: EventPatch) -> ServiceResult<Event> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut event = require_event(tx, event_id)?;
            event.apply_patch(patch)?;
            event.touch(now);
            tx.save_event(&event)?;
            Ok(event)
        })
    }

    /// Add a line. On a reserved event a ledger-backed line is reserved at once.
    #[instrument(skip(self, line), fields(event_id = %event_id, kind = line.kind.as_str()), err)]
    pub fn add_event_line(&self, event_id: EventId, line: AddEventLine) -> ServiceResult<EventOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut event = require_event(tx, event_id)?;
            let unit_cost = resolve_unit_cost(tx, &line)?;
            let added = event.add_line(NewEventLine {
                kind: line.kind,
                quantity: line.quantity,
                unit_cost,
                notes: line.notes,
            })?;

            let ops = match added.stock_item_id() {
                Some(item_id) if added.reserved => vec![reserve(item_id.clone(), added.quantity)],
                _ => Vec::new(),
            };
            let movements = ledger::apply(tx, ops)?;

            event.touch(now);
            tx.save_event(&event)?;
            Ok(EventOutcome { event, movements })
        })
    }

    /// Remove a line, releasing what it held.
    #[instrument(skip(self), fields(event_id = %event_id, line_id = %line_id), err)]
    pub fn remove_event_line(
        &self,
        event_id: EventId,
        line_id: EventLineId,
    ) -> ServiceResult<EventOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut event = require_event(tx, event_id)?;
            let removed = event.remove_line(line_id)?;

            let ops = match removed.stock_item_id() {
                Some(item_id) if removed.holds_reservation() => {
                    vec![release(item_id.clone(), removed.quantity)]
                }
                _ => Vec::new(),
            };
            let movements = ledger::apply(tx, ops)?;

            event.touch(now);
            tx.save_event(&event)?;
            Ok(EventOutcome { event, movements })
        })
    }

    /// Reserve every ledger-backed line. Any shortage aborts the whole
    /// reservation and is reported with the others.
    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub fn event_reserve_inputs(&self, event_id: EventId) -> ServiceResult<EventOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut event = require_event(tx, event_id)?;
            let ops = pool_ops(event.reservation_plan()?, reserve);
            let movements = ledger::apply(tx, ops).inspect_err(|err| {
                if let Some(domain) = err.domain() {
                    warn!(shortages = domain.shortages().len(), "event reservation rejected");
                }
            })?;

            event.mark_reserved();
            event.touch(now);
            tx.save_event(&event)?;
            info!(movements = movements.len(), "event stock reserved");
            Ok(EventOutcome { event, movements })
        })
    }

    /// Turn the event's reservations into consumptions, in full.
    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub fn event_consume_stock(&self, event_id: EventId) -> ServiceResult<EventOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut event = require_event(tx, event_id)?;
            let ops = pool_ops(event.consumption_plan()?, |item_id, quantity| {
                LedgerOp::Consume {
                    pool: ReservationPool::Events,
                    item_id,
                    used: quantity,
                    reserved_previously: quantity,
                }
            });
            let movements = ledger::apply(tx, ops)?;

            event.mark_consumed();
            event.touch(now);
            tx.save_event(&event)?;
            info!(movements = movements.len(), "event stock consumed");
            Ok(EventOutcome { event, movements })
        })
    }

    /// Bring the material back. `missing` maps line ids to units that did not
    /// come back; unlisted lines came back in full.
    #[instrument(skip(self, missing), fields(event_id = %event_id), err)]
    pub fn event_mark_returned(
        &self,
        event_id: EventId,
        missing: BTreeMap<EventLineId, i64>,
    ) -> ServiceResult<EventOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut event = require_event(tx, event_id)?;
            let returns = event.plan_return(&missing)?;
            let ops = returns
                .iter()
                .filter(|r| r.returned() > 0)
                .map(|r| LedgerOp::Return {
                    item_id: r.stock_item_id.clone(),
                    quantity: r.returned(),
                })
                .collect();
            let movements = ledger::apply(tx, ops)?;

            event.apply_return(&returns);
            event.touch(now);
            tx.save_event(&event)?;
            if event.has_shortages() {
                let lost: i64 = returns.iter().map(|r| r.missing).sum();
                warn!(lost, "event returned with shortages");
            } else {
                info!("event returned in full");
            }
            Ok(EventOutcome { event, movements })
        })
    }

    /// Move an event along its lifecycle. Moving a reserved event back below
    /// Confirmed releases its reservations.
    #[instrument(skip(self), fields(event_id = %event_id, to = %to), err)]
    pub fn transition_event_state(
        &self,
        event_id: EventId,
        to: EventState,
    ) -> ServiceResult<EventOutcome> {
        let now = self.now();
        self.in_tx(|tx| {
            let mut event = require_event(tx, event_id)?;
            let from = event.state();

            let movements = match event.plan_transition(to)? {
                EventTransition::NoOp => {
                    return Ok(EventOutcome {
                        event,
                        movements: Vec::new(),
                    });
                }
                EventTransition::Advance | EventTransition::Rewind { release: false } => Vec::new(),
                EventTransition::Rewind { release: true } => {
                    let movements = ledger::apply(tx, pool_ops(event.release_plan(), release))?;
                    event.clear_reservations();
                    movements
                }
            };

            event.set_state(to);
            event.touch(now);
            tx.save_event(&event)?;
            info!(%from, %to, "event state changed");
            Ok(EventOutcome { event, movements })
        })
    }

    pub fn get_event(&self, event_id: EventId) -> ServiceResult<Event> {
        self.in_tx(|tx| require_event(tx, event_id))
    }
}
