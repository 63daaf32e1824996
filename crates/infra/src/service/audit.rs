//! Reservation audit: recompute the reservation counters from the lines that
//! own them and report every item whose recorded counter differs.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{instrument, warn};

use florist_core::{Entity, StockItemId};
use florist_inventory::ReservationPool;
use florist_orders::OrderState;

use super::Florist;
use crate::error::ServiceResult;
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationDrift {
    pub item_id: StockItemId,
    pub counter: ReservationPool,
    pub recorded: i64,
    pub expected: i64,
}

#[derive(Default)]
struct Tally {
    orders: i64,
    events: i64,
}

impl<S: Store> Florist<S> {
    /// Empty when every `reserved_for_orders` equals the pending order lines
    /// of live orders and every `reserved_for_events` equals the event lines
    /// still holding a reservation.
    #[instrument(skip(self), err)]
    pub fn audit_reservations(&self) -> ServiceResult<Vec<ReservationDrift>> {
        self.in_tx(|tx| {
            let mut expected: BTreeMap<StockItemId, Tally> = BTreeMap::new();
            for order in tx.list_orders(None)? {
                if order.state() == OrderState::Cancelled {
                    continue;
                }
                for line in order.pending_lines() {
                    expected.entry(line.stock_item_id.clone()).or_default().orders += line.quantity;
                }
            }
            for event in tx.list_events()? {
                for (line, item_id) in event.ledger_lines() {
                    if line.holds_reservation() {
                        expected.entry(item_id.clone()).or_default().events += line.quantity;
                    }
                }
            }

            let mut recorded: BTreeMap<StockItemId, Tally> = BTreeMap::new();
            for item in tx.list_stock_items(None)? {
                recorded.insert(
                    item.id().clone(),
                    Tally {
                        orders: item.reserved_for_orders(),
                        events: item.reserved_for_events(),
                    },
                );
            }

            let mut ids: Vec<&StockItemId> = expected.keys().chain(recorded.keys()).collect();
            ids.sort();
            ids.dedup();

            let zero = Tally::default();
            let mut drifts = Vec::new();
            for id in ids {
                let want = expected.get(id).unwrap_or(&zero);
                let have = recorded.get(id).unwrap_or(&zero);
                for (counter, recorded_n, expected_n) in [
                    (ReservationPool::Orders, have.orders, want.orders),
                    (ReservationPool::Events, have.events, want.events),
                ] {
                    if recorded_n != expected_n {
                        drifts.push(ReservationDrift {
                            item_id: id.clone(),
                            counter,
                            recorded: recorded_n,
                            expected: expected_n,
                        });
                    }
                }
            }

            if !drifts.is_empty() {
                warn!(drifts = drifts.len(), "reservation counters drifted");
            }
            Ok(drifts)
        })
    }
}
