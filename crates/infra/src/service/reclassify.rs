//! Date-driven reclassification of scheduling and workshop states.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, instrument};

use florist_core::{Entity, OrderId};
use florist_orders::OrderState;

use super::Florist;
use crate::error::ServiceResult;
use crate::store::{Store, StoreTx};

const SWEPT: [OrderState; 4] = [
    OrderState::Week,
    OrderState::Tomorrow,
    OrderState::Today,
    OrderState::Workshop,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reclassified {
    pub order_id: OrderId,
    pub from: OrderState,
    pub to: OrderState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclassifyReport {
    /// Orders in a scheduling or workshop state when the sweep ran.
    pub examined: usize,
    pub moved: Vec<Reclassified>,
}

impl<S: Store> Florist<S> {
    /// Move scheduling-state orders to the state their fulfilment date calls
    /// for as of `today`, and workshop orders whose date has become urgent. Running it twice for the same day moves nothing the
    /// second time.
    #[instrument(skip(self), err)]
    pub fn reclassify_orders_by_date(&self, today: NaiveDate) -> ServiceResult<ReclassifyReport> {
        let now = self.now();
        let lookback = self.lookback_days;
        self.in_tx(|tx| {
            let orders = tx.list_orders(Some(SWEPT.as_slice()))?;
            let mut report = ReclassifyReport {
                examined: orders.len(),
                moved: Vec::new(),
            };

            for mut order in orders {
                let from = order.state();
                let Some(to) = from.reclassified(order.fulfilment_date(), today, lookback) else {
                    continue;
                };
                order.set_state(to);
                order.touch(now);
                tx.save_order(&order)?;
                debug!(order_id = %order.id(), %from, %to, "order reclassified");
                report.moved.push(Reclassified {
                    order_id: *order.id(),
                    from,
                    to,
                });
            }

            info!(
                examined = report.examined,
                moved = report.moved.len(),
                "reclassification sweep finished"
            );
            Ok(report)
        })
    }

    /// Sweep as of the service clock's current date.
    pub fn reclassify_due_orders(&self) -> ServiceResult<ReclassifyReport> {
        self.reclassify_orders_by_date(self.now().date_naive())
    }
}
