use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use florist_core::{DomainError, DomainResult};

/// Orders whose fulfilment date is further in the past than this are left
/// alone by the date sweep.
pub const RECLASSIFY_LOOKBACK_DAYS: u64 = 30;

/// Order state lifecycle.
///
/// ```text
/// Week <-> Tomorrow <-> Today <-> Workshop -> {ReadyToDispatch | PickupAtStore} -> Dispatched
/// any state -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Week,
    Tomorrow,
    Today,
    Workshop,
    ReadyToDispatch,
    PickupAtStore,
    Dispatched,
    Cancelled,
}

/// What a legal transition requires from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    /// Same state requested.
    NoOp,
    /// Move among the pre-dispatch states; no stock effect.
    Reschedule,
    /// Workshop finished: convert reservations into consumptions.
    Consume,
    /// Back from a post-workshop state with nothing consumed; no stock effect.
    Regress,
    /// Ready-to-dispatch and pickup are interchangeable; no stock effect.
    SwitchFulfilment,
    /// Goods left the shop; no stock effect.
    Dispatch,
    /// Release reservations and return consumed units.
    Cancel,
}

impl OrderState {
    pub const ALL: [OrderState; 8] = [
        OrderState::Week,
        OrderState::Tomorrow,
        OrderState::Today,
        OrderState::Workshop,
        OrderState::ReadyToDispatch,
        OrderState::PickupAtStore,
        OrderState::Dispatched,
        OrderState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Week => "week",
            OrderState::Tomorrow => "tomorrow",
            OrderState::Today => "today",
            OrderState::Workshop => "workshop",
            OrderState::ReadyToDispatch => "ready_to_dispatch",
            OrderState::PickupAtStore => "pickup_at_store",
            OrderState::Dispatched => "dispatched",
            OrderState::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Week, Tomorrow, Today: views of the fulfilment date.
    pub fn is_scheduling(&self) -> bool {
        matches!(self, OrderState::Week | OrderState::Tomorrow | OrderState::Today)
    }

    pub fn is_urgent(&self) -> bool {
        matches!(self, OrderState::Tomorrow | OrderState::Today)
    }

    /// States in which inputs may still be edited.
    pub fn is_pre_dispatch(&self) -> bool {
        self.is_scheduling() || *self == OrderState::Workshop
    }

    /// States reached by finishing the workshop.
    pub fn is_post_workshop(&self) -> bool {
        matches!(self, OrderState::ReadyToDispatch | OrderState::PickupAtStore)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Dispatched | OrderState::Cancelled)
    }

    /// Scheduling state for a fulfilment date as seen on `today`.
    pub fn for_fulfilment_date(fulfilment: NaiveDate, today: NaiveDate) -> OrderState {
        if fulfilment <= today {
            OrderState::Today
        } else if today.checked_add_days(Days::new(1)) == Some(fulfilment) {
            OrderState::Tomorrow
        } else {
            OrderState::Week
        }
    }

    /// Decide whether `self -> to` is legal and what it requires.
    ///
    /// `has_consumed_lines` blocks regressions out of the post-workshop states.
    pub fn plan_transition(
        self,
        to: OrderState,
        has_consumed_lines: bool,
    ) -> DomainResult<OrderTransition> {
        use OrderState::*;

        if self == to {
            return Ok(OrderTransition::NoOp);
        }
        let reject = |reason: &str| Err(DomainError::invalid_transition(self, to, reason));

        match (self, to) {
            (Cancelled, _) => reject("cancelled orders are final"),
            (_, Cancelled) => Ok(OrderTransition::Cancel),
            (Dispatched, _) => reject("dispatched orders can only be cancelled"),
            (from, to) if from.is_pre_dispatch() && to.is_pre_dispatch() => {
                Ok(OrderTransition::Reschedule)
            }
            (Workshop, to) if to.is_post_workshop() => Ok(OrderTransition::Consume),
            (from, to) if from.is_scheduling() && to.is_post_workshop() => {
                reject("orders must go through the workshop first")
            }
            (from, to) if from.is_post_workshop() && to.is_post_workshop() => {
                Ok(OrderTransition::SwitchFulfilment)
            }
            (from, to) if from.is_post_workshop() && to.is_pre_dispatch() => {
                if has_consumed_lines {
                    reject("inputs were already consumed in the workshop")
                } else {
                    Ok(OrderTransition::Regress)
                }
            }
            (from, Dispatched) if from.is_post_workshop() => Ok(OrderTransition::Dispatch),
            _ => reject("transition not allowed"),
        }
    }

    /// Target of the periodic date sweep, if the order should move.
    ///
    /// Scheduling states follow their fulfilment date both ways. A Workshop
    /// order only moves when the date has become urgent (Tomorrow or Today),
    /// never back to Week. Post-workshop states hold consumed stock and are
    /// never reclassified; neither are terminal states nor orders more than
    /// `lookback_days` overdue.
    pub fn reclassified(
        self,
        fulfilment: NaiveDate,
        today: NaiveDate,
        lookback_days: u64,
    ) -> Option<OrderState> {
        if !self.is_pre_dispatch() {
            return None;
        }
        let cutoff = today.checked_sub_days(Days::new(lookback_days))?;
        if fulfilment < cutoff {
            return None;
        }
        let target = OrderState::for_fulfilment_date(fulfilment, today);
        if target == self {
            return None;
        }
        (self.is_scheduling() || target.is_urgent()).then_some(target)
    }
}

impl core::fmt::Display for OrderState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
