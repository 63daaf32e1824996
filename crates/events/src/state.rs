use serde::{Deserialize, Serialize};

use florist_core::{DomainError, DomainResult};

/// Event lifecycle.
///
/// ```text
/// Quote -> ProposalSent -> Confirmed -> InPreparation -> AtEvent -> Finished -> Returned
/// ```
///
/// Returned is only reached through the return operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Quote,
    ProposalSent,
    Confirmed,
    InPreparation,
    AtEvent,
    Finished,
    Returned,
}

/// Stock flags of an event, as far as the state machine cares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStockStatus {
    pub reserved: bool,
    pub consumed: bool,
    pub has_ledger_lines: bool,
}

/// What a legal transition requires from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTransition {
    NoOp,
    /// One step forward; no stock effect.
    Advance,
    /// Backwards move. `release` drops the event's reservations.
    Rewind { release: bool },
}

impl EventState {
    pub const ALL: [EventState; 7] = [
        EventState::Quote,
        EventState::ProposalSent,
        EventState::Confirmed,
        EventState::InPreparation,
        EventState::AtEvent,
        EventState::Finished,
        EventState::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Quote => "quote",
            EventState::ProposalSent => "proposal_sent",
            EventState::Confirmed => "confirmed",
            EventState::InPreparation => "in_preparation",
            EventState::AtEvent => "at_event",
            EventState::Finished => "finished",
            EventState::Returned => "returned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    fn next(self) -> Option<EventState> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// States in which stock may be reserved for the event.
    pub fn can_reserve(&self) -> bool {
        matches!(self, EventState::Confirmed | EventState::InPreparation)
    }

    /// States from which the material can come back.
    pub fn can_return(&self) -> bool {
        matches!(self, EventState::AtEvent | EventState::Finished)
    }

    /// Decide whether `self -> to` is legal and what it requires.
    pub fn plan_transition(
        self,
        to: EventState,
        stock: EventStockStatus,
    ) -> DomainResult<EventTransition> {
        if self == to {
            return Ok(EventTransition::NoOp);
        }
        let reject = |reason: &str| Err(DomainError::invalid_transition(self, to, reason));

        if self == EventState::Returned {
            return reject("returned events are final");
        }
        if to == EventState::Returned {
            return reject("material comes back through the return operation");
        }

        if to > self {
            if self.next() != Some(to) {
                return reject("events advance one step at a time");
            }
            if to == EventState::AtEvent && stock.has_ledger_lines && !stock.consumed {
                return reject("stock must be consumed before leaving for the event");
            }
            return Ok(EventTransition::Advance);
        }

        if stock.consumed {
            return reject("stock was already consumed; the event must be returned");
        }
        Ok(EventTransition::Rewind {
            release: stock.reserved && to < EventState::Confirmed,
        })
    }
}

impl core::fmt::Display for EventState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
