use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use florist_core::{
    AggregateRoot, CustomerId, DomainError, DomainResult, Entity, EventId, EventLineId, Money,
    StockItemId,
};

use crate::line::{EventLine, NewEventLine};
use crate::state::{EventState, EventStockStatus, EventTransition};

/// Input for creating a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub id: EventId,
    pub customer_id: CustomerId,
    pub event_date: NaiveDate,
    pub name: String,
    pub venue: Option<String>,
    pub notes: Option<String>,
    pub labour_cost: Money,
    pub transport_cost: Money,
    pub other_cost: Money,
    pub margin_bps: u32,
    pub deposit: Money,
}

/// Partial update of an event's header. `None` leaves a field untouched;
/// the nested options clear a field with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPatch {
    pub event_date: Option<NaiveDate>,
    pub name: Option<String>,
    pub venue: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub labour_cost: Option<Money>,
    pub transport_cost: Option<Money>,
    pub other_cost: Option<Money>,
    pub margin_bps: Option<u32>,
    pub final_price: Option<Option<Money>>,
    pub deposit: Option<Money>,
}

/// One ledger-backed line's share of a return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineReturn {
    pub line_id: EventLineId,
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub missing: i64,
}

impl LineReturn {
    /// Units going back on the shelf.
    pub fn returned(&self) -> i64 {
        self.quantity - self.missing
    }
}

/// Aggregate root: Event.
///
/// The cost rollup (`cost_inputs`, `cost_total`, `proposal_price`,
/// `balance`) is stored and recomputed after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    customer_id: CustomerId,
    event_date: NaiveDate,
    name: String,
    venue: Option<String>,
    notes: Option<String>,
    state: EventState,
    labour_cost: Money,
    transport_cost: Money,
    other_cost: Money,
    margin_bps: u32,
    final_price: Option<Money>,
    deposit: Money,
    cost_inputs: Money,
    cost_total: Money,
    proposal_price: Money,
    balance: Money,
    reserved: bool,
    stock_consumed: bool,
    has_shortages: bool,
    lines: Vec<EventLine>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Entity for Event {
    type Id = EventId;
    const KIND: &'static str = "event";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl AggregateRoot for Event {
    fn version(&self) -> u64 {
        self.version
    }
}

/// Stock flags and state persisted alongside the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStatus {
    pub state: EventState,
    pub final_price: Option<Money>,
    pub reserved: bool,
    pub stock_consumed: bool,
    pub has_shortages: bool,
}

impl Event {
    pub fn create(input: NewEvent, now: DateTime<Utc>) -> DomainResult<Self> {
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("event name cannot be empty"));
        }
        let mut event = Self {
            id: input.id,
            customer_id: input.customer_id,
            event_date: input.event_date,
            name: input.name,
            venue: input.venue,
            notes: input.notes,
            state: EventState::Quote,
            labour_cost: input.labour_cost,
            transport_cost: input.transport_cost,
            other_cost: input.other_cost,
            margin_bps: input.margin_bps,
            final_price: None,
            deposit: input.deposit,
            cost_inputs: Money::ZERO,
            cost_total: Money::ZERO,
            proposal_price: Money::ZERO,
            balance: Money::ZERO,
            reserved: false,
            stock_consumed: false,
            has_shortages: false,
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        event.recompute()?;
        Ok(event)
    }

    /// Rebuild from persisted columns; the rollup is recomputed.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        input: NewEvent,
        status: EventStatus,
        lines: Vec<EventLine>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> DomainResult<Self> {
        let mut event = Self::create(input, created_at)?;
        event.state = status.state;
        event.final_price = status.final_price;
        event.reserved = status.reserved;
        event.stock_consumed = status.stock_consumed;
        event.has_shortages = status.has_shortages;
        event.lines = lines;
        event.updated_at = updated_at;
        event.version = version;
        event.recompute()?;
        Ok(event)
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn event_date(&self) -> NaiveDate {
        self.event_date
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn venue(&self) -> Option<&str> {
        self.venue.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn labour_cost(&self) -> Money {
        self.labour_cost
    }

    pub fn transport_cost(&self) -> Money {
        self.transport_cost
    }

    pub fn other_cost(&self) -> Money {
        self.other_cost
    }

    pub fn margin_bps(&self) -> u32 {
        self.margin_bps
    }

    /// Agreed price, if one was set explicitly.
    pub fn final_price(&self) -> Option<Money> {
        self.final_price
    }

    /// Agreed price, falling back to the proposal.
    pub fn effective_price(&self) -> Money {
        self.final_price.unwrap_or(self.proposal_price)
    }

    pub fn deposit(&self) -> Money {
        self.deposit
    }

    pub fn cost_inputs(&self) -> Money {
        self.cost_inputs
    }

    pub fn cost_total(&self) -> Money {
        self.cost_total
    }

    pub fn proposal_price(&self) -> Money {
        self.proposal_price
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn reserved(&self) -> bool {
        self.reserved
    }

    pub fn stock_consumed(&self) -> bool {
        self.stock_consumed
    }

    pub fn has_shortages(&self) -> bool {
        self.has_shortages
    }

    pub fn lines(&self) -> &[EventLine] {
        &self.lines
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn status(&self) -> EventStatus {
        EventStatus {
            state: self.state,
            final_price: self.final_price,
            reserved: self.reserved,
            stock_consumed: self.stock_consumed,
            has_shortages: self.has_shortages,
        }
    }

    pub fn stock_status(&self) -> EventStockStatus {
        EventStockStatus {
            reserved: self.reserved,
            consumed: self.stock_consumed,
            has_ledger_lines: self.ledger_lines().next().is_some(),
        }
    }

    pub fn ledger_lines(&self) -> impl Iterator<Item = (&EventLine, &StockItemId)> {
        self.lines
            .iter()
            .filter_map(|l| l.stock_item_id().map(|item| (l, item)))
    }

    /// Quantity this event holds in `reserved_for_events` for `item`.
    pub fn reserved_quantity(&self, item: &StockItemId) -> i64 {
        self.ledger_lines()
            .filter(|(l, id)| *id == item && l.holds_reservation())
            .map(|(l, _)| l.quantity)
            .sum()
    }

    fn recompute(&mut self) -> DomainResult<()> {
        for (what, value) in [
            ("labour cost", self.labour_cost),
            ("transport cost", self.transport_cost),
            ("other cost", self.other_cost),
            ("deposit", self.deposit),
        ] {
            if value.is_negative() {
                return Err(DomainError::validation(format!("{what} cannot be negative")));
            }
        }
        if self.final_price.is_some_and(Money::is_negative) {
            return Err(DomainError::validation("final price cannot be negative"));
        }

        self.cost_inputs = self.lines.iter().map(|l| l.total_cost).sum();
        self.cost_total = self.cost_inputs + self.labour_cost + self.transport_cost + self.other_cost;
        self.proposal_price = self.cost_total.with_margin_bps(self.margin_bps).ok_or_else(|| {
            DomainError::validation(format!(
                "margin must be below 100% (got {} bps)",
                self.margin_bps
            ))
        })?;
        self.balance = self.effective_price() - self.deposit;
        Ok(())
    }

    pub fn apply_patch(&mut self, patch: EventPatch) -> DomainResult<()> {
        if self.state == EventState::Returned {
            return Err(DomainError::invariant("returned events cannot be changed"));
        }
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("event name cannot be empty"));
            }
            self.name = name;
        }
        if let Some(date) = patch.event_date {
            self.event_date = date;
        }
        if let Some(venue) = patch.venue {
            self.venue = venue;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
        if let Some(cost) = patch.labour_cost {
            self.labour_cost = cost;
        }
        if let Some(cost) = patch.transport_cost {
            self.transport_cost = cost;
        }
        if let Some(cost) = patch.other_cost {
            self.other_cost = cost;
        }
        if let Some(bps) = patch.margin_bps {
            self.margin_bps = bps;
        }
        if let Some(price) = patch.final_price {
            self.final_price = price;
        }
        if let Some(deposit) = patch.deposit {
            self.deposit = deposit;
        }
        self.recompute()
    }

    fn ensure_lines_editable(&self) -> DomainResult<()> {
        if self.stock_consumed || self.state == EventState::Returned {
            return Err(DomainError::invariant(format!(
                "lines of event {} are frozen once stock is consumed",
                self.id
            )));
        }
        Ok(())
    }

    /// Add a line. On an event that already holds its reservations, a
    /// ledger-backed line is marked reserved and the caller must reserve it.
    pub fn add_line(&mut self, input: NewEventLine) -> DomainResult<&EventLine> {
        self.ensure_lines_editable()?;
        let mut line = EventLine::new(self.id, input)?;
        line.reserved = self.reserved && line.kind.is_ledger_backed();
        self.lines.push(line);
        self.recompute()?;
        let idx = self.lines.len() - 1;
        Ok(&self.lines[idx])
    }

    /// Remove a line and hand it back so the caller can release what it held.
    pub fn remove_line(&mut self, line_id: EventLineId) -> DomainResult<EventLine> {
        self.ensure_lines_editable()?;
        let idx = self
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| DomainError::not_found("event line", line_id))?;
        let line = self.lines.remove(idx);
        self.recompute()?;
        Ok(line)
    }

    pub fn plan_transition(&self, to: EventState) -> DomainResult<EventTransition> {
        self.state.plan_transition(to, self.stock_status())
    }

    /// Ledger-backed quantities to reserve, in line order.
    pub fn reservation_plan(&self) -> DomainResult<Vec<(StockItemId, i64)>> {
        if !self.state.can_reserve() {
            return Err(DomainError::invariant(format!(
                "events are reserved once confirmed (state is {})",
                self.state
            )));
        }
        if self.reserved || self.stock_consumed {
            return Err(DomainError::conflict(format!(
                "event {} already holds its stock",
                self.id
            )));
        }
        Ok(self
            .ledger_lines()
            .map(|(l, item)| (item.clone(), l.quantity))
            .collect())
    }

    pub fn mark_reserved(&mut self) {
        self.reserved = true;
        for line in self.lines.iter_mut().filter(|l| l.kind.is_ledger_backed()) {
            line.reserved = true;
        }
    }

    /// Reservations to drop when the event moves back below Confirmed.
    pub fn release_plan(&self) -> Vec<(StockItemId, i64)> {
        self.ledger_lines()
            .filter(|(l, _)| l.holds_reservation())
            .map(|(l, item)| (item.clone(), l.quantity))
            .collect()
    }

    pub fn clear_reservations(&mut self) {
        self.reserved = false;
        for line in &mut self.lines {
            line.reserved = false;
        }
    }

    /// Quantities to consume; every reserved line is consumed in full.
    pub fn consumption_plan(&self) -> DomainResult<Vec<(StockItemId, i64)>> {
        if self.state != EventState::InPreparation {
            return Err(DomainError::invariant(format!(
                "stock is consumed while preparing the event (state is {})",
                self.state
            )));
        }
        if self.stock_consumed {
            return Err(DomainError::conflict(format!(
                "stock of event {} was already consumed",
                self.id
            )));
        }
        if !self.reserved {
            return Err(DomainError::invariant(format!(
                "event {} must reserve its stock before consuming it",
                self.id
            )));
        }
        Ok(self
            .ledger_lines()
            .map(|(l, item)| (item.clone(), l.quantity))
            .collect())
    }

    pub fn mark_consumed(&mut self) {
        self.stock_consumed = true;
        for line in self.lines.iter_mut().filter(|l| l.kind.is_ledger_backed()) {
            line.consumed = true;
        }
    }

    /// Work out what comes back. `missing` maps line ids to units that did
    /// not return; unlisted lines came back in full.
    pub fn plan_return(
        &self,
        missing: &BTreeMap<EventLineId, i64>,
    ) -> DomainResult<Vec<LineReturn>> {
        if !self.state.can_return() {
            return Err(DomainError::invalid_transition(
                self.state,
                EventState::Returned,
                "material comes back after the event",
            ));
        }
        let status = self.stock_status();
        if status.has_ledger_lines && !status.consumed {
            return Err(DomainError::invariant(format!(
                "event {} never consumed its stock",
                self.id
            )));
        }

        for (line_id, m) in missing {
            let line = self
                .lines
                .iter()
                .find(|l| &l.id == line_id)
                .ok_or_else(|| DomainError::not_found("event line", line_id))?;
            if !line.kind.is_ledger_backed() {
                return Err(DomainError::validation(format!(
                    "event line {line_id} does not hold stock"
                )));
            }
            if *m < 0 || *m > line.quantity {
                return Err(DomainError::validation(format!(
                    "missing quantity for line {line_id} must be between 0 and {}",
                    line.quantity
                )));
            }
        }

        Ok(self
            .ledger_lines()
            .map(|(l, item)| LineReturn {
                line_id: l.id,
                stock_item_id: item.clone(),
                quantity: l.quantity,
                missing: missing.get(&l.id).copied().unwrap_or(0),
            })
            .collect())
    }

    /// Record a booked return and close the event.
    pub fn apply_return(&mut self, returns: &[LineReturn]) {
        for r in returns {
            if let Some(line) = self.lines.iter_mut().find(|l| l.id == r.line_id) {
                line.returned = r.missing == 0;
                line.missing_quantity = r.missing;
                if r.missing > 0 {
                    self.has_shortages = true;
                }
            }
        }
        self.state = EventState::Returned;
    }

    pub fn set_state(&mut self, state: EventState) {
        self.state = state;
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
    use crate::line::EventLineKind;
    use florist_core::ProductId;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn quote(margin_bps: u32) -> Event {
        Event::create(
            NewEvent {
                id: EventId::new(),
                customer_id: CustomerId::new(),
                event_date: NaiveDate::from_ymd_opt(2026, 7, 4).unwrap(),
                name: "Garden wedding".to_string(),
                venue: Some("Old Mill".to_string()),
                notes: None,
                labour_cost: Money::from_cents(20_000),
                transport_cost: Money::from_cents(5_000),
                other_cost: Money::ZERO,
                margin_bps,
                deposit: Money::from_cents(10_000),
            },
            now(),
        )
        .unwrap()
    }

    fn flower(item: &str, quantity: i64, cents: i64) -> NewEventLine {
        NewEventLine {
            kind: EventLineKind::Flower { stock_item_id: StockItemId::new(item) },
            quantity,
            unit_cost: Money::from_cents(cents),
            notes: None,
        }
    }

    fn free_form(name: &str, cents: i64) -> NewEventLine {
        NewEventLine {
            kind: EventLineKind::FreeForm { name: name.to_string() },
            quantity: 1,
            unit_cost: Money::from_cents(cents),
            notes: None,
        }
    }

    fn to_preparation(event: &mut Event) {
        for s in [EventState::ProposalSent, EventState::Confirmed, EventState::InPreparation] {
            assert_eq!(event.plan_transition(s).unwrap(), EventTransition::Advance);
            event.set_state(s);
        }
    }

    #[test]
    fn rollup_follows_lines_and_buckets() {
        let mut event = quote(2_000);
        event.add_line(flower("peony", 50, 300)).unwrap();
        event.add_line(free_form("Candles", 5_000)).unwrap();

        assert_eq!(event.cost_inputs(), Money::from_cents(20_000));
        assert_eq!(event.cost_total(), Money::from_cents(45_000));
        // 45000 / 0.8
        assert_eq!(event.proposal_price(), Money::from_cents(56_250));
        assert_eq!(event.balance(), Money::from_cents(46_250));

        event
            .apply_patch(EventPatch {
                final_price: Some(Some(Money::from_cents(60_000))),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(event.balance(), Money::from_cents(50_000));
    }

    #[test]
    fn removing_a_line_updates_the_rollup() {
        let mut event = quote(0);
        let id = event.add_line(flower("peony", 10, 100)).unwrap().id;
        assert_eq!(event.cost_inputs(), Money::from_cents(1_000));
        let removed = event.remove_line(id).unwrap();
        assert_eq!(removed.quantity, 10);
        assert_eq!(event.cost_inputs(), Money::ZERO);
        assert!(event.remove_line(id).is_err());
    }

    #[test]
    fn full_margin_is_rejected() {
        let mut event = quote(0);
        let err = event
            .apply_patch(EventPatch {
                margin_bps: Some(10_000),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reservation_needs_confirmation() {
        let mut event = quote(0);
        event.add_line(flower("peony", 10, 100)).unwrap();
        assert!(event.reservation_plan().is_err());

        event.set_state(EventState::Confirmed);
        let plan = event.reservation_plan().unwrap();
        assert_eq!(plan, vec![(StockItemId::new("peony"), 10)]);
        event.mark_reserved();
        assert_eq!(event.reserved_quantity(&StockItemId::new("peony")), 10);
        assert!(matches!(event.reservation_plan(), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn lines_added_after_reservation_are_reserved() {
        let mut event = quote(0);
        event.set_state(EventState::Confirmed);
        event.mark_reserved();
        assert!(event.add_line(flower("rose", 4, 100)).unwrap().reserved);
        assert!(!event.add_line(free_form("Ribbon", 100)).unwrap().reserved);
        assert_eq!(event.release_plan(), vec![(StockItemId::new("rose"), 4)]);
    }

    #[test]
    fn consumption_freezes_lines() {
        let mut event = quote(0);
        event.add_line(flower("peony", 10, 100)).unwrap();
        to_preparation(&mut event);
        assert!(event.consumption_plan().is_err());
        event.mark_reserved();
        assert_eq!(event.consumption_plan().unwrap().len(), 1);
        event.mark_consumed();

        assert!(event.stock_status().consumed);
        assert_eq!(event.reserved_quantity(&StockItemId::new("peony")), 0);
        assert!(matches!(
            event.add_line(free_form("Late extra", 100)),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(event.plan_transition(EventState::Confirmed).is_err());
    }

    #[test]
    fn return_with_shortages() {
        let mut event = quote(0);
        let peony = event.add_line(flower("peony", 10, 100)).unwrap().id;
        let rose = event.add_line(flower("rose", 6, 100)).unwrap().id;
        event
            .add_line(NewEventLine {
                kind: EventLineKind::Product { product_id: ProductId::new() },
                quantity: 2,
                unit_cost: Money::from_cents(2_500),
                notes: None,
            })
            .unwrap();
        to_preparation(&mut event);
        event.mark_reserved();
        event.mark_consumed();
        event.set_state(EventState::AtEvent);

        let returns = event.plan_return(&BTreeMap::from([(peony, 2)])).unwrap();
        assert_eq!(returns.len(), 2);
        let by_line: BTreeMap<_, _> = returns.iter().map(|r| (r.line_id, r.returned())).collect();
        assert_eq!(by_line[&peony], 8);
        assert_eq!(by_line[&rose], 6);

        event.apply_return(&returns);
        assert_eq!(event.state(), EventState::Returned);
        assert!(event.has_shortages());
        let peony_line = event.lines().iter().find(|l| l.id == peony).unwrap();
        assert!(!peony_line.returned);
        assert_eq!(peony_line.missing_quantity, 2);
        assert!(event.lines().iter().find(|l| l.id == rose).unwrap().returned);
    }

    #[test]
    fn return_validates_missing_quantities() {
        let mut event = quote(0);
        let peony = event.add_line(flower("peony", 10, 100)).unwrap().id;
        let candles = event.add_line(free_form("Candles", 100)).unwrap().id;
        to_preparation(&mut event);
        event.mark_reserved();
        assert!(event.plan_return(&BTreeMap::new()).is_err());
        event.mark_consumed();
        event.set_state(EventState::AtEvent);

        assert!(event.plan_return(&BTreeMap::from([(peony, 11)])).is_err());
        assert!(event.plan_return(&BTreeMap::from([(peony, -1)])).is_err());
        assert!(event.plan_return(&BTreeMap::from([(candles, 1)])).is_err());
        assert!(matches!(
            event.plan_return(&BTreeMap::from([(EventLineId::new(), 1)])),
            Err(DomainError::NotFound { .. })
        ));
    }
}
