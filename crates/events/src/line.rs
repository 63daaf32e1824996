use serde::{Deserialize, Serialize};

use florist_core::{DomainError, DomainResult, EventId, EventLineId, Money, ProductId, StockItemId};
use florist_inventory::StockCategory;

/// What an event line refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventLineKind {
    Flower { stock_item_id: StockItemId },
    Container { stock_item_id: StockItemId },
    EventProp { stock_item_id: StockItemId },
    /// Cost only; the product's inputs are not reserved.
    Product { product_id: ProductId },
    /// Cost only (hired marquee, candles bought for the day).
    FreeForm { name: String },
}

impl EventLineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLineKind::Flower { .. } => "flower",
            EventLineKind::Container { .. } => "container",
            EventLineKind::EventProp { .. } => "event_prop",
            EventLineKind::Product { .. } => "product",
            EventLineKind::FreeForm { .. } => "free_form",
        }
    }

    /// The stock item this line reserves against, if any.
    pub fn stock_item_id(&self) -> Option<&StockItemId> {
        match self {
            EventLineKind::Flower { stock_item_id }
            | EventLineKind::Container { stock_item_id }
            | EventLineKind::EventProp { stock_item_id } => Some(stock_item_id),
            EventLineKind::Product { .. } | EventLineKind::FreeForm { .. } => None,
        }
    }

    pub fn is_ledger_backed(&self) -> bool {
        self.stock_item_id().is_some()
    }

    /// Category the referenced stock item must belong to.
    pub fn stock_category(&self) -> Option<StockCategory> {
        match self {
            EventLineKind::Flower { .. } => Some(StockCategory::Flower),
            EventLineKind::Container { .. } => Some(StockCategory::Container),
            EventLineKind::EventProp { .. } => Some(StockCategory::EventProp),
            EventLineKind::Product { .. } | EventLineKind::FreeForm { .. } => None,
        }
    }

    /// Fails unless `category` matches what this kind of line expects.
    pub fn check_category(&self, category: StockCategory) -> DomainResult<()> {
        match self.stock_category() {
            Some(expected) if expected != category => Err(DomainError::validation(format!(
                "{} line cannot reference a {} stock item",
                self.as_str(),
                category.as_str()
            ))),
            _ => Ok(()),
        }
    }
}

/// Persisted shape of an [`EventLineKind`]: a discriminator plus nullable
/// reference columns, exactly one of which is set for each kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLineRow {
    pub kind: String,
    pub stock_item_id: Option<String>,
    pub product_id: Option<ProductId>,
    pub name: Option<String>,
}

impl From<&EventLineKind> for EventLineRow {
    fn from(kind: &EventLineKind) -> Self {
        let mut row = EventLineRow {
            kind: kind.as_str().to_string(),
            ..Default::default()
        };
        match kind {
            EventLineKind::Flower { stock_item_id }
            | EventLineKind::Container { stock_item_id }
            | EventLineKind::EventProp { stock_item_id } => {
                row.stock_item_id = Some(stock_item_id.to_string());
            }
            EventLineKind::Product { product_id } => row.product_id = Some(*product_id),
            EventLineKind::FreeForm { name } => row.name = Some(name.clone()),
        }
        row
    }
}

impl TryFrom<EventLineRow> for EventLineKind {
    type Error = DomainError;

    fn try_from(row: EventLineRow) -> Result<Self, Self::Error> {
        let malformed = || {
            DomainError::invariant(format!(
                "event line row of kind {} has the wrong reference columns",
                row.kind
            ))
        };
        let kind = match (
            row.kind.as_str(),
            &row.stock_item_id,
            &row.product_id,
            &row.name,
        ) {
            ("flower", Some(id), None, None) => EventLineKind::Flower {
                stock_item_id: StockItemId::new(id.as_str()),
            },
            ("container", Some(id), None, None) => EventLineKind::Container {
                stock_item_id: StockItemId::new(id.as_str()),
            },
            ("event_prop", Some(id), None, None) => EventLineKind::EventProp {
                stock_item_id: StockItemId::new(id.as_str()),
            },
            ("product", None, Some(id), None) => EventLineKind::Product { product_id: *id },
            ("free_form", None, None, Some(name)) => EventLineKind::FreeForm { name: name.clone() },
            _ => return Err(malformed()),
        };
        Ok(kind)
    }
}

/// Input for adding a line to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEventLine {
    pub kind: EventLineKind,
    pub quantity: i64,
    /// Cost per unit; resolved by the caller (stock item cost, recipe cost,
    /// or a free-form price).
    pub unit_cost: Money,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLine {
    pub id: EventLineId,
    pub event_id: EventId,
    pub kind: EventLineKind,
    pub quantity: i64,
    pub unit_cost: Money,
    pub total_cost: Money,
    pub reserved: bool,
    pub consumed: bool,
    pub returned: bool,
    pub missing_quantity: i64,
    pub notes: Option<String>,
}

impl EventLine {
    pub fn new(event_id: EventId, input: NewEventLine) -> DomainResult<Self> {
        if input.quantity <= 0 {
            return Err(DomainError::validation("event line quantity must be positive"));
        }
        if input.unit_cost.is_negative() {
            return Err(DomainError::validation("event line cost cannot be negative"));
        }
        if let EventLineKind::FreeForm { name } = &input.kind {
            if name.trim().is_empty() {
                return Err(DomainError::validation("free-form lines need a name"));
            }
        }
        Ok(Self {
            id: EventLineId::new(),
            event_id,
            total_cost: input.unit_cost.times(input.quantity),
            kind: input.kind,
            quantity: input.quantity,
            unit_cost: input.unit_cost,
            reserved: false,
            consumed: false,
            returned: false,
            missing_quantity: 0,
            notes: input.notes,
        })
    }

    pub fn stock_item_id(&self) -> Option<&StockItemId> {
        self.kind.stock_item_id()
    }

    /// Whether this line currently holds units in `reserved_for_events`.
    pub fn holds_reservation(&self) -> bool {
        self.reserved && !self.consumed && !self.returned
    }
}
