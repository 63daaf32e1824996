use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use florist_core::{DomainError, DomainResult, StockItemId, ValueObject};

/// One input of a product's recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeLine {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    /// Display unit ("stem", "bunch", "piece").
    pub unit: String,
    /// Optional inputs (greenery, ribbon) are only captured on request.
    pub optional: bool,
}

impl ValueObject for RecipeLine {}

/// A quantity of a stock item required by an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeInput {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
}

/// Ordered, validated list of recipe lines.
///
/// Invariant: positive quantities and at most one line per stock item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RecipeLine>", into = "Vec<RecipeLine>")]
pub struct Recipe {
    lines: Vec<RecipeLine>,
}

impl Recipe {
    pub fn new(lines: Vec<RecipeLine>) -> DomainResult<Self> {
        let mut seen = HashSet::with_capacity(lines.len());
        for line in &lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "recipe quantity for {} must be positive",
                    line.stock_item_id
                )));
            }
            if !seen.insert(&line.stock_item_id) {
                return Err(DomainError::validation(format!(
                    "stock item {} appears more than once in the recipe",
                    line.stock_item_id
                )));
            }
        }
        Ok(Self { lines })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[RecipeLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn stock_item_ids(&self) -> impl Iterator<Item = &StockItemId> {
        self.lines.iter().map(|l| &l.stock_item_id)
    }

    /// Inputs needed for `units` copies of the product, in recipe order.
    pub fn expand(&self, units: i64, include_optional: bool) -> DomainResult<Vec<RecipeInput>> {
        if units <= 0 {
            return Err(DomainError::validation("units must be positive"));
        }
        Ok(self
            .lines
            .iter()
            .filter(|l| include_optional || !l.optional)
            .map(|l| RecipeInput {
                stock_item_id: l.stock_item_id.clone(),
                quantity: l.quantity.saturating_mul(units),
            })
            .collect())
    }
}

impl TryFrom<Vec<RecipeLine>> for Recipe {
    type Error = DomainError;

    fn try_from(value: Vec<RecipeLine>) -> Result<Self, Self::Error> {
        Recipe::new(value)
    }
}

impl From<Recipe> for Vec<RecipeLine> {
    fn from(value: Recipe) -> Self {
        value.lines
    }
}
