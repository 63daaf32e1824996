use serde::{Deserialize, Serialize};

use florist_core::{DomainError, DomainResult, Entity, Money, ProductId};

use crate::recipe::{Recipe, RecipeInput};

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Archived,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ProductStatus::Active),
            "archived" => Some(ProductStatus::Archived),
            _ => None,
        }
    }
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    pub sale_price: Money,
}

/// A sellable arrangement and its recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    category: String,
    sale_price: Money,
    status: ProductStatus,
    recipe: Recipe,
}

impl Entity for Product {
    type Id = ProductId;
    const KIND: &'static str = "product";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Product {
    pub fn create(input: NewProduct) -> DomainResult<Self> {
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if input.sale_price.is_negative() {
            return Err(DomainError::validation("sale price cannot be negative"));
        }
        Ok(Self {
            id: input.id,
            name: input.name,
            category: input.category,
            sale_price: input.sale_price,
            status: ProductStatus::Active,
            recipe: Recipe::empty(),
        })
    }

    /// Rebuild from persisted state.
    pub fn restore(input: NewProduct, status: ProductStatus, recipe: Recipe) -> DomainResult<Self> {
        let mut product = Self::create(input)?;
        product.status = status;
        product.recipe = recipe;
        Ok(product)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn sale_price(&self) -> Money {
        self.sale_price
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Archived products stay readable for old orders but cannot be ordered.
    pub fn can_be_ordered(&self) -> bool {
        self.status == ProductStatus::Active
    }

    pub fn archive(&mut self) {
        self.status = ProductStatus::Archived;
    }

    /// Replace the recipe wholesale.
    pub fn set_recipe(&mut self, recipe: Recipe) {
        self.recipe = recipe;
    }

    /// Inputs to capture on a new order for `units` copies of this product.
    pub fn order_inputs(&self, units: i64, include_optional: bool) -> DomainResult<Vec<RecipeInput>> {
        if !self.can_be_ordered() {
            return Err(DomainError::invariant(format!(
                "product {} is archived and cannot be ordered",
                self.id
            )));
        }
        self.recipe.expand(units, include_optional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::RecipeLine;
    use florist_core::StockItemId;

    fn bouquet() -> Product {
        Product::create(NewProduct {
            id: ProductId::new(),
            name: "Spring bouquet".to_string(),
            category: "bouquet".to_string(),
            sale_price: Money::from_cents(4_500),
        })
        .unwrap()
    }

    #[test]
    fn new_products_are_active_with_empty_recipe() {
        let product = bouquet();
        assert!(product.can_be_ordered());
        assert!(product.recipe().is_empty());
        assert!(product.order_inputs(1, false).unwrap().is_empty());
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = Product::create(NewProduct {
            id: ProductId::new(),
            name: "  ".to_string(),
            category: "bouquet".to_string(),
            sale_price: Money::ZERO,
        })
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn archived_products_cannot_seed_orders() {
        let mut product = bouquet();
        product.set_recipe(
            Recipe::new(vec![RecipeLine {
                stock_item_id: StockItemId::new("tulip"),
                quantity: 10,
                unit: "stem".to_string(),
                optional: false,
            }])
            .unwrap(),
        );
        product.archive();
        assert!(matches!(
            product.order_inputs(1, false),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn status_round_trips_through_its_column_value() {
        for s in [ProductStatus::Active, ProductStatus::Archived] {
            assert_eq!(ProductStatus::parse(s.as_str()), Some(s));
        }
    }
}
