//! Stock administration and the recipe catalog.

use tracing::{info, instrument};

use florist_core::{DomainError, Entity, Money, ProductId, StockItemId};
use florist_inventory::{NewStockItem, StockCategory, StockItem, StockMovement};
use florist_products::{NewProduct, Product, Recipe, RecipeLine};

use super::{Florist, read_stock_items, require_stock_item};
use crate::error::ServiceResult;
use crate::store::{Store, StoreTx};

fn require_product<T: StoreTx>(tx: &mut T, id: ProductId) -> ServiceResult<Product> {
    tx.load_product(id)?
        .ok_or_else(|| DomainError::not_found(Product::KIND, id).into())
}

/// Σ quantity × current unit cost over the required recipe lines.
pub(crate) fn recipe_cost<T: StoreTx>(tx: &mut T, product: &Product) -> ServiceResult<Money> {
    let required: Vec<_> = product.recipe().lines().iter().filter(|l| !l.optional).collect();
    let items = read_stock_items(tx, required.iter().map(|l| &l.stock_item_id))?;
    Ok(required
        .iter()
        .filter_map(|l| Some(items.get(&l.stock_item_id)?.unit_cost().times(l.quantity)))
        .fold(Money::ZERO, |total, cost| total + cost))
}

impl<S: Store> Florist<S> {
    /// Register a stock item with its opening stock and no reservations.
    #[instrument(skip(self, input), fields(item_id = %input.id), err)]
    pub fn create_stock_item(&self, input: NewStockItem) -> ServiceResult<StockItem> {
        self.in_tx(|tx| {
            if tx.load_stock_item(&input.id)?.is_some() {
                return Err(
                    DomainError::conflict(format!("stock item {} already exists", input.id)).into(),
                );
            }
            let item = StockItem::create(input)?;
            tx.save_stock_item(&item)?;
            info!(stock_total = item.stock_total(), "stock item created");
            Ok(item)
        })
    }

    /// Supplier delivery: `stock_total += quantity`.
    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub fn receive_stock(&self, item_id: &StockItemId, quantity: i64) -> ServiceResult<StockMovement> {
        self.in_tx(|tx| {
            let mut item = require_stock_item(tx, item_id)?;
            let movement = item.receive(quantity)?;
            tx.save_stock_item(&item)?;
            info!(stock_total = item.stock_total(), "stock received");
            Ok(movement)
        })
    }

    /// Shrinkage. Only available (unreserved) units can be written off.
    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub fn write_off_stock(&self, item_id: &StockItemId, quantity: i64) -> ServiceResult<StockMovement> {
        self.in_tx(|tx| {
            let mut item = require_stock_item(tx, item_id)?;
            let movement = item.write_off(quantity)?;
            tx.save_stock_item(&item)?;
            info!(stock_total = item.stock_total(), "stock written off");
            Ok(movement)
        })
    }

    /// Change the cost used by future captures. Existing lines keep theirs.
    #[instrument(skip(self), fields(item_id = %item_id), err)]
    pub fn set_unit_cost(&self, item_id: &StockItemId, unit_cost: Money) -> ServiceResult<StockItem> {
        self.in_tx(|tx| {
            let mut item = require_stock_item(tx, item_id)?;
            item.set_unit_cost(unit_cost)?;
            tx.save_stock_item(&item)?;
            Ok(item)
        })
    }

    pub fn get_stock_item(&self, item_id: &StockItemId) -> ServiceResult<StockItem> {
        self.in_tx(|tx| require_stock_item(tx, item_id))
    }

    pub fn list_stock_items(&self, category: Option<StockCategory>) -> ServiceResult<Vec<StockItem>> {
        self.in_tx(|tx| Ok(tx.list_stock_items(category)?))
    }

    #[instrument(skip(self, input), fields(product_id = %input.id), err)]
    pub fn create_product(&self, input: NewProduct) -> ServiceResult<Product> {
        self.in_tx(|tx| {
            if tx.load_product(input.id)?.is_some() {
                return Err(
                    DomainError::conflict(format!("product {} already exists", input.id)).into(),
                );
            }
            let product = Product::create(input)?;
            tx.save_product(&product)?;
            info!(name = product.name(), "product created");
            Ok(product)
        })
    }

    pub fn get_product(&self, product_id: ProductId) -> ServiceResult<Product> {
        self.in_tx(|tx| require_product(tx, product_id))
    }

    /// Recipe lines in order; an empty recipe is legal.
    pub fn get_recipe(&self, product_id: ProductId) -> ServiceResult<Recipe> {
        self.in_tx(|tx| Ok(require_product(tx, product_id)?.recipe().clone()))
    }

    /// Replace a product's recipe atomically. Every referenced stock item must
    /// exist. Orders already placed keep their own copy of the inputs.
    #[instrument(skip(self, lines), fields(product_id = %product_id, lines = lines.len()), err)]
    pub fn set_recipe(&self, product_id: ProductId, lines: Vec<RecipeLine>) -> ServiceResult<Recipe> {
        self.in_tx(|tx| {
            let mut product = require_product(tx, product_id)?;
            let recipe = Recipe::new(lines)?;
            read_stock_items(tx, recipe.stock_item_ids())?;
            product.set_recipe(recipe.clone());
            tx.save_product(&product)?;
            info!("recipe replaced");
            Ok(recipe)
        })
    }

    /// Archived products stay readable but can no longer seed orders.
    #[instrument(skip(self), err)]
    pub fn archive_product(&self, product_id: ProductId) -> ServiceResult<Product> {
        self.in_tx(|tx| {
            let mut product = require_product(tx, product_id)?;
            product.archive();
            tx.save_product(&product)?;
            Ok(product)
        })
    }

    /// Cost of one unit of the product at current stock prices.
    pub fn recipe_cost(&self, product_id: ProductId) -> ServiceResult<Money> {
        self.in_tx(|tx| {
            let product = require_product(tx, product_id)?;
            recipe_cost(tx, &product)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn florist() -> Florist<InMemoryStore> {
        Florist::new(InMemoryStore::new())
    }

    fn flower(id: &str, stock: i64, cents: i64) -> NewStockItem {
        NewStockItem {
            id: StockItemId::new(id),
            category: StockCategory::Flower,
            name: id.to_string(),
            variety: None,
            colour: None,
            location: Some("cold room".to_string()),
            unit_cost: Money::from_cents(cents),
            stock_total: stock,
        }
    }

    fn line(id: &str, quantity: i64, optional: bool) -> RecipeLine {
        RecipeLine {
            stock_item_id: StockItemId::new(id),
            quantity,
            unit: "stem".to_string(),
            optional,
        }
    }

    #[test]
    fn duplicate_stock_items_conflict() {
        let f = florist();
        f.create_stock_item(flower("rose", 10, 150)).unwrap();
        let err = f.create_stock_item(flower("rose", 3, 150)).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));
        assert_eq!(f.get_stock_item(&StockItemId::new("rose")).unwrap().stock_total(), 10);
    }

    #[test]
    fn receive_and_write_off_adjust_stock_total() {
        let f = florist();
        let rose = StockItemId::new("rose");
        f.create_stock_item(flower("rose", 10, 150)).unwrap();
        f.receive_stock(&rose, 5).unwrap();
        f.write_off_stock(&rose, 3).unwrap();
        assert_eq!(f.get_stock_item(&rose).unwrap().stock_total(), 12);

        let err = f.write_off_stock(&rose, 13).unwrap_err();
        assert_eq!(err.domain().unwrap().shortages()[0].available, 12);
        assert!(f.receive_stock(&rose, 0).is_err());
    }

    #[test]
    fn set_recipe_requires_known_stock_items() {
        let f = florist();
        f.create_stock_item(flower("rose", 10, 150)).unwrap();
        let product = f
            .create_product(NewProduct {
                id: ProductId::new(),
                name: "Dozen roses".to_string(),
                category: "bouquet".to_string(),
                sale_price: Money::from_cents(6_000),
            })
            .unwrap();
        let id = *product.id();

        let err = f
            .set_recipe(id, vec![line("rose", 12, false), line("ghost", 1, false)])
            .unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound { .. })));
        assert!(f.get_recipe(id).unwrap().is_empty());

        f.set_recipe(id, vec![line("rose", 12, false)]).unwrap();
        assert_eq!(f.get_recipe(id).unwrap().lines().len(), 1);
    }

    #[test]
    fn recipe_cost_uses_current_prices_of_required_lines() {
        let f = florist();
        f.create_stock_item(flower("rose", 10, 150)).unwrap();
        f.create_stock_item(flower("fern", 10, 40)).unwrap();
        let id = ProductId::new();
        f.create_product(NewProduct {
            id,
            name: "Rose posy".to_string(),
            category: "posy".to_string(),
            sale_price: Money::from_cents(2_500),
        })
        .unwrap();
        f.set_recipe(id, vec![line("rose", 5, false), line("fern", 3, true)])
            .unwrap();

        assert_eq!(f.recipe_cost(id).unwrap(), Money::from_cents(750));
        f.set_unit_cost(&StockItemId::new("rose"), Money::from_cents(200))
            .unwrap();
        assert_eq!(f.recipe_cost(id).unwrap(), Money::from_cents(1_000));
    }

    #[test]
    fn list_filters_by_category() {
        let f = florist();
        f.create_stock_item(flower("rose", 10, 150)).unwrap();
        let mut vase = flower("vase", 2, 900);
        vase.category = StockCategory::Container;
        f.create_stock_item(vase).unwrap();

        assert_eq!(f.list_stock_items(None).unwrap().len(), 2);
        let containers = f.list_stock_items(Some(StockCategory::Container)).unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].id().as_str(), "vase");
    }
}
