//! Recipe catalog domain module.
//!
//! Products (bouquets, arrangements, wreaths) and the recipes that list which
//! stock items compose them. Recipes only seed the inputs captured on new
//! orders; captured inputs never follow later recipe edits.

pub mod product;
pub mod recipe;

pub use product::{NewProduct, Product, ProductStatus};
pub use recipe::{Recipe, RecipeInput, RecipeLine};
