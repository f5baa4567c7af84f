//! Product and product-category configuration records.
//!
//! These are long-lived configuration data, mutated by administrators and
//! read on every stock operation. The catalog is the resolution point for
//! per-product policies (negative stock, removal strategy) so the rest of
//! the engine reads one resolved value instead of re-walking fallback
//! chains.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{StockError, StockResult};
use crate::id::{CategoryId, ProductId};

/// How a product participates in stock keeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    /// Tracked in the quant ledger.
    Stockable,
    /// Consumed without on-hand tracking.
    Consumable,
    /// No physical stock at all.
    Service,
}

/// Tie-break policy for choosing which quant rows to draw stock from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalStrategy {
    /// Oldest incoming date first.
    Fifo,
    /// Newest incoming date first.
    Lifo,
    /// Earliest expiration first (falls back to incoming date).
    Fefo,
    /// Lexicographically closest location path first.
    ClosestLocation,
    /// Open as few packages as possible.
    LeastPackages,
}

/// Product category. Forms a tree via `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub parent: Option<CategoryId>,
    /// Category-level removal strategy (beaten by a location override).
    pub removal_strategy: Option<RemovalStrategy>,
}

/// Product master record (the slice of it the stock engine needs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: CategoryId,
    pub product_type: ProductType,
    /// Weight of one unit, used by storage-category capacity checks.
    pub unit_weight: f64,
    /// Unit-of-measure rounding precision for this product's quantities.
    pub uom_rounding: f64,
    /// Explicit override allowing this product's stock to go negative.
    pub allow_negative_stock: bool,
}

impl Product {
    pub fn is_stockable(&self) -> bool {
        self.product_type == ProductType::Stockable
    }
}

/// In-memory catalog of products and categories.
///
/// Read-mostly during request processing; mutated only by administrative
/// configuration changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductCatalog {
    products: HashMap<ProductId, Product>,
    categories: HashMap<CategoryId, Category>,
}

impl ProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&mut self, product: Product) {
        self.products.insert(product.id, product);
    }

    pub fn insert_category(&mut self, category: Category) {
        self.categories.insert(category.id, category);
    }

    pub fn product(&self, id: ProductId) -> StockResult<&Product> {
        self.products
            .get(&id)
            .ok_or_else(|| StockError::not_found(format!("product {id}")))
    }

    pub fn category(&self, id: CategoryId) -> StockResult<&Category> {
        self.categories
            .get(&id)
            .ok_or_else(|| StockError::not_found(format!("category {id}")))
    }

    /// The category of `product` followed by its ancestors, nearest first.
    ///
    /// Stops if a parent pointer dangles; category trees are acyclic by
    /// construction (parents must exist at insert time in the admin layer).
    pub fn category_ancestors(&self, product: ProductId) -> StockResult<Vec<CategoryId>> {
        let product = self.product(product)?;
        let mut chain = Vec::new();
        let mut cursor = Some(product.category);
        while let Some(id) = cursor {
            if chain.contains(&id) {
                return Err(StockError::integrity(format!(
                    "category hierarchy cycle at {id}"
                )));
            }
            chain.push(id);
            cursor = self.categories.get(&id).and_then(|c| c.parent);
        }
        Ok(chain)
    }

    /// Category-level removal strategy for a product, walking up the
    /// category tree.
    pub fn category_removal_strategy(&self, product: ProductId) -> Option<RemovalStrategy> {
        let chain = self.category_ancestors(product).ok()?;
        chain
            .iter()
            .find_map(|id| self.categories.get(id).and_then(|c| c.removal_strategy))
    }
}
