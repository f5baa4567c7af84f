//! Per-operation resolved configuration.
//!
//! The engine never walks fallback chains ad hoc in the middle of an
//! operation. The precedence below is computed once per operation into a
//! [`ResolvedLocationConfig`] and passed down:
//!
//! - removal strategy: location ancestor override → product category → FIFO
//! - negative stock: product flag → location ancestor flag → usage default
//!   (supplier/production/inventory counterparts absorb negatives)

use serde::{Deserialize, Serialize};

use stockflow_core::{LocationId, ProductCatalog, ProductId, RemovalStrategy, StockResult};

use crate::tree::LocationTree;

/// Configuration resolved for one (location, product) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocationConfig {
    pub removal_strategy: RemovalStrategy,
    pub allow_negative_stock: bool,
}

impl ResolvedLocationConfig {
    pub fn resolve(
        tree: &LocationTree,
        catalog: &ProductCatalog,
        location: LocationId,
        product: ProductId,
    ) -> StockResult<Self> {
        let removal_strategy = match tree.removal_strategy_override(location)? {
            Some(strategy) => strategy,
            None => catalog
                .category_removal_strategy(product)
                .unwrap_or(RemovalStrategy::Fifo),
        };

        let node = tree.get(location)?;
        let allow_negative_stock = catalog.product(product)?.allow_negative_stock
            || node.usage.implicitly_allows_negative()
            || tree.negative_stock_override(location)?;

        Ok(Self {
            removal_strategy,
            allow_negative_stock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Location, LocationUsage};
    use stockflow_core::{Category, CategoryId, Product, ProductType};

    fn catalog_with_strategy(strategy: Option<RemovalStrategy>) -> (ProductCatalog, ProductId) {
        let mut catalog = ProductCatalog::new();
        let category = Category {
            id: CategoryId::new(),
            name: "all".to_string(),
            parent: None,
            removal_strategy: strategy,
        };
        let product = Product {
            id: ProductId::new(),
            name: "widget".to_string(),
            category: category.id,
            product_type: ProductType::Stockable,
            unit_weight: 1.0,
            uom_rounding: 0.001,
            allow_negative_stock: false,
        };
        let pid = product.id;
        catalog.insert_category(category);
        catalog.insert_product(product);
        (catalog, pid)
    }

    #[test]
    fn location_override_beats_category() {
        let (catalog, product) = catalog_with_strategy(Some(RemovalStrategy::Lifo));
        let mut tree = LocationTree::new();
        let root = tree
            .insert(Location::new("WH", None, LocationUsage::View).with_removal_strategy(RemovalStrategy::Fefo))
            .unwrap();
        let stock = tree
            .insert(Location::new("Stock", Some(root), LocationUsage::Internal))
            .unwrap();

        let resolved = ResolvedLocationConfig::resolve(&tree, &catalog, stock, product).unwrap();
        assert_eq!(resolved.removal_strategy, RemovalStrategy::Fefo);
    }

    #[test]
    fn category_used_when_no_location_override() {
        let (catalog, product) = catalog_with_strategy(Some(RemovalStrategy::Lifo));
        let mut tree = LocationTree::new();
        let stock = tree
            .insert(Location::new("Stock", None, LocationUsage::Internal))
            .unwrap();

        let resolved = ResolvedLocationConfig::resolve(&tree, &catalog, stock, product).unwrap();
        assert_eq!(resolved.removal_strategy, RemovalStrategy::Lifo);
    }

    #[test]
    fn fifo_is_the_default() {
        let (catalog, product) = catalog_with_strategy(None);
        let mut tree = LocationTree::new();
        let stock = tree
            .insert(Location::new("Stock", None, LocationUsage::Internal))
            .unwrap();

        let resolved = ResolvedLocationConfig::resolve(&tree, &catalog, stock, product).unwrap();
        assert_eq!(resolved.removal_strategy, RemovalStrategy::Fifo);
    }

    #[test]
    fn supplier_locations_allow_negative_by_usage() {
        let (catalog, product) = catalog_with_strategy(None);
        let mut tree = LocationTree::new();
        let vendors = tree
            .insert(Location::new("Vendors", None, LocationUsage::Supplier))
            .unwrap();
        let stock = tree
            .insert(Location::new("Stock", None, LocationUsage::Internal))
            .unwrap();

        assert!(
            ResolvedLocationConfig::resolve(&tree, &catalog, vendors, product)
                .unwrap()
                .allow_negative_stock
        );
        assert!(
            !ResolvedLocationConfig::resolve(&tree, &catalog, stock, product)
                .unwrap()
                .allow_negative_stock
        );
    }
}
