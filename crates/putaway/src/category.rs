//! Storage categories: capacity constraints attached to locations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockflow_core::{PackageTypeId, ProductId, StorageCategoryId};

/// Policy for mixing products at a storage-category location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowNewProduct {
    /// Any product may enter at any time.
    #[default]
    Any,
    /// New stock may only enter while the location is empty.
    EmptyOnly,
    /// New stock may only join the same product.
    SameProduct,
}

/// A quantity cap for one product or one package type within a category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityRule {
    pub product: Option<ProductId>,
    pub package_type: Option<PackageTypeId>,
    pub max_quantity: f64,
}

/// Capacity constraints shared by the locations carrying this category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageCategory {
    pub id: StorageCategoryId,
    pub name: String,
    /// Total weight cap over everything stored at the location.
    pub max_weight: Option<f64>,
    pub allow_new_product: AllowNewProduct,
    pub capacities: Vec<CapacityRule>,
}

impl StorageCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: StorageCategoryId::new(),
            name: name.into(),
            max_weight: None,
            allow_new_product: AllowNewProduct::Any,
            capacities: Vec::new(),
        }
    }

    pub fn with_max_weight(mut self, max_weight: f64) -> Self {
        self.max_weight = Some(max_weight);
        self
    }

    pub fn with_allow_new_product(mut self, policy: AllowNewProduct) -> Self {
        self.allow_new_product = policy;
        self
    }

    pub fn with_product_capacity(mut self, product: ProductId, max_quantity: f64) -> Self {
        self.capacities.push(CapacityRule {
            product: Some(product),
            package_type: None,
            max_quantity,
        });
        self
    }

    pub fn with_package_capacity(mut self, package_type: PackageTypeId, max_quantity: f64) -> Self {
        self.capacities.push(CapacityRule {
            product: None,
            package_type: Some(package_type),
            max_quantity,
        });
        self
    }

    /// The capacity row constraining `product`, if one exists.
    pub fn product_capacity(&self, product: ProductId) -> Option<&CapacityRule> {
        self.capacities.iter().find(|c| c.product == Some(product))
    }

    /// The capacity row constraining `package_type`, if one exists.
    pub fn package_capacity(&self, package_type: PackageTypeId) -> Option<&CapacityRule> {
        self.capacities
            .iter()
            .find(|c| c.package_type == Some(package_type))
    }
}

/// Registry of storage categories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageCategoryRegistry {
    categories: HashMap<StorageCategoryId, StorageCategory>,
}

impl StorageCategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: StorageCategory) -> StorageCategoryId {
        let id = category.id;
        self.categories.insert(id, category);
        id
    }

    pub fn get(&self, id: StorageCategoryId) -> Option<&StorageCategory> {
        self.categories.get(&id)
    }
}
