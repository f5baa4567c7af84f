//! Warehouse records and location-to-warehouse resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockflow_core::{CompanyId, LocationId, RouteId, StockResult, WarehouseId};

use crate::tree::LocationTree;

/// A warehouse: a view root plus its main stock location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub company: CompanyId,
    /// View root of the warehouse's location subtree.
    pub view_location: LocationId,
    /// Default internal stock location.
    pub stock_location: LocationId,
    /// Routes applied when nothing more specific matches.
    pub default_routes: Vec<RouteId>,
}

/// Registry of warehouses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarehouseRegistry {
    warehouses: HashMap<WarehouseId, Warehouse>,
}

impl WarehouseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, warehouse: Warehouse) {
        self.warehouses.insert(warehouse.id, warehouse);
    }

    pub fn get(&self, id: WarehouseId) -> Option<&Warehouse> {
        self.warehouses.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warehouse> {
        self.warehouses.values()
    }

    /// The warehouse whose view location contains `location`, if any.
    pub fn warehouse_of(
        &self,
        tree: &LocationTree,
        location: LocationId,
    ) -> StockResult<Option<&Warehouse>> {
        for warehouse in self.warehouses.values() {
            if tree.is_ancestor_of(warehouse.view_location, location)? {
                return Ok(Some(warehouse));
            }
        }
        Ok(None)
    }

    /// Whether any warehouse references `location` as its stock or view
    /// location (archiving such a location is rejected).
    pub fn references(&self, location: LocationId) -> bool {
        self.warehouses
            .values()
            .any(|w| w.view_location == location || w.stock_location == location)
    }
}
