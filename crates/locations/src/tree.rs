//! Arena-backed location tree with materialized paths.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use stockflow_core::{LocationId, RemovalStrategy, StockError, StockResult, StorageCategoryId};

/// Usage classification of a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationUsage {
    /// Physical storage inside a warehouse.
    Internal,
    /// Virtual destination for outgoing goods.
    Customer,
    /// Virtual source for incoming goods.
    Supplier,
    /// In-transit between warehouses/companies.
    Transit,
    /// Virtual production counterpart.
    Production,
    /// Virtual counterpart for inventory adjustments.
    Inventory,
    /// Structural node only; may not directly hold quants.
    View,
}

impl LocationUsage {
    /// Whether quant rows may live directly at a location of this usage.
    pub fn can_hold_quants(self) -> bool {
        self != Self::View
    }

    /// Virtual counterpart locations absorb negative stock by design
    /// (taking from a supplier location drives it negative until the
    /// receipt is reconciled).
    pub fn implicitly_allows_negative(self) -> bool {
        matches!(self, Self::Supplier | Self::Production | Self::Inventory)
    }
}

/// A node in the location tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub parent: Option<LocationId>,
    pub usage: LocationUsage,
    pub storage_category: Option<StorageCategoryId>,
    /// Location-level removal strategy override.
    pub removal_strategy: Option<RemovalStrategy>,
    /// Explicit location-level override allowing negative stock.
    pub allow_negative_stock: bool,
    pub is_scrap: bool,
    pub is_replenish: bool,
    pub active: bool,
    /// Materialized path: `/`-separated chain of ancestor ids, self last.
    /// Maintained by the tree; never set it directly.
    path: String,
}

impl Location {
    /// Build a location record. The path is assigned on insertion.
    pub fn new(name: impl Into<String>, parent: Option<LocationId>, usage: LocationUsage) -> Self {
        Self {
            id: LocationId::new(),
            name: name.into(),
            parent,
            usage,
            storage_category: None,
            removal_strategy: None,
            allow_negative_stock: false,
            is_scrap: false,
            is_replenish: false,
            active: true,
            path: String::new(),
        }
    }

    pub fn with_id(mut self, id: LocationId) -> Self {
        self.id = id;
        self
    }

    pub fn with_storage_category(mut self, category: StorageCategoryId) -> Self {
        self.storage_category = Some(category);
        self
    }

    pub fn with_removal_strategy(mut self, strategy: RemovalStrategy) -> Self {
        self.removal_strategy = Some(strategy);
        self
    }

    pub fn allowing_negative_stock(mut self) -> Self {
        self.allow_negative_stock = true;
        self
    }

    /// Materialized path of this location.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// The location tree.
///
/// Read-mostly during request processing; mutations (insert, re-parent,
/// archive) are administrative and serialized separately from transactional
/// stock movement. The descendant cache is invalidated on every write path
/// that can change an answer.
#[derive(Debug, Default)]
pub struct LocationTree {
    nodes: HashMap<LocationId, Location>,
    // Process-wide memoized descendant sets, keyed by root location.
    descendant_cache: Mutex<HashMap<LocationId, Vec<LocationId>>>,
}

impl LocationTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new location under its declared parent.
    pub fn insert(&mut self, mut location: Location) -> StockResult<LocationId> {
        if self.nodes.contains_key(&location.id) {
            return Err(StockError::validation(format!(
                "location {} already exists",
                location.id
            )));
        }
        location.path = match location.parent {
            Some(parent) => {
                let parent = self.get(parent)?;
                format!("{}/{}", parent.path, location.id)
            }
            None => format!("{}", location.id),
        };
        let id = location.id;
        self.nodes.insert(id, location);
        self.invalidate_cache();
        Ok(id)
    }

    pub fn get(&self, id: LocationId) -> StockResult<&Location> {
        self.nodes
            .get(&id)
            .ok_or_else(|| StockError::not_found(format!("location {id}")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.nodes.values()
    }

    /// O(1) ancestor test via path prefix compare (inclusive).
    pub fn is_ancestor_of(&self, ancestor: LocationId, descendant: LocationId) -> StockResult<bool> {
        let a = self.get(ancestor)?;
        let d = self.get(descendant)?;
        Ok(d.path == a.path || d.path.starts_with(&format!("{}/", a.path)))
    }

    /// All locations whose path is prefixed by `root`'s path, inclusive.
    ///
    /// Memoized; the cache is invalidated by `insert`, `reparent` and
    /// `archive`.
    pub fn descendants(&self, root: LocationId) -> StockResult<Vec<LocationId>> {
        if let Ok(cache) = self.descendant_cache.lock() {
            if let Some(hit) = cache.get(&root) {
                return Ok(hit.clone());
            }
        }
        let root_node = self.get(root)?;
        let prefix = format!("{}/", root_node.path);
        let mut out: Vec<LocationId> = self
            .nodes
            .values()
            .filter(|n| n.id == root || n.path.starts_with(&prefix))
            .map(|n| n.id)
            .collect();
        // Stable order keeps downstream selection deterministic.
        out.sort_by(|a, b| self.nodes[a].path.cmp(&self.nodes[b].path));
        if let Ok(mut cache) = self.descendant_cache.lock() {
            cache.insert(root, out.clone());
        }
        Ok(out)
    }

    /// Descendants restricted to active internal locations ("storable" set).
    pub fn internal_descendants(&self, root: LocationId) -> StockResult<Vec<LocationId>> {
        Ok(self
            .descendants(root)?
            .into_iter()
            .filter(|id| {
                let n = &self.nodes[id];
                n.active && n.usage == LocationUsage::Internal
            })
            .collect())
    }

    /// Ancestor chain of `id`, self first, root last.
    pub fn ancestors(&self, id: LocationId) -> StockResult<Vec<LocationId>> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.get(current)?;
            chain.push(current);
            cursor = node.parent;
        }
        Ok(chain)
    }

    /// First active internal child of `root` in path order, used as the
    /// putaway fallback for view-type roots.
    pub fn first_internal_child(&self, root: LocationId) -> StockResult<Option<LocationId>> {
        Ok(self
            .internal_descendants(root)?
            .into_iter()
            .find(|id| *id != root))
    }

    /// Move `id` under `new_parent`, renumbering every descendant path.
    ///
    /// The whole renumbering happens on this single in-memory structure
    /// under `&mut self`, so observers never see a half-moved subtree.
    pub fn reparent(&mut self, id: LocationId, new_parent: LocationId) -> StockResult<()> {
        self.get(new_parent)?;
        if self.is_ancestor_of(id, new_parent)? {
            return Err(StockError::integrity(format!(
                "cannot move location {id} under its own descendant {new_parent}"
            )));
        }
        let subtree = self.descendants(id)?;
        let new_parent_path = self.get(new_parent)?.path.clone();
        let old_path = self.get(id)?.path.clone();
        let new_path = format!("{new_parent_path}/{id}");

        debug!(location = %id, from = %old_path, to = %new_path, "reparenting subtree");

        for member in subtree {
            let node = self.nodes.get_mut(&member).expect("descendant exists");
            let suffix = node
                .path
                .strip_prefix(&old_path)
                .expect("descendant path has subtree prefix");
            node.path = format!("{new_path}{suffix}");
        }
        let node = self.nodes.get_mut(&id).expect("node exists");
        node.parent = Some(new_parent);
        self.invalidate_cache();
        Ok(())
    }

    /// Archive a location.
    ///
    /// Rejected while the location still holds nonzero quants
    /// (`holds_stock` is answered by the quant store) or is referenced as a
    /// warehouse's stock/view location (`warehouse_referenced`).
    pub fn archive(
        &mut self,
        id: LocationId,
        holds_stock: impl Fn(LocationId) -> bool,
        warehouse_referenced: impl Fn(LocationId) -> bool,
    ) -> StockResult<()> {
        self.get(id)?;
        if holds_stock(id) {
            return Err(StockError::integrity(format!(
                "location {id} still holds stock and cannot be archived"
            )));
        }
        if warehouse_referenced(id) {
            return Err(StockError::integrity(format!(
                "location {id} is referenced by a warehouse and cannot be archived"
            )));
        }
        self.nodes.get_mut(&id).expect("checked above").active = false;
        self.invalidate_cache();
        Ok(())
    }

    /// Reject operations that would place quants at this location.
    pub fn ensure_can_hold_quants(&self, id: LocationId) -> StockResult<()> {
        let node = self.get(id)?;
        if !node.usage.can_hold_quants() {
            return Err(StockError::lifecycle(format!(
                "location {} ({}) is a view location and cannot hold stock",
                node.name, id
            )));
        }
        if !node.active {
            return Err(StockError::lifecycle(format!(
                "location {} ({}) is archived",
                node.name, id
            )));
        }
        Ok(())
    }

    /// Location-level removal strategy, walking up the ancestor chain.
    pub fn removal_strategy_override(&self, id: LocationId) -> StockResult<Option<RemovalStrategy>> {
        for ancestor in self.ancestors(id)? {
            if let Some(strategy) = self.nodes[&ancestor].removal_strategy {
                return Ok(Some(strategy));
            }
        }
        Ok(None)
    }

    /// Whether any location on the ancestor chain explicitly allows
    /// negative stock.
    pub fn negative_stock_override(&self, id: LocationId) -> StockResult<bool> {
        for ancestor in self.ancestors(id)? {
            if self.nodes[&ancestor].allow_negative_stock {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.descendant_cache.lock() {
            cache.clear();
        }
    }
}
