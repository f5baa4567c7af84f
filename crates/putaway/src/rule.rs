//! Putaway rules: "goods arriving here should go there".

use serde::{Deserialize, Serialize};

use stockflow_core::{CategoryId, LocationId, PackageTypeId, ProductId, PutawayRuleId};

/// A putaway rule. Matches on exactly one of product or product category,
/// optionally narrowed to a package type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutawayRule {
    pub id: PutawayRuleId,
    /// Disambiguation among rules of equal specificity (lower first).
    pub sequence: u32,
    pub product: Option<ProductId>,
    pub category: Option<CategoryId>,
    pub package_type: Option<PackageTypeId>,
    /// Where the rule listens: goods routed into this location (or its
    /// descendants) are candidates.
    pub location_in: LocationId,
    /// Where matched goods should be stored.
    pub location_out: LocationId,
    pub active: bool,
}

impl PutawayRule {
    pub fn for_product(product: ProductId, location_in: LocationId, location_out: LocationId) -> Self {
        Self {
            id: PutawayRuleId::new(),
            sequence: 10,
            product: Some(product),
            category: None,
            package_type: None,
            location_in,
            location_out,
            active: true,
        }
    }

    pub fn for_category(
        category: CategoryId,
        location_in: LocationId,
        location_out: LocationId,
    ) -> Self {
        Self {
            id: PutawayRuleId::new(),
            sequence: 10,
            product: None,
            category: Some(category),
            package_type: None,
            location_in,
            location_out,
            active: true,
        }
    }

    pub fn with_package_type(mut self, package_type: PackageTypeId) -> Self {
        self.package_type = Some(package_type);
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }
}

/// All configured putaway rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutawayTable {
    rules: Vec<PutawayRule>,
}

impl PutawayTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rule: PutawayRule) -> PutawayRuleId {
        let id = rule.id;
        self.rules.push(rule);
        id
    }

    pub fn iter(&self) -> impl Iterator<Item = &PutawayRule> {
        self.rules.iter().filter(|r| r.active)
    }
}
