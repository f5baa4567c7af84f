//! The putaway resolver.

use tracing::debug;

use stockflow_core::{PackageTypeId, ProductCatalog, ProductId, StockError, StockResult, qty};
use stockflow_core::LocationId;
use stockflow_locations::{LocationTree, LocationUsage};
use stockflow_quants::QuantStore;

use crate::category::{AllowNewProduct, StorageCategoryRegistry};
use crate::rule::{PutawayRule, PutawayTable};

/// Resolves the concrete destination sub-location for incoming goods.
///
/// Candidate rules are ranked most-specific-first: package-type-specific
/// rules beat product-specific rules beat category rules, and a rule on
/// the product's own category beats one on a parent category. Rules tying
/// on specificity order by `(sequence, rule id)` ascending, which keeps
/// resolution deterministic for identical inputs.
pub struct PutawayResolver<'a> {
    pub tree: &'a LocationTree,
    pub catalog: &'a ProductCatalog,
    pub quants: &'a QuantStore,
    pub storage_categories: &'a StorageCategoryRegistry,
    pub rules: &'a PutawayTable,
}

impl<'a> PutawayResolver<'a> {
    /// Pick the storage location for `quantity` of `product` somewhere
    /// under `root`.
    ///
    /// Failure modes: rules matched but every target is over capacity, or
    /// no rule matched and the fallback location is itself non-compliant;
    /// both are configuration errors (reportable, not fatal to a batch).
    pub fn resolve(
        &self,
        root: LocationId,
        product: ProductId,
        quantity: f64,
        package_type: Option<PackageTypeId>,
    ) -> StockResult<LocationId> {
        let candidates = self.ranked_rules(root, product, package_type)?;

        if candidates.is_empty() {
            return self.fallback(root, product, quantity, package_type);
        }

        for rule in &candidates {
            // The rule's target first, then its internal descendants in
            // path order.
            let mut targets = vec![rule.location_out];
            targets.extend(
                self.tree
                    .internal_descendants(rule.location_out)?
                    .into_iter()
                    .filter(|id| *id != rule.location_out),
            );
            for target in targets {
                if self.complies(target, product, quantity, package_type)? {
                    debug!(%product, rule = %rule.id, location = %target, "putaway resolved");
                    return Ok(target);
                }
            }
        }

        Err(StockError::configuration(format!(
            "no putaway target under {root} can accept {quantity} of {product}: all candidates are over capacity"
        )))
    }

    /// Applicable rules, most specific first.
    fn ranked_rules(
        &self,
        root: LocationId,
        product: ProductId,
        package_type: Option<PackageTypeId>,
    ) -> StockResult<Vec<PutawayRule>> {
        let category_chain = self.catalog.category_ancestors(product)?;

        let mut ranked: Vec<(usize, usize, usize, u32, PutawayRule)> = Vec::new();
        for rule in self.rules.iter() {
            // A rule listens on a location that contains the requested
            // subtree or sits inside it.
            let in_scope = self.tree.is_ancestor_of(rule.location_in, root)?
                || self.tree.is_ancestor_of(root, rule.location_in)?;
            if !in_scope {
                continue;
            }

            let package_rank = match (rule.package_type, package_type) {
                (Some(rt), Some(pt)) if rt == pt => 0,
                (None, _) => 1,
                // Package-specific rule without a matching package.
                _ => continue,
            };

            let (kind_rank, category_depth) = if rule.product == Some(product) {
                (0, 0)
            } else if let Some(rule_category) = rule.category {
                match category_chain.iter().position(|c| *c == rule_category) {
                    Some(depth) => (1, depth),
                    None => continue,
                }
            } else if rule.product.is_some() {
                continue;
            } else {
                // Rule with neither product nor category: catch-all,
                // least specific.
                (2, 0)
            };

            ranked.push((package_rank, kind_rank, category_depth, rule.sequence, rule.clone()));
        }

        ranked.sort_by(|a, b| {
            (a.0, a.1, a.2, a.3, a.4.id).cmp(&(b.0, b.1, b.2, b.3, b.4.id))
        });
        Ok(ranked.into_iter().map(|(_, _, _, _, r)| r).collect())
    }

    /// Storage-category compliance of one target location.
    fn complies(
        &self,
        location: LocationId,
        product: ProductId,
        quantity: f64,
        package_type: Option<PackageTypeId>,
    ) -> StockResult<bool> {
        let node = self.tree.get(location)?;
        if !node.active || !node.usage.can_hold_quants() {
            return Ok(false);
        }
        let Some(category_id) = node.storage_category else {
            return Ok(true);
        };
        let Some(category) = self.storage_categories.get(category_id) else {
            return Ok(true);
        };

        let incoming = self.catalog.product(product)?;
        let rows = self.quants.rows_at(location);
        let rounding = incoming.uom_rounding;

        match category.allow_new_product {
            AllowNewProduct::Any => {}
            AllowNewProduct::EmptyOnly => {
                if rows.iter().any(|r| !qty::is_zero(r.quantity, rounding)) {
                    return Ok(false);
                }
            }
            AllowNewProduct::SameProduct => {
                if rows
                    .iter()
                    .any(|r| r.product != product && !qty::is_zero(r.quantity, rounding))
                {
                    return Ok(false);
                }
            }
        }

        if let Some(max_weight) = category.max_weight {
            let mut current_weight = 0.0;
            for row in &rows {
                let unit = self
                    .catalog
                    .product(row.product)
                    .map(|p| p.unit_weight)
                    .unwrap_or(0.0);
                current_weight += row.quantity.max(0.0) * unit;
            }
            let incoming_weight = quantity * incoming.unit_weight;
            if qty::compare(current_weight + incoming_weight, max_weight, rounding)
                == std::cmp::Ordering::Greater
            {
                return Ok(false);
            }
        }

        if let Some(cap) = category.product_capacity(product) {
            let current: f64 = rows
                .iter()
                .filter(|r| r.product == product)
                .map(|r| r.quantity.max(0.0))
                .sum();
            if qty::compare(current + quantity, cap.max_quantity, rounding)
                == std::cmp::Ordering::Greater
            {
                return Ok(false);
            }
        }

        if let Some(pt) = package_type {
            if let Some(cap) = category.package_capacity(pt) {
                let current: f64 = rows
                    .iter()
                    .filter(|r| r.package.is_some())
                    .map(|r| r.quantity.max(0.0))
                    .sum();
                if qty::compare(current + quantity, cap.max_quantity, rounding)
                    == std::cmp::Ordering::Greater
                {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// No rule matched: view roots fall back to their first internal
    /// child, anything else to the root itself, provided the fallback
    /// itself complies.
    fn fallback(
        &self,
        root: LocationId,
        product: ProductId,
        quantity: f64,
        package_type: Option<PackageTypeId>,
    ) -> StockResult<LocationId> {
        let node = self.tree.get(root)?;
        let target = if node.usage == LocationUsage::View {
            self.tree.first_internal_child(root)?.ok_or_else(|| {
                StockError::configuration(format!(
                    "view location {root} has no internal child to store into"
                ))
            })?
        } else {
            root
        };
        if self.complies(target, product, quantity, package_type)? {
            Ok(target)
        } else {
            Err(StockError::configuration(format!(
                "fallback location {target} cannot accept {quantity} of {product}"
            )))
        }
    }
}
