//! Routes and the rule graph they form.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockflow_core::{CategoryId, LocationId, ProductId, RouteId, RuleId, StockError, StockResult};

use crate::rule::Rule;

/// A named, prioritized container of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    /// Disambiguation when several routes could serve the same need
    /// (lower first).
    pub sequence: u32,
    pub active: bool,
}

impl Route {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RouteId::new(),
            name: name.into(),
            sequence: 10,
            active: true,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }
}

/// Configuration store for routes, rules, and the product/category route
/// assignments.
///
/// Read-only during request processing; mutated by administrative
/// configuration edits only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleGraph {
    routes: HashMap<RouteId, Route>,
    rules: Vec<Rule>,
    product_routes: HashMap<ProductId, Vec<RouteId>>,
    category_routes: HashMap<CategoryId, Vec<RouteId>>,
}

impl RuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_route(&mut self, route: Route) -> RouteId {
        let id = route.id;
        self.routes.insert(id, route);
        id
    }

    /// Add a rule to its route. Push behavior requires a source location.
    pub fn insert_rule(&mut self, rule: Rule) -> StockResult<RuleId> {
        if !self.routes.contains_key(&rule.route) {
            return Err(StockError::not_found(format!(
                "route {} for rule {}",
                rule.route, rule.name
            )));
        }
        if rule.action.pushes() && rule.source.is_none() {
            return Err(StockError::validation(format!(
                "push rule {} needs a source location to trigger on",
                rule.name
            )));
        }
        let id = rule.id;
        self.rules.push(rule);
        Ok(id)
    }

    pub fn route(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(&id)
    }

    pub fn rule(&self, id: stockflow_core::RuleId) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn assign_product_route(&mut self, product: ProductId, route: RouteId) {
        self.product_routes.entry(product).or_default().push(route);
    }

    pub fn assign_category_route(&mut self, category: CategoryId, route: RouteId) {
        self.category_routes.entry(category).or_default().push(route);
    }

    pub fn product_routes(&self, product: ProductId) -> &[RouteId] {
        self.product_routes
            .get(&product)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn category_routes(&self, category: CategoryId) -> &[RouteId] {
        self.category_routes
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Order candidate route ids by `(route sequence, route id)`, dropping
    /// unknown or inactive routes.
    pub fn prioritized(&self, candidates: &[RouteId]) -> Vec<RouteId> {
        let mut routes: Vec<&Route> = candidates
            .iter()
            .filter_map(|id| self.routes.get(id))
            .filter(|r| r.active)
            .collect();
        routes.sort_by_key(|r| (r.sequence, r.id));
        routes.into_iter().map(|r| r.id).collect()
    }

    /// The best pull-capable rule of `route` listening at `location`,
    /// by `(sequence, rule id)`.
    pub fn pull_rule_in_route(&self, route: RouteId, location: LocationId) -> Option<&Rule> {
        self.rules
            .iter()
            .filter(|r| {
                r.active && r.route == route && r.action.pulls() && r.destination == location
            })
            .min_by_key(|r| (r.sequence, r.id))
    }

    /// The best push-capable rule of `route` triggered by arrivals at
    /// `location`.
    pub fn push_rule_in_route(&self, route: RouteId, location: LocationId) -> Option<&Rule> {
        self.rules
            .iter()
            .filter(|r| {
                r.active && r.route == route && r.action.pushes() && r.source == Some(location)
            })
            .min_by_key(|r| (r.sequence, r.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ProcureMethod;
    use stockflow_core::LocationId;

    #[test]
    fn push_rule_without_source_is_rejected() {
        let mut graph = RuleGraph::new();
        let route = graph.insert_route(Route::new("push route"));
        let mut rule = Rule::push(
            "forward",
            route,
            LocationId::new(),
            LocationId::new(),
            crate::rule::RuleAuto::Manual,
        );
        rule.source = None;
        assert!(matches!(
            graph.insert_rule(rule),
            Err(StockError::Validation(_))
        ));
    }

    #[test]
    fn prioritized_orders_by_sequence_then_id() {
        let mut graph = RuleGraph::new();
        let late = graph.insert_route(Route::new("late").with_sequence(20));
        let early = graph.insert_route(Route::new("early").with_sequence(5));
        let inactive = {
            let mut r = Route::new("off");
            r.active = false;
            graph.insert_route(r)
        };

        let ordered = graph.prioritized(&[late, inactive, early]);
        assert_eq!(ordered, vec![early, late]);
    }

    #[test]
    fn pull_rule_selection_prefers_lower_sequence() {
        let mut graph = RuleGraph::new();
        let route = graph.insert_route(Route::new("replenish"));
        let src = LocationId::new();
        let dest = LocationId::new();
        graph
            .insert_rule(
                Rule::pull("slow", route, src, dest, ProcureMethod::TakeFromStock)
                    .with_sequence(20),
            )
            .unwrap();
        let fast = graph
            .insert_rule(
                Rule::pull("fast", route, src, dest, ProcureMethod::TakeFromStock)
                    .with_sequence(5),
            )
            .unwrap();

        assert_eq!(graph.pull_rule_in_route(route, dest).unwrap().id, fast);
        assert!(graph.pull_rule_in_route(route, src).is_none());
    }
}
