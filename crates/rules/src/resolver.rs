//! Rule resolution: which rule serves a need, and what moves it creates.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use stockflow_core::{
    CompanyId, GroupId, LocationId, ProductCatalog, ProductId, RouteId, RuleId, StockError,
    StockResult, WarehouseId,
};
use stockflow_locations::{LocationTree, WarehouseRegistry};

use crate::route::RuleGraph;
use crate::rule::{ProcureMethod, Rule, RuleAuto};
use crate::stock_move::{Move, MoveState};

/// Routing hints accompanying a procurement need.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    /// Explicit route override; beats every other tier.
    pub route_hints: Vec<RouteId>,
    /// Warehouse whose default routes apply. Resolved from the destination
    /// location when unset.
    pub warehouse: Option<WarehouseId>,
}

/// An internal demand for stock at a location.
#[derive(Debug, Clone)]
pub struct Need {
    pub name: String,
    pub product: ProductId,
    pub quantity: f64,
    pub location: LocationId,
    pub date_planned: DateTime<Utc>,
    pub group: Option<GroupId>,
    pub origin: Option<String>,
    pub company: Option<CompanyId>,
    pub priority: u8,
    pub values: Map<String, Value>,
}

/// Read-only resolver over the rule graph and configuration stores.
pub struct RuleResolver<'a> {
    pub graph: &'a RuleGraph,
    pub tree: &'a LocationTree,
    pub catalog: &'a ProductCatalog,
    pub warehouses: &'a WarehouseRegistry,
    /// Extra scheduling slack applied once per chain, in days.
    pub visibility_buffer_days: i64,
}

impl<'a> RuleResolver<'a> {
    /// The pull rule serving a need for `product` at `destination`.
    ///
    /// Walks from `destination` up through its ancestors; at each level
    /// route tiers are searched in priority order: explicit hints, product
    /// routes, product-category routes (nearest category first), then
    /// warehouse default routes. Absence everywhere is a configuration
    /// error the batch reports without aborting.
    pub fn find_rule(
        &self,
        product: ProductId,
        destination: LocationId,
        ctx: &RoutingContext,
    ) -> StockResult<&'a Rule> {
        let tiers = self.route_tiers(product, destination, ctx)?;
        for location in self.tree.ancestors(destination)? {
            for tier in &tiers {
                for route in self.graph.prioritized(tier) {
                    if let Some(rule) = self.graph.pull_rule_in_route(route, location) {
                        return Ok(rule);
                    }
                }
            }
        }
        Err(StockError::configuration(format!(
            "no rule found to replenish {product} at {destination}"
        )))
    }

    /// The push rule triggered by goods arriving at `location`, if any.
    /// Push rules listen on their exact source location; absence is normal.
    pub fn find_push_rule(
        &self,
        product: ProductId,
        location: LocationId,
        ctx: &RoutingContext,
    ) -> StockResult<Option<&'a Rule>> {
        let tiers = self.route_tiers(product, location, ctx)?;
        for tier in &tiers {
            for route in self.graph.prioritized(tier) {
                if let Some(rule) = self.graph.push_rule_in_route(route, location) {
                    return Ok(Some(rule));
                }
            }
        }
        Ok(None)
    }

    /// Materialize the full move chain serving `need`, downstream first.
    ///
    /// Each chained move feeds the one created before it. Rules are chained
    /// while their procure method demands it; revisiting a rule within one
    /// chain is a fatal configuration error.
    pub fn materialize_chain(&self, need: &Need, ctx: &RoutingContext) -> StockResult<Vec<Move>> {
        let mut moves: Vec<Move> = Vec::new();
        let mut visited: Vec<RuleId> = Vec::new();
        let mut location = need.location;
        let mut date = need.date_planned - Duration::days(self.visibility_buffer_days);

        loop {
            let rule = self.find_rule(need.product, location, ctx)?;
            self.guard_cycle(&mut visited, rule, need.product)?;
            let source = rule.source.ok_or_else(|| {
                StockError::configuration(format!(
                    "pull rule {} has no source location to draw from",
                    rule.name
                ))
            })?;

            date -= Duration::days(rule.delay_days);
            let mut document = Move::new(
                need.name.clone(),
                need.product,
                need.quantity,
                source,
                location,
                need.location,
                rule.procure_method,
                date,
            );
            document.rule = Some(rule.id);
            document.group = need.group;
            document.origin = need.origin.clone();
            document.company = need.company;
            document.priority = need.priority;
            document.propagate_cancel = rule.propagate_cancel;
            document.values = need.values.clone();
            document.feeds = moves.last().map(|m| m.id);

            debug!(rule = %rule.id, %source, destination = %location, "chained pull move");
            moves.push(document);

            if rule.procure_method.chains_eagerly() {
                location = source;
            } else {
                break;
            }
        }
        Ok(moves)
    }

    /// React to goods arriving at `document.destination`.
    ///
    /// Automatic rules rewrite the destination in place and re-check at the
    /// new destination; a rule that does not change the destination would
    /// re-apply forever and is rejected. Manual rules produce a follow-on
    /// move (returned for the caller to insert and confirm) that waits on
    /// the arriving one.
    pub fn apply_push(
        &self,
        document: &mut Move,
        ctx: &RoutingContext,
    ) -> StockResult<Option<Move>> {
        let mut visited: Vec<RuleId> = Vec::new();
        loop {
            let Some(rule) = self.find_push_rule(document.product, document.destination, ctx)?
            else {
                return Ok(None);
            };
            self.guard_cycle(&mut visited, rule, document.product)?;

            match rule.auto {
                RuleAuto::Automatic => {
                    if rule.destination == document.destination {
                        return Err(StockError::configuration(format!(
                            "push rule {} forwards {} to itself",
                            rule.name, rule.destination
                        )));
                    }
                    debug!(rule = %rule.id, from = %document.destination, to = %rule.destination, "push rewrote destination");
                    document.destination = rule.destination;
                    document.final_destination = rule.destination;
                    document.scheduled += Duration::days(rule.delay_days);
                }
                RuleAuto::Manual => {
                    let mut follow = Move::new(
                        document.name.clone(),
                        document.product,
                        document.quantity,
                        document.destination,
                        rule.destination,
                        rule.destination,
                        ProcureMethod::TriggerRule,
                        document.scheduled + Duration::days(rule.delay_days),
                    );
                    follow.rule = Some(rule.id);
                    follow.group = document.group;
                    follow.origin = document.origin.clone();
                    follow.company = document.company;
                    follow.priority = document.priority;
                    follow.propagate_cancel = rule.propagate_cancel;
                    follow.values = document.values.clone();
                    follow.state = MoveState::Waiting;
                    document.feeds = Some(follow.id);
                    debug!(rule = %rule.id, follow = %follow.id, "push created follow-on move");
                    return Ok(Some(follow));
                }
            }
        }
    }

    /// Cumulative lead time for replenishing `product` at `destination`:
    /// the sum of every traversed rule's delay plus the visibility buffer.
    pub fn lead_time(
        &self,
        product: ProductId,
        destination: LocationId,
        ctx: &RoutingContext,
    ) -> StockResult<i64> {
        let mut visited: Vec<RuleId> = Vec::new();
        let mut location = destination;
        let mut days = self.visibility_buffer_days;
        loop {
            let rule = self.find_rule(product, location, ctx)?;
            self.guard_cycle(&mut visited, rule, product)?;
            days += rule.delay_days;
            match (rule.procure_method.chains_eagerly(), rule.source) {
                (true, Some(source)) => location = source,
                _ => break,
            }
        }
        Ok(days)
    }

    /// Latest date an order must be placed to arrive by `required_by`.
    pub fn order_date(
        &self,
        required_by: DateTime<Utc>,
        product: ProductId,
        destination: LocationId,
        ctx: &RoutingContext,
    ) -> StockResult<DateTime<Utc>> {
        Ok(required_by - Duration::days(self.lead_time(product, destination, ctx)?))
    }

    fn guard_cycle(
        &self,
        visited: &mut Vec<RuleId>,
        rule: &Rule,
        product: ProductId,
    ) -> StockResult<()> {
        if visited.contains(&rule.id) {
            return Err(StockError::configuration(format!(
                "cyclic rule configuration: rule {} ({}) revisited while routing {product}",
                rule.name, rule.id
            )));
        }
        visited.push(rule.id);
        Ok(())
    }

    /// Candidate route tiers in priority order for one need.
    fn route_tiers(
        &self,
        product: ProductId,
        location: LocationId,
        ctx: &RoutingContext,
    ) -> StockResult<Vec<Vec<RouteId>>> {
        let mut tiers = Vec::with_capacity(4);
        tiers.push(ctx.route_hints.clone());
        tiers.push(self.graph.product_routes(product).to_vec());

        let mut category_tier = Vec::new();
        for category in self.catalog.category_ancestors(product)? {
            category_tier.extend_from_slice(self.graph.category_routes(category));
        }
        tiers.push(category_tier);

        let warehouse = match ctx.warehouse {
            Some(id) => self.warehouses.get(id),
            None => self.warehouses.warehouse_of(self.tree, location)?,
        };
        tiers.push(warehouse.map(|w| w.default_routes.clone()).unwrap_or_default());
        Ok(tiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Route;
    use stockflow_core::{Category, CategoryId, Product, ProductType};
    use stockflow_locations::{Location, LocationUsage, Warehouse};

    struct Fixture {
        tree: LocationTree,
        catalog: ProductCatalog,
        graph: RuleGraph,
        warehouses: WarehouseRegistry,
        view: LocationId,
        stock: LocationId,
        output: LocationId,
        customers: LocationId,
        product: ProductId,
        category: CategoryId,
    }

    impl Fixture {
        fn resolver(&self) -> RuleResolver<'_> {
            RuleResolver {
                graph: &self.graph,
                tree: &self.tree,
                catalog: &self.catalog,
                warehouses: &self.warehouses,
                visibility_buffer_days: 0,
            }
        }

        fn need(&self, quantity: f64, location: LocationId) -> Need {
            Need {
                name: "SO001".to_string(),
                product: self.product,
                quantity,
                location,
                date_planned: Utc::now() + Duration::days(10),
                group: None,
                origin: Some("SO001".to_string()),
                company: None,
                priority: 1,
                values: Map::new(),
            }
        }
    }

    fn fixture() -> Fixture {
        let mut tree = LocationTree::new();
        let view = tree
            .insert(Location::new("WH", None, LocationUsage::View))
            .unwrap();
        let stock = tree
            .insert(Location::new("Stock", Some(view), LocationUsage::Internal))
            .unwrap();
        let output = tree
            .insert(Location::new("Output", Some(view), LocationUsage::Internal))
            .unwrap();
        let customers = tree
            .insert(Location::new("Customers", None, LocationUsage::Customer))
            .unwrap();

        let mut catalog = ProductCatalog::new();
        let category = Category {
            id: CategoryId::new(),
            name: "all".to_string(),
            parent: None,
            removal_strategy: None,
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
        let cid = category.id;
        catalog.insert_category(category);
        catalog.insert_product(product);

        Fixture {
            tree,
            catalog,
            graph: RuleGraph::new(),
            warehouses: WarehouseRegistry::new(),
            view,
            stock,
            output,
            customers,
            product: pid,
            category: cid,
        }
    }

    /// Two-step delivery route: ship from output, replenish output from
    /// stock on demand.
    fn two_step_route(f: &mut Fixture) -> RouteId {
        let route = f.graph.insert_route(Route::new("deliver in two steps"));
        f.graph
            .insert_rule(
                Rule::pull(
                    "output -> customers",
                    route,
                    f.output,
                    f.customers,
                    ProcureMethod::TriggerRule,
                )
                .with_delay(1),
            )
            .unwrap();
        f.graph
            .insert_rule(
                Rule::pull(
                    "stock -> output",
                    route,
                    f.stock,
                    f.output,
                    ProcureMethod::TakeFromStock,
                )
                .with_delay(2),
            )
            .unwrap();
        route
    }

    #[test]
    fn chain_materializes_downstream_first_with_dependency_edges() {
        let mut f = fixture();
        let route = two_step_route(&mut f);
        f.graph.assign_product_route(f.product, route);

        let need = f.need(8.0, f.customers);
        let moves = f
            .resolver()
            .materialize_chain(&need, &RoutingContext::default())
            .unwrap();

        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].source, f.output);
        assert_eq!(moves[0].destination, f.customers);
        assert_eq!(moves[0].procure_method, ProcureMethod::TriggerRule);
        assert_eq!(moves[1].source, f.stock);
        assert_eq!(moves[1].destination, f.output);
        assert_eq!(moves[1].feeds, Some(moves[0].id));
        assert_eq!(moves[0].feeds, None);
        // Every move targets the original need's location.
        assert!(moves.iter().all(|m| m.final_destination == f.customers));
        // Upstream moves are scheduled earlier.
        assert!(moves[1].scheduled < moves[0].scheduled);
    }

    #[test]
    fn lead_time_sums_chain_delays_and_buffer() {
        let mut f = fixture();
        let route = two_step_route(&mut f);
        f.graph.assign_product_route(f.product, route);

        let mut resolver = f.resolver();
        resolver.visibility_buffer_days = 3;
        let days = resolver
            .lead_time(f.product, f.customers, &RoutingContext::default())
            .unwrap();
        assert_eq!(days, 1 + 2 + 3);
    }

    #[test]
    fn product_route_beats_warehouse_default() {
        let mut f = fixture();
        let wh_route = f.graph.insert_route(Route::new("warehouse default"));
        let annex = f
            .tree
            .insert(Location::new("Annex", Some(f.view), LocationUsage::Internal))
            .unwrap();
        f.graph
            .insert_rule(Rule::pull(
                "annex -> customers",
                wh_route,
                annex,
                f.customers,
                ProcureMethod::TakeFromStock,
            ))
            .unwrap();

        let product_route = f.graph.insert_route(Route::new("direct"));
        let direct = f
            .graph
            .insert_rule(Rule::pull(
                "stock -> customers",
                product_route,
                f.stock,
                f.customers,
                ProcureMethod::TakeFromStock,
            ))
            .unwrap();
        f.graph.assign_product_route(f.product, product_route);

        f.warehouses.insert(Warehouse {
            id: WarehouseId::new(),
            name: "Main".to_string(),
            company: CompanyId::new(),
            view_location: f.view,
            stock_location: f.stock,
            default_routes: vec![wh_route],
        });

        let rule = f
            .resolver()
            .find_rule(f.product, f.customers, &RoutingContext::default())
            .unwrap();
        assert_eq!(rule.id, direct);
    }

    #[test]
    fn rule_on_parent_location_serves_child_destination() {
        let mut f = fixture();
        let shelf = f
            .tree
            .insert(Location::new("Shelf", Some(f.stock), LocationUsage::Internal))
            .unwrap();
        let route = f.graph.insert_route(Route::new("internal resupply"));
        let rule_id = f
            .graph
            .insert_rule(Rule::pull(
                "output -> stock",
                route,
                f.output,
                f.stock,
                ProcureMethod::TakeFromStock,
            ))
            .unwrap();
        f.graph.assign_category_route(f.category, route);

        // No rule listens on the shelf itself; the stock-level rule serves.
        let rule = f
            .resolver()
            .find_rule(f.product, shelf, &RoutingContext::default())
            .unwrap();
        assert_eq!(rule.id, rule_id);
    }

    #[test]
    fn missing_rule_is_a_configuration_error() {
        let f = fixture();
        let err = f
            .resolver()
            .find_rule(f.product, f.customers, &RoutingContext::default())
            .unwrap_err();
        assert!(matches!(err, StockError::Configuration(_)));
    }

    #[test]
    fn two_rule_cycle_is_detected() {
        let mut f = fixture();
        let route = f.graph.insert_route(Route::new("ping pong"));
        f.graph
            .insert_rule(Rule::pull(
                "output -> stock",
                route,
                f.output,
                f.stock,
                ProcureMethod::TriggerRule,
            ))
            .unwrap();
        f.graph
            .insert_rule(Rule::pull(
                "stock -> output",
                route,
                f.stock,
                f.output,
                ProcureMethod::TriggerRule,
            ))
            .unwrap();
        f.graph.assign_product_route(f.product, route);

        let err = f
            .resolver()
            .materialize_chain(&f.need(1.0, f.stock), &RoutingContext::default())
            .unwrap_err();
        assert!(matches!(err, StockError::Configuration(_)));
    }

    #[test]
    fn three_rule_cycle_is_detected() {
        let mut f = fixture();
        let annex = f
            .tree
            .insert(Location::new("Annex", Some(f.view), LocationUsage::Internal))
            .unwrap();
        let route = f.graph.insert_route(Route::new("carousel"));
        for (name, src, dest) in [
            ("stock -> output", f.stock, f.output),
            ("annex -> stock", annex, f.stock),
            ("output -> annex", f.output, annex),
        ] {
            f.graph
                .insert_rule(Rule::pull(name, route, src, dest, ProcureMethod::TriggerRule))
                .unwrap();
        }
        f.graph.assign_product_route(f.product, route);

        let err = f
            .resolver()
            .materialize_chain(&f.need(1.0, f.output), &RoutingContext::default())
            .unwrap_err();
        assert!(matches!(err, StockError::Configuration(_)));
    }

    #[test]
    fn automatic_push_rewrites_destination_and_chains() {
        let mut f = fixture();
        let quality = f
            .tree
            .insert(Location::new("Quality", Some(f.view), LocationUsage::Internal))
            .unwrap();
        let route = f.graph.insert_route(Route::new("receipt path"));
        f.graph
            .insert_rule(
                Rule::push("input -> quality", route, f.output, quality, RuleAuto::Automatic)
                    .with_delay(1),
            )
            .unwrap();
        f.graph
            .insert_rule(
                Rule::push("quality -> stock", route, quality, f.stock, RuleAuto::Automatic)
                    .with_delay(2),
            )
            .unwrap();
        f.graph.assign_product_route(f.product, route);

        let mut document = Move::new(
            "IN001",
            f.product,
            5.0,
            f.customers,
            f.output,
            f.output,
            ProcureMethod::TakeFromStock,
            Utc::now(),
        );
        let before = document.scheduled;
        let follow = f
            .resolver()
            .apply_push(&mut document, &RoutingContext::default())
            .unwrap();

        assert!(follow.is_none());
        // Both rewrites applied in place, one document.
        assert_eq!(document.destination, f.stock);
        assert_eq!(document.scheduled, before + Duration::days(3));
    }

    #[test]
    fn manual_push_creates_waiting_follow_on() {
        let mut f = fixture();
        let route = f.graph.insert_route(Route::new("forward"));
        let rule_id = f
            .graph
            .insert_rule(Rule::push(
                "output -> stock",
                route,
                f.output,
                f.stock,
                RuleAuto::Manual,
            ))
            .unwrap();
        f.graph.assign_product_route(f.product, route);

        let mut document = Move::new(
            "IN002",
            f.product,
            5.0,
            f.customers,
            f.output,
            f.output,
            ProcureMethod::TakeFromStock,
            Utc::now(),
        );
        let follow = f
            .resolver()
            .apply_push(&mut document, &RoutingContext::default())
            .unwrap()
            .expect("follow-on move");

        assert_eq!(document.destination, f.output);
        assert_eq!(document.feeds, Some(follow.id));
        assert_eq!(follow.source, f.output);
        assert_eq!(follow.destination, f.stock);
        assert_eq!(follow.rule, Some(rule_id));
        assert_eq!(follow.state, MoveState::Waiting);
    }

    #[test]
    fn non_progressing_automatic_push_is_rejected() {
        let mut f = fixture();
        let route = f.graph.insert_route(Route::new("stuck"));
        f.graph
            .insert_rule(Rule::push(
                "output -> output",
                route,
                f.output,
                f.output,
                RuleAuto::Automatic,
            ))
            .unwrap();
        f.graph.assign_product_route(f.product, route);

        let mut document = Move::new(
            "IN003",
            f.product,
            1.0,
            f.customers,
            f.output,
            f.output,
            ProcureMethod::TakeFromStock,
            Utc::now(),
        );
        let err = f
            .resolver()
            .apply_push(&mut document, &RoutingContext::default())
            .unwrap_err();
        assert!(matches!(err, StockError::Configuration(_)));
    }
}
