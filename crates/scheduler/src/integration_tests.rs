//! End-to-end scenarios across the whole engine: procurement batches,
//! reservation, chaining, putaway refinement, execution and cancellation.

use chrono::Utc;
use serde_json::json;

use stockflow_core::{
    Category, CategoryId, LocationId, Product, ProductCatalog, ProductId, ProductType, StockError,
};
use stockflow_events::{EventBus, InMemoryEventBus};
use stockflow_locations::{Location, LocationTree, LocationUsage, WarehouseRegistry};
use stockflow_putaway::{PutawayRule, PutawayTable, StorageCategory, StorageCategoryRegistry};
use stockflow_quants::{QuantFilter, QuantStore};
use stockflow_rules::{
    Move, MoveState, MoveStateChanged, MoveStore, ProcureMethod, Route, Rule, RuleGraph,
};

use crate::engine::SchedulerEngine;
use crate::request::ProcurementRequest;

struct World {
    tree: LocationTree,
    catalog: ProductCatalog,
    warehouses: WarehouseRegistry,
    graph: RuleGraph,
    storage: StorageCategoryRegistry,
    putaway: PutawayTable,
    quants: QuantStore,
    moves: MoveStore,
    bus: InMemoryEventBus<MoveStateChanged>,
    view: LocationId,
    stock: LocationId,
    output: LocationId,
    suppliers: LocationId,
    customers: LocationId,
    product: ProductId,
    category: CategoryId,
    other_product: ProductId,
}

impl World {
    fn engine(&self) -> SchedulerEngine<'_, InMemoryEventBus<MoveStateChanged>> {
        SchedulerEngine {
            tree: &self.tree,
            catalog: &self.catalog,
            warehouses: &self.warehouses,
            graph: &self.graph,
            storage_categories: &self.storage,
            putaway_rules: &self.putaway,
            quants: &self.quants,
            moves: &self.moves,
            bus: Some(&self.bus),
            visibility_buffer_days: 0,
            sweep_commit_batch: 100,
        }
    }

    fn put_stock(&self, location: LocationId, quantity: f64) {
        self.quants
            .add_stock(
                &self.tree,
                &self.catalog,
                location,
                self.product,
                quantity,
                QuantFilter::any(),
                None,
            )
            .unwrap();
    }

    fn on_hand(&self, location: LocationId) -> f64 {
        self.quants
            .get_quantity(&[location], self.product, &QuantFilter::any())
    }

    /// A confirmed standalone move, bypassing the rule graph.
    fn confirmed_move(&self, quantity: f64, source: LocationId, destination: LocationId) -> Move {
        let document = Move::new(
            "MV/raw",
            self.product,
            quantity,
            source,
            destination,
            destination,
            ProcureMethod::TakeFromStock,
            Utc::now(),
        );
        let id = self.moves.insert(document);
        self.moves.set_state(id, MoveState::Confirmed).unwrap();
        self.moves.get(id).unwrap()
    }
}

fn world() -> World {
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
    let suppliers = tree
        .insert(Location::new("Suppliers", None, LocationUsage::Supplier))
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
    let widget = Product {
        id: ProductId::new(),
        name: "widget".to_string(),
        category: category.id,
        product_type: ProductType::Stockable,
        unit_weight: 1.0,
        uom_rounding: 0.001,
        allow_negative_stock: false,
    };
    let gadget = Product {
        id: ProductId::new(),
        name: "gadget".to_string(),
        category: category.id,
        product_type: ProductType::Stockable,
        unit_weight: 1.0,
        uom_rounding: 0.001,
        allow_negative_stock: false,
    };
    let product = widget.id;
    let other_product = gadget.id;
    let cid = category.id;
    catalog.insert_category(category);
    catalog.insert_product(widget);
    catalog.insert_product(gadget);

    World {
        tree,
        catalog,
        warehouses: WarehouseRegistry::new(),
        graph: RuleGraph::new(),
        storage: StorageCategoryRegistry::new(),
        putaway: PutawayTable::new(),
        quants: QuantStore::new(),
        moves: MoveStore::new(),
        bus: InMemoryEventBus::new(),
        view,
        stock,
        output,
        suppliers,
        customers,
        product,
        category: cid,
        other_product,
    }
}

/// Route serving customer needs straight from stock.
fn delivery_route(w: &mut World, method: ProcureMethod) {
    let route = w.graph.insert_route(Route::new("deliver"));
    w.graph
        .insert_rule(Rule::pull(
            "stock -> customers",
            route,
            w.stock,
            w.customers,
            method,
        ))
        .unwrap();
    w.graph.assign_product_route(w.product, route);
}

/// Replenishment of stock from the supplier location.
fn supply_route(w: &mut World) {
    let route = w.graph.insert_route(Route::new("supply"));
    w.graph
        .insert_rule(Rule::pull(
            "suppliers -> stock",
            route,
            w.suppliers,
            w.stock,
            ProcureMethod::TakeFromStock,
        ))
        .unwrap();
    w.graph.assign_product_route(w.product, route);
}

#[test]
fn batch_creates_and_confirms_moves() {
    let mut w = world();
    delivery_route(&mut w, ProcureMethod::TakeFromStock);
    let subscription = w.bus.subscribe();

    let engine = w.engine();
    let report = engine.run(&[
        ProcurementRequest::new(w.product, 4.0, w.customers, "SO001").with_origin("SO001")
    ]);

    assert!(report.is_success());
    assert_eq!(report.created.len(), 1);
    let (_, ids) = &report.created[0];
    let document = w.moves.get(ids[0]).unwrap();
    assert_eq!(document.state, MoveState::Confirmed);
    assert_eq!(document.source, w.stock);
    assert_eq!(document.destination, w.customers);

    let events = subscription.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].new_state, MoveState::Confirmed);
    assert_eq!(events[0].quantity, 4.0);
}

#[test]
fn zero_quantity_and_service_requests_are_skipped() {
    let mut w = world();
    delivery_route(&mut w, ProcureMethod::TakeFromStock);

    let service = Product {
        id: ProductId::new(),
        name: "support".to_string(),
        category: w.category,
        product_type: ProductType::Service,
        unit_weight: 0.0,
        uom_rounding: 0.001,
        allow_negative_stock: false,
    };
    let service_id = service.id;
    w.catalog.insert_product(service);

    let report = w.engine().run(&[
        ProcurementRequest::new(w.product, 0.0, w.customers, "ZERO"),
        ProcurementRequest::new(service_id, 3.0, w.customers, "SRV"),
    ]);
    assert!(report.is_success());
    assert_eq!(report.skipped, vec![0, 1]);
    assert!(w.moves.is_empty());
}

#[test]
fn batch_continues_past_unroutable_request() {
    let mut w = world();
    delivery_route(&mut w, ProcureMethod::TakeFromStock);

    let report = w.engine().run(&[
        ProcurementRequest::new(w.product, 2.0, w.customers, "REQ1"),
        ProcurementRequest::new(w.other_product, 2.0, w.customers, "REQ2"),
        ProcurementRequest::new(w.product, 2.0, w.customers, "REQ3"),
    ]);

    let fulfilled: Vec<usize> = report.created.iter().map(|(ix, _)| *ix).collect();
    assert_eq!(fulfilled, vec![0, 2]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(report.failures[0].name, "REQ2");
    assert!(matches!(
        report.failures[0].error,
        StockError::Configuration(_)
    ));
    assert!(report.summary().contains("REQ2"));
}

#[test]
fn partial_reservation_chains_shortfall_upstream() {
    let mut w = world();
    delivery_route(&mut w, ProcureMethod::TakeFromStockElseTriggerRule);
    supply_route(&mut w);
    w.put_stock(w.stock, 5.0);

    let engine = w.engine();
    let report = engine.run(&[ProcurementRequest::new(w.product, 8.0, w.customers, "SO002")]);
    assert!(report.is_success());
    let original = report.created[0].1[0];

    let state = engine.assign(original).unwrap();
    assert_eq!(state, MoveState::Assigned);

    // The original shrank to what the ledger could cover.
    let covered = w.moves.get(original).unwrap();
    assert_eq!(covered.quantity, 5.0);
    assert_eq!(covered.procure_method, ProcureMethod::TakeFromStock);
    assert_eq!(w.quants.reserved_by(original), 5.0);

    // The shortfall rides a waiting move chained from the supply route.
    let snapshot = w.moves.snapshot();
    let carrier = snapshot
        .iter()
        .find(|m| m.procure_method == ProcureMethod::TriggerRule && m.quantity == 3.0)
        .expect("carrier move for the shortfall");
    assert_eq!(carrier.state, MoveState::Waiting);
    assert_eq!(carrier.source, w.stock);
    assert_eq!(carrier.destination, w.customers);

    let feeder = snapshot
        .iter()
        .find(|m| m.feeds == Some(carrier.id))
        .expect("upstream replenishment move");
    assert_eq!(feeder.source, w.suppliers);
    assert_eq!(feeder.quantity, 3.0);
    assert_eq!(feeder.state, MoveState::Confirmed);
}

#[test]
fn putaway_diverts_from_capped_location() {
    let mut w = world();
    // A shelf capped at 10 units of the product, 8 already present.
    let capped = w
        .storage
        .insert(StorageCategory::new("capped").with_product_capacity(w.product, 10.0));
    let shelf = w
        .tree
        .insert(
            Location::new("Shelf", Some(w.view), LocationUsage::Internal)
                .with_storage_category(capped),
        )
        .unwrap();
    let overflow = w
        .tree
        .insert(Location::new("Overflow", Some(w.view), LocationUsage::Internal))
        .unwrap();
    w.put_stock(shelf, 8.0);

    w.putaway
        .insert(PutawayRule::for_product(w.product, w.view, shelf));
    w.putaway
        .insert(PutawayRule::for_category(w.category, w.view, overflow).with_sequence(20));

    let route = w.graph.insert_route(Route::new("receive"));
    w.graph
        .insert_rule(Rule::pull(
            "suppliers -> wh",
            route,
            w.suppliers,
            w.view,
            ProcureMethod::TakeFromStock,
        ))
        .unwrap();
    w.graph.assign_product_route(w.product, route);

    let report = w
        .engine()
        .run(&[ProcurementRequest::new(w.product, 5.0, w.view, "IN001")]);
    assert!(report.is_success());
    let document = w.moves.get(report.created[0].1[0]).unwrap();
    // 8 + 5 busts the cap, so the shelf is refused.
    assert_ne!(document.destination, shelf);
    assert_eq!(document.destination, overflow);
}

#[test]
fn execution_moves_stock_and_wakes_downstream() {
    let mut w = world();
    let route = w.graph.insert_route(Route::new("two step out"));
    w.graph
        .insert_rule(Rule::pull(
            "stock -> output",
            route,
            w.stock,
            w.output,
            ProcureMethod::TriggerRule,
        ))
        .unwrap();
    w.graph
        .insert_rule(Rule::pull(
            "suppliers -> stock",
            route,
            w.suppliers,
            w.stock,
            ProcureMethod::TakeFromStock,
        ))
        .unwrap();
    w.graph.assign_product_route(w.product, route);

    let engine = w.engine();
    let report = engine.run(&[ProcurementRequest::new(w.product, 6.0, w.output, "OUT001")]);
    assert!(report.is_success());
    let ids = &report.created[0].1;
    assert_eq!(ids.len(), 2);
    let downstream = ids[0];
    let upstream = ids[1];
    assert_eq!(w.moves.get(downstream).unwrap().state, MoveState::Waiting);
    assert_eq!(w.moves.get(upstream).unwrap().state, MoveState::Confirmed);

    // Receive from the supplier; its virtual location absorbs the draw.
    engine.execute(upstream).unwrap();
    assert_eq!(w.on_hand(w.stock), 6.0);
    assert_eq!(w.moves.get(upstream).unwrap().state, MoveState::Done);
    assert_eq!(w.moves.get(downstream).unwrap().state, MoveState::Confirmed);

    assert_eq!(engine.assign(downstream).unwrap(), MoveState::Assigned);
    engine.execute(downstream).unwrap();
    assert_eq!(w.on_hand(w.output), 6.0);
    assert_eq!(w.on_hand(w.stock), 0.0);
}

#[test]
fn cancel_releases_reservation() {
    let mut w = world();
    delivery_route(&mut w, ProcureMethod::TakeFromStock);
    w.put_stock(w.stock, 5.0);

    let engine = w.engine();
    let report = engine.run(&[ProcurementRequest::new(w.product, 5.0, w.customers, "SO003")]);
    let id = report.created[0].1[0];
    engine.assign(id).unwrap();
    assert_eq!(w.quants.reserved_by(id), 5.0);

    engine.cancel(id).unwrap();
    assert_eq!(w.moves.get(id).unwrap().state, MoveState::Cancelled);
    assert_eq!(w.quants.reserved_by(id), 0.0);
    let summary = w.quants.summary(&w.tree, w.stock, w.product).unwrap();
    assert_eq!(summary.reserved, 0.0);
}

#[test]
fn cancellation_cascades_along_dependency_edges() {
    let mut w = world();
    let route = w.graph.insert_route(Route::new("two step out"));
    w.graph
        .insert_rule(Rule::pull(
            "stock -> output",
            route,
            w.stock,
            w.output,
            ProcureMethod::TriggerRule,
        ))
        .unwrap();
    w.graph
        .insert_rule(Rule::pull(
            "suppliers -> stock",
            route,
            w.suppliers,
            w.stock,
            ProcureMethod::TakeFromStock,
        ))
        .unwrap();
    w.graph.assign_product_route(w.product, route);

    let engine = w.engine();
    let report = engine.run(&[ProcurementRequest::new(w.product, 2.0, w.output, "OUT002")]);
    let downstream = report.created[0].1[0];
    let upstream = report.created[0].1[1];

    engine.cancel(upstream).unwrap();
    assert_eq!(w.moves.get(upstream).unwrap().state, MoveState::Cancelled);
    assert_eq!(w.moves.get(downstream).unwrap().state, MoveState::Cancelled);
}

#[test]
fn cancellation_stops_when_rule_does_not_propagate() {
    let mut w = world();
    let route = w.graph.insert_route(Route::new("two step out"));
    w.graph
        .insert_rule(Rule::pull(
            "stock -> output",
            route,
            w.stock,
            w.output,
            ProcureMethod::TriggerRule,
        ))
        .unwrap();
    w.graph
        .insert_rule(
            Rule::pull(
                "suppliers -> stock",
                route,
                w.suppliers,
                w.stock,
                ProcureMethod::TakeFromStock,
            )
            .without_propagate_cancel(),
        )
        .unwrap();
    w.graph.assign_product_route(w.product, route);

    let engine = w.engine();
    let report = engine.run(&[ProcurementRequest::new(w.product, 2.0, w.output, "OUT003")]);
    let downstream = report.created[0].1[0];
    let upstream = report.created[0].1[1];

    engine.cancel(upstream).unwrap();
    assert_eq!(w.moves.get(upstream).unwrap().state, MoveState::Cancelled);
    assert_eq!(w.moves.get(downstream).unwrap().state, MoveState::Waiting);
}

#[test]
fn sweep_assigns_in_priority_order_as_stock_arrives() {
    let w = world();
    let urgent = {
        let document = w.confirmed_move(5.0, w.stock, w.customers);
        w.moves.modify(document.id, |m| m.priority = 3).unwrap();
        document.id
    };
    let normal = w.confirmed_move(5.0, w.stock, w.customers).id;

    let engine = w.engine();
    // No stock yet: nothing to assign.
    let report = engine.reassign_sweep();
    assert_eq!(report.examined, 2);
    assert_eq!(report.assigned, 0);

    // Only enough for one move; the urgent one must win.
    w.put_stock(w.stock, 5.0);
    let report = engine.reassign_sweep();
    assert_eq!(report.assigned, 1);
    assert_eq!(w.moves.get(urgent).unwrap().state, MoveState::Assigned);
    assert_eq!(w.moves.get(normal).unwrap().state, MoveState::Confirmed);
}

#[test]
fn concurrent_assignment_never_oversubscribes() {
    let w = world();
    w.put_stock(w.stock, 10.0);
    let first = w.confirmed_move(6.0, w.stock, w.customers).id;
    let second = w.confirmed_move(6.0, w.stock, w.customers).id;

    let engine = w.engine();
    std::thread::scope(|scope| {
        let a = scope.spawn(|| engine.assign(first));
        let b = scope.spawn(|| engine.assign(second));
        let _ = a.join().unwrap();
        let _ = b.join().unwrap();
    });

    let total = w.quants.reserved_by(first) + w.quants.reserved_by(second);
    assert!(total <= 10.0 + 1e-9, "reserved {total} of 10 available");
    let summary = w.quants.summary(&w.tree, w.stock, w.product).unwrap();
    assert!(summary.reserved <= summary.on_hand + 1e-9);
}

#[test]
fn quantity_overview_accounts_for_live_moves() {
    let mut w = world();
    delivery_route(&mut w, ProcureMethod::TakeFromStock);
    w.put_stock(w.stock, 10.0);

    let engine = w.engine();
    let report = engine.run(&[ProcurementRequest::new(w.product, 4.0, w.customers, "SO004")]);
    engine.assign(report.created[0].1[0]).unwrap();
    // Inbound replenishment on its way.
    let inbound = w.confirmed_move(3.0, w.suppliers, w.stock).id;
    assert_eq!(w.moves.get(inbound).unwrap().state, MoveState::Confirmed);

    let overview = engine.get_quantities(&[w.product], w.view).unwrap();
    let entry = overview[&w.product];
    assert_eq!(entry.on_hand, 10.0);
    assert_eq!(entry.reserved, 4.0);
    assert_eq!(entry.incoming, 3.0);
    assert_eq!(entry.outgoing, 4.0);
    assert_eq!(entry.forecast, 9.0);
}

#[test]
fn route_hint_overrides_product_route() {
    let mut w = world();
    delivery_route(&mut w, ProcureMethod::TakeFromStock);
    // An alternative source the hint should force.
    let express = w.graph.insert_route(Route::new("express"));
    w.graph
        .insert_rule(Rule::pull(
            "output -> customers",
            express,
            w.output,
            w.customers,
            ProcureMethod::TakeFromStock,
        ))
        .unwrap();

    let report = w.engine().run(&[
        ProcurementRequest::new(w.product, 1.0, w.customers, "SO005")
            .with_value("route_ids", json!([express.to_string()])),
    ]);
    assert!(report.is_success());
    let document = w.moves.get(report.created[0].1[0]).unwrap();
    assert_eq!(document.source, w.output);
}
