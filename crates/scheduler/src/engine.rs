//! The procurement scheduler.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use stockflow_core::{
    CompanyId, LocationId, MoveId, ProductCatalog, ProductId, StockError, StockResult, qty,
};
use stockflow_events::EventBus;
use stockflow_locations::{LocationTree, LocationUsage, WarehouseRegistry};
use stockflow_putaway::{PutawayResolver, PutawayTable, StorageCategoryRegistry};
use stockflow_quants::{QuantFilter, QuantStore};
use stockflow_rules::{
    Move, MoveState, MoveStateChanged, MoveStore, Need, ProcureMethod, RoutingContext, RuleGraph,
    RuleResolver,
};

use crate::report::{BatchReport, RequestFailure, SweepReport};
use crate::request::{
    ProcurementRequest, date_planned_from, package_type_from, route_hints_from, warehouse_from,
};

/// Per-product stock overview over a location subtree, for reporting and
/// replenishment decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantityOverview {
    pub on_hand: f64,
    pub reserved: f64,
    /// Demand arriving from outside the subtree on live moves.
    pub incoming: f64,
    /// Demand leaving the subtree on live moves.
    pub outgoing: f64,
    /// `on_hand + incoming - outgoing`.
    pub forecast: f64,
}

/// The scheduler: batches procurement requests into move chains, keeps
/// reservations current, and retires or cancels move documents.
///
/// Configuration stores (tree, catalog, graph, warehouses, putaway) are
/// read-only here; the quant ledger and move store are the mutable state.
pub struct SchedulerEngine<'a, B> {
    pub tree: &'a LocationTree,
    pub catalog: &'a ProductCatalog,
    pub warehouses: &'a WarehouseRegistry,
    pub graph: &'a RuleGraph,
    pub storage_categories: &'a StorageCategoryRegistry,
    pub putaway_rules: &'a PutawayTable,
    pub quants: &'a QuantStore,
    pub moves: &'a MoveStore,
    /// Outbound observer boundary; transitions are applied to the stores
    /// before publication.
    pub bus: Option<&'a B>,
    /// Extra scheduling slack applied once per chain, in days.
    pub visibility_buffer_days: i64,
    /// Sweep checkpoint interval (commit batch size in a stored
    /// deployment).
    pub sweep_commit_batch: usize,
}

impl<'a, B> SchedulerEngine<'a, B>
where
    B: EventBus<MoveStateChanged>,
{
    // ------------------------------------------------------------------
    // Batch processing
    // ------------------------------------------------------------------

    /// Process a procurement batch.
    ///
    /// Requests are grouped per company and attempted one by one; a failed
    /// request never stops the rest of the batch, and a request either
    /// produces its whole move chain or nothing.
    pub fn run(&self, requests: &[ProcurementRequest]) -> BatchReport {
        let mut report = BatchReport::default();
        for (company, indexes) in group_by_company(requests) {
            debug!(?company, count = indexes.len(), "processing procurement batch");
            for index in indexes {
                let request = &requests[index];
                match self.process_request(request) {
                    Ok(None) => report.skipped.push(index),
                    Ok(Some(ids)) => report.created.push((index, ids)),
                    Err(error) => {
                        warn!(name = %request.name, %error, "procurement request failed");
                        report.failures.push(RequestFailure {
                            index,
                            name: request.name.clone(),
                            error,
                        });
                    }
                }
            }
        }
        if report.failures.is_empty() {
            info!(created = report.created.len(), skipped = report.skipped.len(), "procurement batch done");
        } else {
            warn!(summary = %report.summary(), "procurement batch done with failures");
        }
        report
    }

    /// Serve one request: resolve its rule chain, refine destinations, and
    /// confirm the created moves. `Ok(None)` means the request was a no-op.
    fn process_request(&self, request: &ProcurementRequest) -> StockResult<Option<Vec<MoveId>>> {
        let product = self.catalog.product(request.product)?;
        if !product.is_stockable() {
            debug!(name = %request.name, "skipping non-stockable product");
            return Ok(None);
        }
        if qty::is_zero(request.quantity, product.uom_rounding) {
            debug!(name = %request.name, "skipping zero-quantity request");
            return Ok(None);
        }
        if !qty::is_positive(request.quantity, product.uom_rounding) {
            return Err(StockError::validation(format!(
                "negative procurement quantity {}",
                request.quantity
            )));
        }

        let ctx = RoutingContext {
            route_hints: request.route_hints(),
            warehouse: request.warehouse(),
        };
        let need = Need {
            name: request.name.clone(),
            product: request.product,
            quantity: request.quantity,
            location: request.location,
            date_planned: request.date_planned().unwrap_or_else(Utc::now),
            group: request.group(),
            origin: request.origin.clone(),
            company: request.company,
            priority: request.priority(),
            values: request.values.clone(),
        };

        let resolver = self.resolver();
        let mut chain = resolver.materialize_chain(&need, &ctx)?;
        // Push rules react only to the terminal move; chained moves already
        // have their destination dictated by the pull graph.
        let mut extra = Vec::new();
        if let Some(follow) = resolver.apply_push(&mut chain[0], &ctx)? {
            extra.push(follow);
        }
        for document in chain.iter_mut().chain(extra.iter_mut()) {
            document.destination = self.refine_destination(document)?;
        }
        // Nothing was inserted until here, so any failure above leaves no
        // partial state behind.
        chain.extend(extra);
        Ok(Some(self.insert_and_confirm(chain)?))
    }

    /// Insert a set of related moves and confirm them: a move another one
    /// feeds waits for its feeder, the rest go straight to confirmed.
    fn insert_and_confirm(&self, documents: Vec<Move>) -> StockResult<Vec<MoveId>> {
        let fed: Vec<MoveId> = documents.iter().filter_map(|m| m.feeds).collect();
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let id = document.id;
            let waiting = fed.contains(&id);
            let starts_waiting = document.state == MoveState::Waiting;
            self.moves.insert(document);
            if !starts_waiting {
                let to = if waiting {
                    MoveState::Waiting
                } else {
                    MoveState::Confirmed
                };
                let old = self.moves.set_state(id, to)?;
                self.publish(id, old, to);
            }
            ids.push(id);
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Reservation
    // ------------------------------------------------------------------

    /// Try to reserve a move's demand against the quant ledger.
    ///
    /// Full coverage transitions the move to assigned, partial coverage to
    /// partially available. A shortfall on a
    /// `take_from_stock_else_trigger_rule` move is re-chained: the move
    /// shrinks to the covered quantity and a new waiting move with
    /// procure method `trigger_rule` carries the rest, supplied by a fresh
    /// upstream chain. Returns the move's resulting state.
    pub fn assign(&self, id: MoveId) -> StockResult<MoveState> {
        let document = self.moves.get(id)?;
        if !document.state.wants_reservation() {
            return Err(StockError::lifecycle(format!(
                "move {id} is {:?} and cannot be assigned",
                document.state
            )));
        }
        let rounding = self.catalog.product(document.product)?.uom_rounding;
        let already = self.quants.reserved_by(id);
        let remaining = qty::round(document.quantity - already, rounding);
        let mut newly = 0.0;
        if qty::is_positive(remaining, rounding) {
            newly = self.quants.reserve(
                self.tree,
                self.catalog,
                id,
                document.product,
                remaining,
                document.source,
                QuantFilter::any(),
            )?;
        }
        if document.reservation_date.is_none() {
            self.moves
                .modify(id, |m| m.reservation_date = Some(Utc::now()))?;
        }

        let covered = already + newly;
        let shortfall = qty::round(document.quantity - covered, rounding);
        if !qty::is_positive(shortfall, rounding) {
            let old = self.moves.set_state(id, MoveState::Assigned)?;
            self.publish(id, old, MoveState::Assigned);
            return Ok(MoveState::Assigned);
        }

        let has_feeders = !self.moves.feeders_of(id).is_empty();
        if document.procure_method == ProcureMethod::TakeFromStockElseTriggerRule && !has_feeders {
            return self.chain_shortfall(&document, covered, shortfall, rounding);
        }

        if qty::is_positive(covered, rounding) && document.state == MoveState::Confirmed {
            let old = self.moves.set_state(id, MoveState::PartiallyAvailable)?;
            self.publish(id, old, MoveState::PartiallyAvailable);
            return Ok(MoveState::PartiallyAvailable);
        }
        Ok(self.moves.get(id)?.state)
    }

    /// Split an under-covered move and source the shortfall upstream.
    fn chain_shortfall(
        &self,
        document: &Move,
        covered: f64,
        shortfall: f64,
        rounding: f64,
    ) -> StockResult<MoveState> {
        let ctx = RoutingContext {
            route_hints: route_hints_from(&document.values),
            warehouse: warehouse_from(&document.values),
        };
        let need = Need {
            name: document.name.clone(),
            product: document.product,
            quantity: shortfall,
            location: document.source,
            date_planned: date_planned_from(&document.values).unwrap_or(document.scheduled),
            group: document.group,
            origin: document.origin.clone(),
            company: document.company,
            priority: document.priority,
            values: document.values.clone(),
        };
        // Resolve the upstream chain before touching anything; a missing
        // rule leaves the move untouched and surfaces as a configuration
        // error.
        let mut chain = self.resolver().materialize_chain(&need, &ctx)?;

        if qty::is_positive(covered, rounding) {
            // The covered part keeps the original document.
            let mut carrier = Move::new(
                document.name.clone(),
                document.product,
                shortfall,
                document.source,
                document.destination,
                document.final_destination,
                ProcureMethod::TriggerRule,
                document.scheduled,
            );
            carrier.rule = document.rule;
            carrier.group = document.group;
            carrier.origin = document.origin.clone();
            carrier.company = document.company;
            carrier.priority = document.priority;
            carrier.propagate_cancel = document.propagate_cancel;
            carrier.values = document.values.clone();
            carrier.feeds = document.feeds;
            chain[0].feeds = Some(carrier.id);
            chain.push(carrier);

            self.insert_and_confirm(chain)?;
            self.moves.modify(document.id, |m| {
                m.quantity = covered;
                m.procure_method = ProcureMethod::TakeFromStock;
            })?;
            let old = self.moves.set_state(document.id, MoveState::Assigned)?;
            self.publish(document.id, old, MoveState::Assigned);
            debug!(original = %document.id, covered, shortfall, "split partially covered move");
            Ok(MoveState::Assigned)
        } else {
            // Nothing covered: the whole move becomes the chained carrier.
            chain[0].feeds = Some(document.id);
            self.insert_and_confirm(chain)?;
            self.moves
                .modify(document.id, |m| m.procure_method = ProcureMethod::TriggerRule)?;
            self.moves.set_state(document.id, MoveState::Waiting)?;
            debug!(original = %document.id, shortfall, "re-chained uncovered move upstream");
            Ok(MoveState::Waiting)
        }
    }

    /// Re-assignment sweep over all moves awaiting reservation, in fixed
    /// order (reservation date, priority descending, creation date, id).
    pub fn reassign_sweep(&self) -> SweepReport {
        let queue = self.moves.reservation_queue();
        let mut report = SweepReport {
            examined: queue.len(),
            ..SweepReport::default()
        };
        for (processed, document) in queue.iter().enumerate() {
            if self.sweep_commit_batch > 0
                && processed > 0
                && processed % self.sweep_commit_batch == 0
            {
                debug!(processed, "sweep checkpoint");
            }
            match self.assign(document.id) {
                Ok(MoveState::Assigned) => report.assigned += 1,
                Ok(MoveState::PartiallyAvailable) => report.partially_available += 1,
                Ok(_) => {}
                Err(error) => {
                    warn!(id = %document.id, %error, "sweep could not assign move");
                    report.failures += 1;
                }
            }
        }
        info!(
            examined = report.examined,
            assigned = report.assigned,
            partial = report.partially_available,
            "re-assignment sweep done"
        );
        report
    }

    /// Quant-merge maintenance. Returns the number of rows removed.
    pub fn merge_maintenance(&self) -> usize {
        self.quants.merge_quants(self.catalog)
    }

    // ------------------------------------------------------------------
    // Execution and cancellation
    // ------------------------------------------------------------------

    /// Physically execute a move: transfer its quantity in the ledger and
    /// retire the document to done. Reserved stock is consumed first; a
    /// shortfall falls back on the ledger's negative-stock policy, which
    /// is how receipts from supplier locations execute without
    /// reservation.
    pub fn execute(&self, id: MoveId) -> StockResult<()> {
        let document = self.moves.get(id)?;
        if !matches!(
            document.state,
            MoveState::Confirmed | MoveState::PartiallyAvailable | MoveState::Assigned
        ) {
            return Err(StockError::lifecycle(format!(
                "move {id} is {:?} and cannot be executed",
                document.state
            )));
        }
        self.quants.move_quantity(
            self.tree,
            self.catalog,
            document.source,
            document.destination,
            document.product,
            document.quantity,
            QuantFilter::any(),
            Some(id),
        )?;
        if document.state != MoveState::Assigned {
            self.moves.set_state(id, MoveState::Assigned)?;
        }
        let old = self.moves.set_state(id, MoveState::Done)?;
        self.publish(id, old, MoveState::Done);

        // Wake the move this one supplies once every feeder has arrived.
        if let Some(downstream) = document.feeds {
            let all_arrived = self
                .moves
                .feeders_of(downstream)
                .iter()
                .all(|f| matches!(self.moves.get(*f).map(|m| m.state), Ok(MoveState::Done)));
            if all_arrived && self.moves.get(downstream)?.state == MoveState::Waiting {
                let old = self.moves.set_state(downstream, MoveState::Confirmed)?;
                self.publish(downstream, old, MoveState::Confirmed);
            }
        }
        Ok(())
    }

    /// Cancel a move: release its reservations, retire it, and cascade to
    /// the move it feeds when the originating rule propagates
    /// cancellation. The cascade follows the move-dependency chain, which
    /// is acyclic by construction, and stops at done moves.
    pub fn cancel(&self, id: MoveId) -> StockResult<()> {
        let document = self.moves.get(id)?;
        self.quants.unreserve(id);
        let old = self.moves.set_state(id, MoveState::Cancelled)?;
        self.publish(id, old, MoveState::Cancelled);

        if document.propagate_cancel {
            if let Some(downstream) = document.feeds {
                match self.moves.get(downstream) {
                    Ok(next) if !next.state.is_terminal() => self.cancel(downstream)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Stock overview per product over the subtree under `root`.
    pub fn get_quantities(
        &self,
        products: &[ProductId],
        root: LocationId,
    ) -> StockResult<HashMap<ProductId, QuantityOverview>> {
        let scope = self.tree.descendants(root)?;
        let documents = self.moves.snapshot();
        let mut out = HashMap::with_capacity(products.len());
        for &product in products {
            let summary = self.quants.summary(self.tree, root, product)?;
            let mut incoming = 0.0;
            let mut outgoing = 0.0;
            for document in &documents {
                if document.product != product || document.state.is_terminal() {
                    continue;
                }
                let from_inside = scope.contains(&document.source);
                let to_inside = scope.contains(&document.destination);
                if to_inside && !from_inside {
                    incoming += document.quantity;
                }
                if from_inside && !to_inside {
                    outgoing += document.quantity;
                }
            }
            out.insert(
                product,
                QuantityOverview {
                    on_hand: summary.on_hand,
                    reserved: summary.reserved,
                    incoming,
                    outgoing,
                    forecast: summary.on_hand + incoming - outgoing,
                },
            );
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn resolver(&self) -> RuleResolver<'a> {
        RuleResolver {
            graph: self.graph,
            tree: self.tree,
            catalog: self.catalog,
            warehouses: self.warehouses,
            visibility_buffer_days: self.visibility_buffer_days,
        }
    }

    /// Refine a move's destination to a concrete storage sub-location.
    /// Only internal and view destinations are refined; virtual
    /// counterparts (customers, production) are taken as-is.
    fn refine_destination(&self, document: &Move) -> StockResult<LocationId> {
        let node = self.tree.get(document.destination)?;
        if !matches!(node.usage, LocationUsage::Internal | LocationUsage::View) {
            return Ok(document.destination);
        }
        let resolver = PutawayResolver {
            tree: self.tree,
            catalog: self.catalog,
            quants: self.quants,
            storage_categories: self.storage_categories,
            rules: self.putaway_rules,
        };
        resolver.resolve(
            document.destination,
            document.product,
            document.quantity,
            package_type_from(&document.values),
        )
    }

    fn publish(&self, id: MoveId, old: MoveState, new: MoveState) {
        if !matches!(
            new,
            MoveState::Confirmed | MoveState::Done | MoveState::Cancelled
        ) {
            return;
        }
        let Some(bus) = self.bus else { return };
        let Ok(document) = self.moves.get(id) else {
            return;
        };
        let event = MoveStateChanged {
            move_id: id,
            product: document.product,
            quantity: document.quantity,
            old_state: old,
            new_state: new,
            occurred_at: Utc::now(),
        };
        if let Err(error) = bus.publish(event) {
            // Store state is already updated; the transition can be
            // re-announced by a later sweep or replay.
            warn!(%id, ?error, "failed to publish move state change");
        }
    }
}

/// Request indexes grouped per company, first-seen order preserved.
fn group_by_company(requests: &[ProcurementRequest]) -> Vec<(Option<CompanyId>, Vec<usize>)> {
    let mut groups: Vec<(Option<CompanyId>, Vec<usize>)> = Vec::new();
    for (index, request) in requests.iter().enumerate() {
        match groups.iter_mut().find(|(c, _)| *c == request.company) {
            Some((_, indexes)) => indexes.push(index),
            None => groups.push((request.company, vec![index])),
        }
    }
    groups
}
