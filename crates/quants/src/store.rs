//! The quant store: reserve, move, merge.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stockflow_core::{
    LocationId, MoveId, ProductCatalog, ProductId, QuantId, RemovalStrategy, StockError,
    StockResult, qty,
};
use stockflow_locations::{LocationTree, LocationUsage, ResolvedLocationConfig};

use crate::row::{QuantFilter, QuantRow};
use crate::strategy::removal_comparator;

/// Bounded optimistic-retry budget for contended mutations.
const MAX_ATTEMPTS: usize = 5;

/// Aggregate quantities for one product over a location subtree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantitySummary {
    pub on_hand: f64,
    pub reserved: f64,
    pub available: f64,
}

/// One planned draw against a row, produced by candidate selection and
/// re-validated before being applied.
#[derive(Debug, Clone, Copy)]
struct Draw {
    row: QuantId,
    take: f64,
    /// Whether the draw consumes quantity this move had reserved.
    from_reservation: bool,
}

/// The quant ledger.
///
/// Interior mutability: reads take the row map's read lock; mutations plan
/// against a read snapshot, then re-validate and apply under the write
/// lock, retrying up to [`MAX_ATTEMPTS`] times when a concurrent mutation
/// invalidated the plan. The write section is the engine's single hot
/// lock; a stored deployment would map it onto one persistence transaction.
#[derive(Debug, Default)]
pub struct QuantStore {
    rows: RwLock<HashMap<QuantId, QuantRow>>,
    /// What each move currently holds, so cancellation releases exactly
    /// that: move -> [(row, quantity)].
    reservations: Mutex<HashMap<MoveId, Vec<(QuantId, f64)>>>,
}

impl QuantStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Queries (no side effects)
    // ------------------------------------------------------------------

    /// Sum of on-hand quantity over `locations` for `product`.
    pub fn get_quantity(
        &self,
        locations: &[LocationId],
        product: ProductId,
        filter: &QuantFilter,
    ) -> f64 {
        let rows = self.rows.read().expect("quant rows lock");
        rows.values()
            .filter(|r| r.product == product && locations.contains(&r.location))
            .filter(|r| filter.matches(r))
            .map(|r| r.quantity)
            .sum()
    }

    /// Sum of available-to-promise (on hand minus reserved).
    pub fn available_quantity(
        &self,
        locations: &[LocationId],
        product: ProductId,
        filter: &QuantFilter,
    ) -> f64 {
        let rows = self.rows.read().expect("quant rows lock");
        rows.values()
            .filter(|r| r.product == product && locations.contains(&r.location))
            .filter(|r| filter.matches(r))
            .map(QuantRow::available)
            .sum()
    }

    /// Aggregate summary over a location subtree.
    pub fn summary(
        &self,
        tree: &LocationTree,
        root: LocationId,
        product: ProductId,
    ) -> StockResult<QuantitySummary> {
        let locations = tree.descendants(root)?;
        let rows = self.rows.read().expect("quant rows lock");
        let mut on_hand = 0.0;
        let mut reserved = 0.0;
        for row in rows.values() {
            if row.product == product && locations.contains(&row.location) {
                on_hand += row.quantity;
                reserved += row.reserved;
            }
        }
        Ok(QuantitySummary {
            on_hand,
            reserved,
            available: on_hand - reserved,
        })
    }

    /// Snapshot of all rows, path-stable ordering. Intended for
    /// maintenance reporting and tests.
    pub fn rows_snapshot(&self) -> Vec<QuantRow> {
        let rows = self.rows.read().expect("quant rows lock");
        let mut out: Vec<QuantRow> = rows.values().cloned().collect();
        out.sort_by_key(|r| r.id);
        out
    }

    /// All rows sitting exactly at `location` (not the subtree).
    /// The putaway resolver uses this for capacity checks.
    pub fn rows_at(&self, location: LocationId) -> Vec<QuantRow> {
        let rows = self.rows.read().expect("quant rows lock");
        let mut out: Vec<QuantRow> = rows
            .values()
            .filter(|r| r.location == location)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }

    /// Whether any row at `location` (exactly, not the subtree) carries a
    /// nonzero quantity. Used by the location archive guard.
    pub fn holds_stock(&self, location: LocationId, rounding: f64) -> bool {
        let rows = self.rows.read().expect("quant rows lock");
        rows.values()
            .any(|r| r.location == location && !qty::is_zero(r.quantity, rounding))
    }

    // ------------------------------------------------------------------
    // Inventory adjustment (external counting modules enter here)
    // ------------------------------------------------------------------

    /// Put quantity directly into a location, creating the row lazily.
    ///
    /// This is the inventory-adjustment entry point; routed stock should go
    /// through [`QuantStore::move_quantity`] instead.
    pub fn add_stock(
        &self,
        tree: &LocationTree,
        catalog: &ProductCatalog,
        location: LocationId,
        product: ProductId,
        quantity: f64,
        filter: QuantFilter,
        removal_date: Option<DateTime<Utc>>,
    ) -> StockResult<QuantId> {
        tree.ensure_can_hold_quants(location)?;
        let rounding = catalog.product(product)?.uom_rounding;
        if !qty::is_positive(quantity, rounding) {
            return Err(StockError::validation(format!(
                "cannot add non-positive quantity {quantity}"
            )));
        }
        let mut rows = self.rows.write().expect("quant rows lock");
        let row = QuantRow {
            id: QuantId::new(),
            location,
            product,
            lot: filter.lot,
            package: filter.package,
            owner: filter.owner,
            quantity,
            reserved: 0.0,
            in_date: Utc::now(),
            removal_date,
        };
        let id = row.id;
        rows.insert(id, row);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Reservation
    // ------------------------------------------------------------------

    /// Reserve up to `quantity` for `move_id` at `location` (including its
    /// internal descendants), drawing rows in removal-strategy order.
    ///
    /// Returns the quantity actually reserved, which may be partial: the
    /// caller decides whether a shortfall triggers an upstream rule.
    /// Reservation never overdraws a row: negative stock materializes on
    /// movement, not on promise.
    pub fn reserve(
        &self,
        tree: &LocationTree,
        catalog: &ProductCatalog,
        move_id: MoveId,
        product: ProductId,
        quantity: f64,
        location: LocationId,
        filter: QuantFilter,
    ) -> StockResult<f64> {
        let rounding = catalog.product(product)?.uom_rounding;
        if !qty::is_positive(quantity, rounding) {
            return Ok(0.0);
        }
        tree.ensure_can_hold_quants(location)?;
        let config = ResolvedLocationConfig::resolve(tree, catalog, location, product)?;
        let scope = self.reservable_scope(tree, location)?;

        for attempt in 0..MAX_ATTEMPTS {
            let draws = self.plan_draws(
                tree,
                &scope,
                product,
                quantity,
                filter,
                config.removal_strategy,
                None,
                rounding,
            );

            match self.apply_reservation(move_id, &draws, rounding) {
                Ok(reserved) => {
                    debug!(%move_id, %product, requested = quantity, reserved, "reserved stock");
                    return Ok(reserved);
                }
                Err(_) if attempt + 1 < MAX_ATTEMPTS => continue,
                Err(e) => {
                    warn!(%move_id, %product, attempts = MAX_ATTEMPTS, "reservation retries exhausted");
                    return Err(e);
                }
            }
        }
        unreachable!("loop either returns or errors on the last attempt")
    }

    /// Release everything `move_id` holds. Returns the released quantity.
    pub fn unreserve(&self, move_id: MoveId) -> f64 {
        let held = {
            let mut reservations = self.reservations.lock().expect("reservations lock");
            reservations.remove(&move_id).unwrap_or_default()
        };
        if held.is_empty() {
            return 0.0;
        }
        let mut rows = self.rows.write().expect("quant rows lock");
        let mut released = 0.0;
        for (row_id, amount) in held {
            if let Some(row) = rows.get_mut(&row_id) {
                let take = amount.min(row.reserved);
                row.reserved -= take;
                released += take;
            }
        }
        debug!(%move_id, released, "unreserved stock");
        released
    }

    /// Quantity currently reserved by `move_id`.
    pub fn reserved_by(&self, move_id: MoveId) -> f64 {
        let reservations = self.reservations.lock().expect("reservations lock");
        reservations
            .get(&move_id)
            .map(|held| held.iter().map(|(_, q)| q).sum())
            .unwrap_or(0.0)
    }

    // ------------------------------------------------------------------
    // Movement
    // ------------------------------------------------------------------

    /// Atomically take `quantity` at `from` and put it at `to`.
    ///
    /// Decrement and increment are applied inside one write section, so no
    /// observer ever sees the stock lost or duplicated. Drawing beyond what
    /// is on hand drives the source negative, allowed only where the
    /// resolved configuration permits it, otherwise the operation fails
    /// whole. If `for_move` holds reservations at the source they are
    /// consumed first.
    #[allow(clippy::too_many_arguments)]
    pub fn move_quantity(
        &self,
        tree: &LocationTree,
        catalog: &ProductCatalog,
        from: LocationId,
        to: LocationId,
        product: ProductId,
        quantity: f64,
        filter: QuantFilter,
        for_move: Option<MoveId>,
    ) -> StockResult<()> {
        let rounding = catalog.product(product)?.uom_rounding;
        if !qty::is_positive(quantity, rounding) {
            return Err(StockError::validation(format!(
                "cannot move non-positive quantity {quantity}"
            )));
        }
        tree.ensure_can_hold_quants(to)?;
        let from_node = tree.get(from)?;
        if !from_node.usage.can_hold_quants() {
            return Err(StockError::lifecycle(format!(
                "cannot take stock out of view location {from}"
            )));
        }
        let config = ResolvedLocationConfig::resolve(tree, catalog, from, product)?;
        let to_internal = tree.get(to)?.usage == LocationUsage::Internal;
        let scope = self.reservable_scope(tree, from)?;

        for attempt in 0..MAX_ATTEMPTS {
            let draws = self.plan_draws(
                tree,
                &scope,
                product,
                quantity,
                filter,
                config.removal_strategy,
                for_move,
                rounding,
            );
            let drawn: f64 = draws.iter().map(|d| d.take).sum();
            let shortfall = qty::round(quantity - drawn, rounding);

            if qty::is_positive(shortfall, rounding) && !config.allow_negative_stock {
                return Err(StockError::integrity(format!(
                    "not enough stock of {product} at {from}: short {shortfall} and negative stock is disallowed"
                )));
            }

            match self.apply_move(
                from, to, product, &draws, shortfall, filter, for_move, to_internal, rounding,
            ) {
                Ok(()) => {
                    debug!(%product, %from, %to, quantity, "moved stock");
                    return Ok(());
                }
                Err(_) if attempt + 1 < MAX_ATTEMPTS => continue,
                Err(e) => {
                    warn!(%product, %from, %to, attempts = MAX_ATTEMPTS, "move retries exhausted");
                    return Err(e);
                }
            }
        }
        unreachable!("loop either returns or errors on the last attempt")
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Coalesce rows sharing the same composite key and drop empty rows.
    ///
    /// Partial reservations and moves fragment the ledger; merging keeps
    /// row counts bounded. Running it twice without intervening movement is
    /// a no-op the second time. Reservation bookkeeping follows merged
    /// rows. Returns the number of rows removed.
    pub fn merge_quants(&self, catalog: &ProductCatalog) -> usize {
        let mut rows = self.rows.write().expect("quant rows lock");
        let mut reservations = self.reservations.lock().expect("reservations lock");

        let mut by_key: HashMap<crate::row::QuantKey, Vec<QuantId>> = HashMap::new();
        for row in rows.values() {
            by_key.entry(row.key()).or_default().push(row.id);
        }

        let mut removed = 0usize;
        for ids in by_key.values_mut() {
            if ids.len() < 2 {
                continue;
            }
            // Deterministic survivor: smallest id (time-ordered UUIDv7,
            // so the oldest row survives).
            ids.sort();
            let survivor = ids[0];
            let mut merged_qty = 0.0;
            let mut merged_reserved = 0.0;
            let mut earliest_in = None;
            let mut earliest_removal: Option<DateTime<Utc>> = None;
            for id in ids.iter() {
                let row = &rows[id];
                merged_qty += row.quantity;
                merged_reserved += row.reserved;
                earliest_in = Some(match earliest_in {
                    None => row.in_date,
                    Some(d) if row.in_date < d => row.in_date,
                    Some(d) => d,
                });
                earliest_removal = match (earliest_removal, row.removal_date) {
                    (None, r) => r,
                    (Some(e), Some(r)) if r < e => Some(r),
                    (e, _) => e,
                };
            }
            for id in ids.iter().skip(1) {
                rows.remove(id);
                removed += 1;
            }
            let row = rows.get_mut(&survivor).expect("survivor kept");
            row.quantity = merged_qty;
            row.reserved = merged_reserved;
            row.in_date = earliest_in.expect("at least one row merged");
            row.removal_date = earliest_removal;

            for held in reservations.values_mut() {
                for entry in held.iter_mut() {
                    if ids[1..].contains(&entry.0) {
                        entry.0 = survivor;
                    }
                }
            }
        }

        // Garbage-collect emptied rows.
        let empty: Vec<QuantId> = rows
            .values()
            .filter(|r| {
                let rounding = catalog
                    .product(r.product)
                    .map(|p| p.uom_rounding)
                    .unwrap_or(qty::DEFAULT_ROUNDING);
                r.is_empty(rounding)
            })
            .map(|r| r.id)
            .collect();
        for id in empty {
            rows.remove(&id);
            removed += 1;
        }

        if removed > 0 {
            debug!(removed, "merged quant rows");
        }
        removed
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Locations a reservation at `root` may draw from: the root plus its
    /// active quant-holding descendants.
    fn reservable_scope(
        &self,
        tree: &LocationTree,
        root: LocationId,
    ) -> StockResult<Vec<LocationId>> {
        Ok(tree
            .descendants(root)?
            .into_iter()
            .filter(|id| {
                tree.get(*id)
                    .map(|n| n.active && n.usage.can_hold_quants())
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Select draws against a read snapshot, preferred-domain style:
    /// reservation rows held by `for_move` first, then matching-lot rows,
    /// then lot-less rows, each pass ordered by the removal strategy.
    #[allow(clippy::too_many_arguments)]
    fn plan_draws(
        &self,
        tree: &LocationTree,
        scope: &[LocationId],
        product: ProductId,
        quantity: f64,
        filter: QuantFilter,
        strategy: RemovalStrategy,
        for_move: Option<MoveId>,
        rounding: f64,
    ) -> Vec<Draw> {
        let rows = self.rows.read().expect("quant rows lock");
        let mut draws: Vec<Draw> = Vec::new();
        let mut remaining = quantity;

        // Pass 0: quantity this move already reserved.
        if let Some(move_id) = for_move {
            let reservations = self.reservations.lock().expect("reservations lock");
            if let Some(held) = reservations.get(&move_id) {
                for (row_id, amount) in held {
                    if !qty::is_positive(remaining, rounding) {
                        break;
                    }
                    let Some(row) = rows.get(row_id) else { continue };
                    if row.product != product || !scope.contains(&row.location) {
                        continue;
                    }
                    let take = amount.min(remaining).min(row.reserved);
                    if qty::is_positive(take, rounding) {
                        draws.push(Draw {
                            row: *row_id,
                            take,
                            from_reservation: true,
                        });
                        remaining = qty::round(remaining - take, rounding);
                    }
                }
            }
        }

        let comparator = removal_comparator(strategy, tree);
        let passes: Vec<Box<dyn Fn(&QuantRow) -> bool>> = match filter.lot {
            Some(lot) => vec![
                Box::new(move |r: &QuantRow| r.lot == Some(lot)),
                Box::new(|r: &QuantRow| r.lot.is_none()),
            ],
            None => vec![Box::new(|_: &QuantRow| true)],
        };

        for pass in passes {
            if !qty::is_positive(remaining, rounding) {
                break;
            }
            let mut candidates: Vec<&QuantRow> = rows
                .values()
                .filter(|r| r.product == product && scope.contains(&r.location))
                .filter(|r| filter.matches_strict(r) && pass(r))
                .filter(|r| qty::is_positive(r.available(), rounding))
                .filter(|r| !draws.iter().any(|d| d.row == r.id))
                .collect();
            candidates.sort_by(|a, b| comparator(a, b));

            for row in candidates {
                if !qty::is_positive(remaining, rounding) {
                    break;
                }
                let take = row.available().min(remaining);
                draws.push(Draw {
                    row: row.id,
                    take,
                    from_reservation: false,
                });
                remaining = qty::round(remaining - take, rounding);
            }
        }

        draws
    }

    /// Re-validate planned reservation draws under the write lock and
    /// apply them. A stale plan returns `Conflict` so the caller retries.
    fn apply_reservation(
        &self,
        move_id: MoveId,
        draws: &[Draw],
        rounding: f64,
    ) -> StockResult<f64> {
        let mut rows = self.rows.write().expect("quant rows lock");

        for draw in draws {
            let row = rows
                .get(&draw.row)
                .ok_or_else(|| StockError::conflict("row vanished during reservation"))?;
            if qty::compare(row.available(), draw.take, rounding) == std::cmp::Ordering::Less {
                return Err(StockError::conflict(
                    "available quantity changed during reservation",
                ));
            }
        }

        let mut reserved = 0.0;
        for draw in draws {
            let row = rows.get_mut(&draw.row).expect("validated above");
            row.reserved += draw.take;
            reserved += draw.take;
        }
        drop(rows);

        if reserved > 0.0 {
            let mut reservations = self.reservations.lock().expect("reservations lock");
            let held = reservations.entry(move_id).or_default();
            for draw in draws {
                held.push((draw.row, draw.take));
            }
        }
        Ok(qty::round(reserved, rounding))
    }

    /// Re-validate and apply a movement plan: decrement sources (possibly
    /// creating a negative row), increment/create the destination row, and
    /// net out negative counterparts at an internal destination, all in
    /// one write section.
    #[allow(clippy::too_many_arguments)]
    fn apply_move(
        &self,
        from: LocationId,
        to: LocationId,
        product: ProductId,
        draws: &[Draw],
        shortfall: f64,
        filter: QuantFilter,
        for_move: Option<MoveId>,
        to_internal: bool,
        rounding: f64,
    ) -> StockResult<()> {
        let mut rows = self.rows.write().expect("quant rows lock");

        for draw in draws {
            let row = rows
                .get(&draw.row)
                .ok_or_else(|| StockError::conflict("row vanished during move"))?;
            let limit = if draw.from_reservation {
                row.reserved
            } else {
                row.available()
            };
            if qty::compare(limit, draw.take, rounding) == std::cmp::Ordering::Less {
                return Err(StockError::conflict("quantity changed during move"));
            }
        }

        let mut moved = 0.0;
        let mut carried_removal: Option<DateTime<Utc>> = None;
        for draw in draws {
            let row = rows.get_mut(&draw.row).expect("validated above");
            row.quantity -= draw.take;
            if draw.from_reservation {
                row.reserved -= draw.take;
            }
            carried_removal = match (carried_removal, row.removal_date) {
                (None, r) => r,
                (Some(c), Some(r)) if r < c => Some(r),
                (c, _) => c,
            };
            moved += draw.take;
        }

        // Source shortfall becomes a negative counterpart row.
        if qty::is_positive(shortfall, rounding) {
            let key_match = |r: &QuantRow| {
                r.location == from
                    && r.product == product
                    && r.lot == filter.lot
                    && r.package == filter.package
                    && r.owner == filter.owner
            };
            if let Some(existing) = rows.values_mut().find(|r| key_match(r)) {
                existing.quantity -= shortfall;
            } else {
                let row = QuantRow {
                    id: QuantId::new(),
                    location: from,
                    product,
                    lot: filter.lot,
                    package: filter.package,
                    owner: filter.owner,
                    quantity: -shortfall,
                    reserved: 0.0,
                    in_date: Utc::now(),
                    removal_date: None,
                };
                rows.insert(row.id, row);
            }
            moved = qty::round(moved + shortfall, rounding);
        }

        // Destination: merge into an existing same-key row or create one.
        let dest_existing = rows
            .values_mut()
            .find(|r| {
                r.location == to
                    && r.product == product
                    && r.lot == filter.lot
                    && r.package == filter.package
                    && r.owner == filter.owner
                    && r.quantity >= 0.0
            })
            .map(|r| r.id);
        let dest_id = match dest_existing {
            Some(id) => {
                let row = rows.get_mut(&id).expect("just found");
                row.quantity += moved;
                id
            }
            None => {
                let row = QuantRow {
                    id: QuantId::new(),
                    location: to,
                    product,
                    lot: filter.lot,
                    package: filter.package,
                    owner: filter.owner,
                    quantity: moved,
                    reserved: 0.0,
                    in_date: Utc::now(),
                    removal_date: carried_removal,
                };
                let id = row.id;
                rows.insert(id, row);
                id
            }
        };

        // Net incoming stock against negative counterparts at an internal
        // destination.
        if to_internal {
            let negative_ids: Vec<QuantId> = rows
                .values()
                .filter(|r| {
                    r.id != dest_id
                        && r.location == to
                        && r.product == product
                        && r.lot == filter.lot
                        && r.owner == filter.owner
                        && r.quantity < 0.0
                })
                .map(|r| r.id)
                .collect();
            for neg_id in negative_ids {
                let deficit = -rows[&neg_id].quantity;
                let positive = rows[&dest_id].quantity;
                let settle = deficit.min(positive);
                if !qty::is_positive(settle, rounding) {
                    continue;
                }
                rows.get_mut(&neg_id).expect("negative row").quantity += settle;
                rows.get_mut(&dest_id).expect("dest row").quantity -= settle;
            }
        }

        // Drop rows this move fully consumed and release the matching
        // reservation bookkeeping.
        let consumed: Vec<QuantId> = draws
            .iter()
            .map(|d| d.row)
            .filter(|id| rows.get(id).map(|r| r.is_empty(rounding)).unwrap_or(false))
            .collect();
        for id in &consumed {
            rows.remove(id);
        }
        drop(rows);

        if let Some(move_id) = for_move {
            let mut reservations = self.reservations.lock().expect("reservations lock");
            if let Some(held) = reservations.get_mut(&move_id) {
                for draw in draws.iter().filter(|d| d.from_reservation) {
                    if let Some(pos) = held.iter().position(|(row, _)| *row == draw.row) {
                        let (_, amount) = held[pos];
                        let rest = qty::round(amount - draw.take, rounding);
                        if qty::is_positive(rest, rounding) {
                            held[pos].1 = rest;
                        } else {
                            held.swap_remove(pos);
                        }
                    }
                }
                if held.is_empty() {
                    reservations.remove(&move_id);
                }
            }
        }

        Ok(())
    }
}
