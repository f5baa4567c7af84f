//! Move documents, their state machine, and the move store.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use stockflow_core::{
    CompanyId, GroupId, LocationId, MoveId, ProductId, RuleId, StockError, StockResult,
};
use stockflow_events::Event;

use crate::rule::ProcureMethod;

/// Lifecycle of a move document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveState {
    Draft,
    /// Confirmed but waiting on an upstream chained move.
    Waiting,
    Confirmed,
    /// Some, but not all, of the demand is reserved.
    PartiallyAvailable,
    /// Reservation fully covers the demand.
    Assigned,
    Done,
    Cancelled,
}

impl MoveState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// Whether the re-assignment sweep should try to reserve for a move in
    /// this state.
    pub fn wants_reservation(self) -> bool {
        matches!(self, Self::Confirmed | Self::PartiallyAvailable)
    }

    /// Legal forward transitions. Cancellation is handled separately since
    /// it is reachable from every non-`Done` state.
    fn can_transition(self, to: MoveState) -> bool {
        use MoveState::*;
        matches!(
            (self, to),
            (Draft, Waiting)
                | (Draft, Confirmed)
                | (Waiting, Confirmed)
                // A confirmed move converts back to waiting when its
                // unreservable demand is re-chained upstream.
                | (Confirmed, Waiting)
                | (Confirmed, PartiallyAvailable)
                | (Confirmed, Assigned)
                | (PartiallyAvailable, Assigned)
                // Unreserving drops a move back to confirmed.
                | (PartiallyAvailable, Confirmed)
                | (Assigned, Confirmed)
                | (Assigned, Done)
        )
    }
}

/// A pending or completed transfer of one product quantity between two
/// locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub id: MoveId,
    pub name: String,
    pub product: ProductId,
    pub quantity: f64,
    pub source: LocationId,
    /// Immediate next hop. Push rules may rewrite this in place.
    pub destination: LocationId,
    /// Where the originating need ultimately wants the goods, fixed across
    /// the whole chain.
    pub final_destination: LocationId,
    pub procure_method: ProcureMethod,
    /// The rule that created this move, if any.
    pub rule: Option<RuleId>,
    pub group: Option<GroupId>,
    pub origin: Option<String>,
    pub company: Option<CompanyId>,
    /// Higher is more urgent; ties broken by date then id in the sweep.
    pub priority: u8,
    /// Creation time.
    pub date: DateTime<Utc>,
    /// Back-computed expected execution date.
    pub scheduled: DateTime<Utc>,
    /// When reservation was first requested for this move.
    pub reservation_date: Option<DateTime<Utc>>,
    pub propagate_cancel: bool,
    /// The downstream move this one supplies (dependency edge; acyclic by
    /// construction since each chained move is created fresh).
    pub feeds: Option<MoveId>,
    pub state: MoveState,
    /// Opaque extension bag carried through from the procurement request.
    pub values: Map<String, Value>,
}

impl Move {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        product: ProductId,
        quantity: f64,
        source: LocationId,
        destination: LocationId,
        final_destination: LocationId,
        procure_method: ProcureMethod,
        scheduled: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MoveId::new(),
            name: name.into(),
            product,
            quantity,
            source,
            destination,
            final_destination,
            procure_method,
            rule: None,
            group: None,
            origin: None,
            company: None,
            priority: 1,
            date: Utc::now(),
            scheduled,
            reservation_date: None,
            propagate_cancel: true,
            feeds: None,
            state: MoveState::Draft,
            values: Map::new(),
        }
    }
}

/// Emitted on the `confirmed`, `done` and `cancelled` transitions for
/// external collaborators (valuation, notifications).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveStateChanged {
    pub move_id: MoveId,
    pub product: ProductId,
    pub quantity: f64,
    pub old_state: MoveState,
    pub new_state: MoveState,
    pub occurred_at: DateTime<Utc>,
}

impl Event for MoveStateChanged {
    fn event_type(&self) -> &'static str {
        "stock.move.state_changed"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// In-memory store of move documents.
///
/// Interior mutability so the scheduler can hold it alongside the quant
/// store behind shared references.
#[derive(Debug, Default)]
pub struct MoveStore {
    moves: RwLock<HashMap<MoveId, Move>>,
}

impl MoveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: Move) -> MoveId {
        let id = document.id;
        let mut moves = self.moves.write().expect("move store lock");
        moves.insert(id, document);
        id
    }

    pub fn get(&self, id: MoveId) -> StockResult<Move> {
        let moves = self.moves.read().expect("move store lock");
        moves
            .get(&id)
            .cloned()
            .ok_or_else(|| StockError::not_found(format!("move {id}")))
    }

    pub fn len(&self) -> usize {
        self.moves.read().expect("move store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply an in-place edit to a move outside its state field.
    pub fn modify(&self, id: MoveId, edit: impl FnOnce(&mut Move)) -> StockResult<()> {
        let mut moves = self.moves.write().expect("move store lock");
        let document = moves
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("move {id}")))?;
        edit(document);
        Ok(())
    }

    /// Transition a move, validating the state machine. Returns the
    /// previous state.
    pub fn set_state(&self, id: MoveId, to: MoveState) -> StockResult<MoveState> {
        let mut moves = self.moves.write().expect("move store lock");
        let document = moves
            .get_mut(&id)
            .ok_or_else(|| StockError::not_found(format!("move {id}")))?;
        let from = document.state;
        if from == to {
            return Ok(from);
        }
        let legal = if to == MoveState::Cancelled {
            from != MoveState::Done
        } else {
            from.can_transition(to)
        };
        if !legal {
            return Err(StockError::lifecycle(format!(
                "move {id} cannot go from {from:?} to {to:?}"
            )));
        }
        document.state = to;
        debug!(%id, ?from, ?to, "move state changed");
        Ok(from)
    }

    /// Remove a cancelled or draft document. Done moves stay as history.
    pub fn remove(&self, id: MoveId) -> StockResult<Move> {
        let mut moves = self.moves.write().expect("move store lock");
        let document = moves
            .get(&id)
            .ok_or_else(|| StockError::not_found(format!("move {id}")))?;
        if !matches!(document.state, MoveState::Draft | MoveState::Cancelled) {
            return Err(StockError::lifecycle(format!(
                "move {id} is {:?} and cannot be removed",
                document.state
            )));
        }
        Ok(moves.remove(&id).expect("checked above"))
    }

    /// Moves awaiting (re-)reservation, in sweep order: reservation date,
    /// priority descending, creation date, id.
    pub fn reservation_queue(&self) -> Vec<Move> {
        let moves = self.moves.read().expect("move store lock");
        let mut queue: Vec<Move> = moves
            .values()
            .filter(|m| m.state.wants_reservation())
            .cloned()
            .collect();
        queue.sort_by(|a, b| {
            let a_key = (a.reservation_date, std::cmp::Reverse(a.priority), a.date, a.id);
            let b_key = (b.reservation_date, std::cmp::Reverse(b.priority), b.date, b.id);
            a_key.cmp(&b_key)
        });
        queue
    }

    /// All moves, id order. For reporting and tests.
    pub fn snapshot(&self) -> Vec<Move> {
        let moves = self.moves.read().expect("move store lock");
        let mut out: Vec<Move> = moves.values().cloned().collect();
        out.sort_by_key(|m| m.id);
        out
    }

    /// Moves currently feeding `id` (their dependency edge points at it).
    pub fn feeders_of(&self, id: MoveId) -> Vec<MoveId> {
        let moves = self.moves.read().expect("move store lock");
        let mut out: Vec<MoveId> = moves
            .values()
            .filter(|m| m.feeds == Some(id))
            .map(|m| m.id)
            .collect();
        out.sort();
        out
    }
}
