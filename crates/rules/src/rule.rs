//! Routing rules: pull, push, or both, attached to routes.

use serde::{Deserialize, Serialize};

use stockflow_core::{LocationId, RouteId, RuleId};

/// What a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Creates a supply move in reaction to a downstream need.
    Pull,
    /// Creates a follow-on move in reaction to goods arriving at the
    /// rule's source location.
    Push,
    /// Both behaviors on one rule.
    PullPush,
}

impl RuleAction {
    pub fn pulls(self) -> bool {
        matches!(self, Self::Pull | Self::PullPush)
    }

    pub fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::PullPush)
    }
}

/// How a push rule materializes its effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAuto {
    /// No separate document: rewrite the arriving move's destination in
    /// place.
    Automatic,
    /// Create a follow-on move instead.
    Manual,
}

/// How a pull move sources its quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcureMethod {
    /// Reserve against whatever is on hand at the source.
    TakeFromStock,
    /// Always chain a new procurement at the source.
    TriggerRule,
    /// Reserve what is on hand; chain a procurement for the shortfall.
    TakeFromStockElseTriggerRule,
}

impl ProcureMethod {
    /// Whether materializing a move with this method immediately chains an
    /// upstream need (shortfall-driven chaining happens at reservation
    /// time instead).
    pub fn chains_eagerly(self) -> bool {
        self == Self::TriggerRule
    }
}

/// A routing rule.
///
/// For pull behavior, `destination` is where the rule listens for needs
/// and `source` is where the created move draws from. For push behavior,
/// `source` is the arrival location that triggers the rule and
/// `destination` is where goods are forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub route: RouteId,
    pub action: RuleAction,
    pub source: Option<LocationId>,
    pub destination: LocationId,
    pub procure_method: ProcureMethod,
    /// Lead time contributed by this hop, in days.
    pub delay_days: i64,
    pub auto: RuleAuto,
    /// Cancelling a move created by this rule cascades to the move it
    /// feeds.
    pub propagate_cancel: bool,
    /// Disambiguation within a route (lower first).
    pub sequence: u32,
    pub active: bool,
}

impl Rule {
    pub fn pull(
        name: impl Into<String>,
        route: RouteId,
        source: LocationId,
        destination: LocationId,
        procure_method: ProcureMethod,
    ) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            route,
            action: RuleAction::Pull,
            source: Some(source),
            destination,
            procure_method,
            delay_days: 0,
            auto: RuleAuto::Manual,
            propagate_cancel: true,
            sequence: 10,
            active: true,
        }
    }

    pub fn push(
        name: impl Into<String>,
        route: RouteId,
        source: LocationId,
        destination: LocationId,
        auto: RuleAuto,
    ) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            route,
            action: RuleAction::Push,
            source: Some(source),
            destination,
            procure_method: ProcureMethod::TakeFromStock,
            delay_days: 0,
            auto,
            propagate_cancel: true,
            sequence: 10,
            active: true,
        }
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_delay(mut self, days: i64) -> Self {
        self.delay_days = days;
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn without_propagate_cancel(mut self) -> Self {
        self.propagate_cancel = false;
        self
    }
}
