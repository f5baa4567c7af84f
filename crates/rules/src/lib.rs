//! `stockflow-rules` — routing rules, routes, and move documents.
//!
//! A need for stock at a location is served by a pull rule found by
//! walking the location's ancestors through prioritized route tiers; the
//! rule materializes one move, or a whole chain of them when its procure
//! method triggers an upstream need. Push rules react to arrivals instead,
//! rewriting a move's destination in place or creating a follow-on
//! document. Both directions share one cycle guard per chain.

pub mod resolver;
pub mod route;
pub mod rule;
pub mod stock_move;

pub use resolver::{Need, RoutingContext, RuleResolver};
pub use route::{Route, RuleGraph};
pub use rule::{ProcureMethod, Rule, RuleAction, RuleAuto};
pub use stock_move::{Move, MoveState, MoveStateChanged, MoveStore};
