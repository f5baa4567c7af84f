//! `stockflow-scheduler` — batched procurement processing.
//!
//! The scheduler is the engine's front door: procurement requests enter in
//! batches, each one resolves to a chain of moves through the rule graph,
//! destinations are refined by the putaway resolver, and reservations are
//! kept current by a recurring re-assignment sweep. Failures are collected
//! per request and reported together; one misconfigured request never
//! blocks the rest of its batch.

pub mod engine;
pub mod report;
pub mod request;

#[cfg(test)]
mod integration_tests;

pub use engine::{QuantityOverview, SchedulerEngine};
pub use report::{BatchReport, RequestFailure, SweepReport};
pub use request::{ProcurementGroup, ProcurementRequest};
