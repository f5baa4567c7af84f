//! `stockflow-quants` — the per-location, per-product quantity ledger.
//!
//! Quants are the hot-path mutable state of the engine: every reservation
//! and every physical movement reads and writes them. The store keeps one
//! row per (location, product, lot, package, owner) tuple; rows are
//! created lazily on first movement in, periodically merged when partial
//! operations fragment them, and garbage-collected once empty.
//!
//! Concurrency model: mutations are planned against a read snapshot, then
//! re-validated and applied under a single write section; a failed
//! re-validation retries the whole operation a bounded number of times
//! before surfacing a transient [`StockError::Conflict`]. Two concurrent
//! reservations against the same rows can therefore never oversubscribe
//! available-to-promise.

pub mod row;
pub mod store;
pub mod strategy;

pub use row::{QuantFilter, QuantKey, QuantRow};
pub use store::{QuantStore, QuantitySummary};
pub use strategy::removal_comparator;
