//! `stockflow-locations` — the warehouse location tree.
//!
//! Locations form a tree stored arena-style (a table of nodes keyed by id)
//! with a **materialized path** per node. Ancestor/descendant membership is
//! a string prefix compare instead of a recursive walk, and the path of an
//! entire subtree is renumbered transactionally when a node is re-parented.
//!
//! The tree also owns the configuration-resolution chains that depend on
//! location ancestry: removal strategy (location override → product
//! category → FIFO default) and the negative-stock policy.

pub mod config;
pub mod tree;
pub mod warehouse;

pub use config::ResolvedLocationConfig;
pub use tree::{Location, LocationTree, LocationUsage};
pub use warehouse::{Warehouse, WarehouseRegistry};
