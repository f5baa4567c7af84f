//! `stockflow-core` — shared foundation for the stock engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure
//! concerns): typed identifiers, the shared error model, float quantity
//! helpers, and the product/category configuration records the other
//! crates read.

pub mod error;
pub mod id;
pub mod product;
pub mod qty;

pub use error::{StockError, StockResult};
pub use id::{
    CategoryId, CompanyId, GroupId, LocationId, LotId, MoveId, OwnerId, PackageId, PackageTypeId,
    ProductId, PutawayRuleId, QuantId, RouteId, RuleId, StorageCategoryId, WarehouseId,
};
pub use product::{Category, Product, ProductCatalog, ProductType, RemovalStrategy};
