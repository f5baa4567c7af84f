//! `stockflow-putaway` — location placement for incoming goods.
//!
//! Given a product (optionally a package type), a quantity and a candidate
//! subtree, the resolver picks the most specific compliant child location:
//! putaway rules are ranked by specificity, and each candidate target is
//! checked against its storage category's capacity constraints before it
//! is accepted.

pub mod category;
pub mod resolver;
pub mod rule;

pub use category::{AllowNewProduct, CapacityRule, StorageCategory, StorageCategoryRegistry};
pub use resolver::PutawayResolver;
pub use rule::{PutawayRule, PutawayTable};
