//! Strongly-typed identifiers used across the engine.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StockError;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $t:ident) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in
            /// tests for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = StockError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s).map_err(|e| {
                    StockError::validation(format!(concat!(stringify!($t), ": {}"), e))
                })?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a product.
    ProductId
);
uuid_id!(
    /// Identifier of a product category.
    CategoryId
);
uuid_id!(
    /// Identifier of a location in the warehouse tree.
    LocationId
);
uuid_id!(
    /// Identifier of a warehouse.
    WarehouseId
);
uuid_id!(
    /// Identifier of a lot/serial number.
    LotId
);
uuid_id!(
    /// Identifier of a physical package.
    PackageId
);
uuid_id!(
    /// Identifier of a package type (pallet, box, ...).
    PackageTypeId
);
uuid_id!(
    /// Identifier of an owner (consignment partner).
    OwnerId
);
uuid_id!(
    /// Identifier of a company (multi-company boundary).
    CompanyId
);
uuid_id!(
    /// Identifier of a quant ledger row.
    QuantId
);
uuid_id!(
    /// Identifier of a stock move document.
    MoveId
);
uuid_id!(
    /// Identifier of a stock rule.
    RuleId
);
uuid_id!(
    /// Identifier of a route (ordered rule set).
    RouteId
);
uuid_id!(
    /// Identifier of a procurement group.
    GroupId
);
uuid_id!(
    /// Identifier of a storage category.
    StorageCategoryId
);
uuid_id!(
    /// Identifier of a putaway rule.
    PutawayRuleId
);
