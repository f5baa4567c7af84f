//! Quant ledger rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{LocationId, LotId, OwnerId, PackageId, ProductId, QuantId, qty};

/// Composite key identifying "the same stock" for merging and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuantKey {
    pub location: LocationId,
    pub product: ProductId,
    pub lot: Option<LotId>,
    pub package: Option<PackageId>,
    pub owner: Option<OwnerId>,
}

/// One ledger row: on-hand and reserved quantity of a product at a
/// location, optionally scoped by lot, package and owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantRow {
    pub id: QuantId,
    pub location: LocationId,
    pub product: ProductId,
    pub lot: Option<LotId>,
    pub package: Option<PackageId>,
    pub owner: Option<OwnerId>,
    /// On-hand quantity. Signed; negative only where the resolved
    /// configuration allows it.
    pub quantity: f64,
    /// Quantity promised to moves. `0 <= reserved <= quantity` unless
    /// negative stock is allowed for this row's product/location.
    pub reserved: f64,
    /// When this stock arrived (FIFO/LIFO ordering basis).
    pub in_date: DateTime<Utc>,
    /// Expiration-driven removal date (FEFO ordering basis).
    pub removal_date: Option<DateTime<Utc>>,
}

impl QuantRow {
    pub fn key(&self) -> QuantKey {
        QuantKey {
            location: self.location,
            product: self.product,
            lot: self.lot,
            package: self.package,
            owner: self.owner,
        }
    }

    /// Quantity still promisable from this row.
    pub fn available(&self) -> f64 {
        self.quantity - self.reserved
    }

    /// Whether the row carries nothing at all and can be collected.
    pub fn is_empty(&self, rounding: f64) -> bool {
        qty::is_zero(self.quantity, rounding) && qty::is_zero(self.reserved, rounding)
    }
}

/// Row-matching filter for queries and candidate selection.
///
/// `None` on a dimension means "any" for queries. Reservation and movement
/// use [`QuantFilter::matches_strict`], where `None` means "rows without
/// that attribute" (taking anonymous stock never silently consumes an
/// owner's consignment or a packed pallet).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantFilter {
    pub lot: Option<LotId>,
    pub package: Option<PackageId>,
    pub owner: Option<OwnerId>,
}

impl QuantFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_lot(lot: LotId) -> Self {
        Self {
            lot: Some(lot),
            ..Self::default()
        }
    }

    /// Wildcard semantics: unset dimensions match everything.
    pub fn matches(&self, row: &QuantRow) -> bool {
        self.lot.is_none_or(|l| row.lot == Some(l))
            && self.package.is_none_or(|p| row.package == Some(p))
            && self.owner.is_none_or(|o| row.owner == Some(o))
    }

    /// Exact semantics on package/owner (`None` matches only unset rows).
    /// The lot dimension stays preferential: reservation consumes
    /// matching-lot rows first and lot-less rows second, so it is checked
    /// by the selection passes, not here.
    pub fn matches_strict(&self, row: &QuantRow) -> bool {
        self.package == row.package && self.owner == row.owner
    }
}
