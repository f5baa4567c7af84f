//! Removal-strategy comparators.
//!
//! The strategy is a pluggable ordering over candidate quant rows, injected
//! into the candidate-selection step of reservation and movement. Every
//! ordering ends on the row id so that equal rows sort deterministically
//! across runs.

use std::cmp::Ordering;

use stockflow_core::RemovalStrategy;
use stockflow_locations::LocationTree;

use crate::row::QuantRow;

/// Build the comparator for `strategy`.
///
/// `ClosestLocation` needs the tree to order rows by materialized path
/// (lexicographic path order is traversal order, so "closest" means
/// earliest in the subtree walk).
pub fn removal_comparator(
    strategy: RemovalStrategy,
    tree: &LocationTree,
) -> impl Fn(&QuantRow, &QuantRow) -> Ordering + '_ {
    move |a: &QuantRow, b: &QuantRow| match strategy {
        RemovalStrategy::Fifo => a
            .in_date
            .cmp(&b.in_date)
            .then_with(|| a.id.cmp(&b.id)),
        RemovalStrategy::Lifo => b
            .in_date
            .cmp(&a.in_date)
            .then_with(|| b.id.cmp(&a.id)),
        RemovalStrategy::Fefo => {
            // Rows without a removal date sort last (nothing to expire).
            let ra = a.removal_date;
            let rb = b.removal_date;
            match (ra, rb) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| a.in_date.cmp(&b.in_date))
            .then_with(|| a.id.cmp(&b.id))
        }
        RemovalStrategy::ClosestLocation => {
            let pa = tree.get(a.location).map(|l| l.path().to_string());
            let pb = tree.get(b.location).map(|l| l.path().to_string());
            pa.unwrap_or_default()
                .cmp(&pb.unwrap_or_default())
                .then_with(|| a.in_date.cmp(&b.in_date))
                .then_with(|| a.id.cmp(&b.id))
        }
        RemovalStrategy::LeastPackages => {
            // Loose stock before packed stock; within packed stock, bigger
            // rows first so fewer packages are opened.
            let packed_a = a.package.is_some();
            let packed_b = b.package.is_some();
            packed_a
                .cmp(&packed_b)
                .then_with(|| {
                    b.quantity
                        .partial_cmp(&a.quantity)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        }
    }
}
