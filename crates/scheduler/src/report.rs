//! Aggregated batch and sweep outcomes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockflow_core::{MoveId, StockError};

/// One request the batch could not serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFailure {
    /// Index of the request in the submitted batch.
    pub index: usize,
    pub name: String,
    pub error: StockError,
}

/// Outcome of one `run()` call over a procurement batch.
///
/// Every request is attempted; failures are collected here instead of
/// aborting the batch. A request either produced all of its moves or none
/// of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Per fulfilled request, the moves it created (chain order,
    /// downstream first).
    pub created: Vec<(usize, Vec<MoveId>)>,
    /// Requests skipped as no-ops (zero quantity, non-stockable product).
    pub skipped: Vec<usize>,
    pub failures: Vec<RequestFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human-readable roll-up, grouping identical failure messages so a
    /// batch of N similar misconfigurations reads as one line.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} fulfilled, {} skipped, {} failed",
            self.created.len(),
            self.skipped.len(),
            self.failures.len()
        )];
        let mut grouped: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for failure in &self.failures {
            grouped
                .entry(failure.error.to_string())
                .or_default()
                .push(&failure.name);
        }
        for (message, names) in grouped {
            lines.push(format!("{message} ({})", names.join(", ")));
        }
        lines.join("; ")
    }
}

/// Outcome of one re-assignment sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub assigned: usize,
    pub partially_available: usize,
    pub failures: usize,
}
