//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the stock engine.
pub type StockResult<T> = Result<T, StockError>;

/// Stock-engine error.
///
/// Keep this focused on deterministic, domain-level failures. The variants
/// map onto the handling policy the scheduler applies:
///
/// - `Configuration`: reported per request, batch processing continues
/// - `Conflict`: transient; bounded retry, then surfaced to the caller
/// - `Integrity`: fatal to the single operation, never partially applied
/// - `Lifecycle`: caller misuse (e.g. cancelling a `done` move)
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StockError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Routing/putaway configuration cannot satisfy the request
    /// (no rule found, cyclic rule chain, impossible storage category).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A transient concurrency conflict (reservation race, lock contention).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A hard invariant would be violated (negative stock where disallowed,
    /// archiving a non-empty location, re-parenting into a cycle).
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// An operation was attempted in the wrong lifecycle state.
    #[error("lifecycle misuse: {0}")]
    Lifecycle(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl StockError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether a bounded retry is worthwhile for this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
