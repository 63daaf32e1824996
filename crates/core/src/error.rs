//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::StockItemId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// One item that could not cover a requested quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub item_id: StockItemId,
    pub required: i64,
    pub available: i64,
}

impl Shortage {
    pub fn new(item_id: StockItemId, required: i64, available: i64) -> Self {
        Self {
            item_id,
            required,
            available,
        }
    }

    /// Units missing to satisfy the request.
    pub fn missing(&self) -> i64 {
        (self.required - self.available).max(0)
    }
}

impl core::fmt::Display for Shortage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} (required {}, available {})",
            self.item_id, self.required, self.available
        )
    }
}

fn join_shortages(shortages: &[Shortage]) -> String {
    shortages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Storage
/// failures live in the infrastructure layer and wrap this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. zero quantity, empty name).
    #[error("validation failed: {0}")]
    Validation(String),

    /// One or more items cannot cover the requested quantities.
    ///
    /// Recoverable by the caller (reduce quantities, restock, pick another item).
    #[error("insufficient stock: {}", join_shortages(.0))]
    InsufficientStock(Vec<Shortage>),

    /// A state transition is not permitted from the current state.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// Unknown order, event, line, product or stock item.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A reservation counter would go negative.
    ///
    /// Correct callers never reach this; it signals a bug and is surfaced as an
    /// internal failure.
    #[error("inconsistent reservation: {0}")]
    InconsistentReservation(String),

    /// A domain invariant was violated (e.g. editing lines of a finished order).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A conflict occurred (duplicate id, stale version, repeated operation).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient(item_id: StockItemId, required: i64, available: i64) -> Self {
        Self::InsufficientStock(vec![Shortage::new(item_id, required, available)])
    }

    pub fn invalid_transition(
        from: impl core::fmt::Debug,
        to: impl core::fmt::Debug,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::InconsistentReservation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Shortages carried by an `InsufficientStock` error (empty otherwise).
    pub fn shortages(&self) -> &[Shortage] {
        match self {
            DomainError::InsufficientStock(s) => s,
            _ => &[],
        }
    }

    /// Whether this error indicates a bug rather than a caller mistake.
    pub fn is_internal(&self) -> bool {
        matches!(self, DomainError::InconsistentReservation(_))
    }
}
