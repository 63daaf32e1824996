//! Aggregate root trait for domain models that own child rows.

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};

/// Aggregate root: an entity that owns child lines (orders own order lines,
/// events own event lines) and is always loaded and saved as a whole.
pub trait AggregateRoot: Entity {
    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Bumped once per committed mutation; stores use it as an optimistic
    /// concurrency guard on save.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The aggregate must not exist yet.
    New,
    /// Require the stored aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::New, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}
