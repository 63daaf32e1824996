use thiserror::Error;

use florist_core::DomainError;

/// Storage failure.
///
/// These are infrastructure errors, as opposed to the deterministic business
/// failures carried by [`DomainError`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed an operation (connection, SQL, pool).
    #[error("store backend error in {operation}: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// A concurrent transaction won; the whole operation may be retried.
    #[error("serialization conflict in {0}")]
    SerializationConflict(&'static str),

    /// A persisted row could not be mapped back to a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend(operation: &'static str, message: impl ToString) -> Self {
        Self::Backend {
            operation,
            message: message.to_string(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Error returned by every engine operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(err) => Some(err),
            ServiceError::Store(_) => None,
        }
    }

    /// 500-class failures: broken ledger invariants and storage failures.
    /// Serialization conflicts are transient and not counted.
    pub fn is_internal(&self) -> bool {
        match self {
            ServiceError::Domain(err) => err.is_internal(),
            ServiceError::Store(StoreError::SerializationConflict(_)) => false,
            ServiceError::Store(_) => true,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
