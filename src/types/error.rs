//! Error types for the ledger
//!
//! This module defines every error the store, the transaction manager and the
//! spend operation can return. No data-level fault panics; all failures are
//! returned as a `StoreError`.
//!
//! # Error Categories
//!
//! - **Not found**: the requested user does not exist. Recoverable, never retried.
//! - **Constraint violation**: e.g. duplicate email on create.
//! - **Conflict**: a concurrent scope committed first (serialization failure,
//!   busy database). Transient; callers may retry.
//! - **Backend**: any other storage fault, with the failing operation attached.
//! - **Commit / rollback wrappers**: preserve the primary cause.

use super::user::UserId;
use thiserror::Error;

/// Main error type for the ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// No user with this id exists
    #[error("User {id} not found")]
    NotFound {
        /// The id that was looked up
        id: UserId,
    },

    /// A backend constraint rejected the statement (e.g. duplicate email)
    #[error("Constraint violation in {operation}: {message}")]
    ConstraintViolation {
        /// Operation that failed
        operation: String,
        /// Backend message naming the constraint
        message: String,
    },

    /// The scope lost a race against a concurrent scope
    ///
    /// Raised when a read is no longer current at write or commit time, or
    /// when the database is busy. Nothing from the failing scope persists.
    #[error("Serialization conflict in {operation}: {message}")]
    Conflict {
        /// Operation that failed
        operation: String,
        /// Description of the conflict
        message: String,
    },

    /// Any other storage failure
    #[error("Storage error in {operation}: {message}")]
    Backend {
        /// Operation that failed
        operation: String,
        /// Description of the failure
        message: String,
    },

    /// Committing the transactional context failed
    ///
    /// The unit of work succeeded but none of its effects are durable.
    #[error("Commit failed: {source}")]
    Commit {
        /// The commit failure
        source: Box<StoreError>,
    },

    /// The unit of work failed and rolling back failed too
    ///
    /// `source` is the original failure; `rollback` is secondary context.
    #[error("{source} (rollback also failed: {rollback})")]
    RollbackFailed {
        /// The original failure from the unit of work
        source: Box<StoreError>,
        /// The rollback failure
        rollback: Box<StoreError>,
    },

    /// Balance arithmetic would overflow
    #[error("Arithmetic overflow in {operation} for user {id}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
        /// User id
        id: UserId,
    },
}

// Helper functions for creating common errors

impl StoreError {
    /// Create a NotFound error
    pub fn not_found(id: UserId) -> Self {
        StoreError::NotFound { id }
    }

    /// Create a ConstraintViolation error
    pub fn constraint_violation(operation: &str, message: impl Into<String>) -> Self {
        StoreError::ConstraintViolation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(operation: &str, message: impl Into<String>) -> Self {
        StoreError::Conflict {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a Backend error
    pub fn backend(operation: &str, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Wrap a commit failure
    pub fn commit(source: StoreError) -> Self {
        StoreError::Commit {
            source: Box::new(source),
        }
    }

    /// Attach a rollback failure to the original error
    pub fn rollback_failed(source: StoreError, rollback: StoreError) -> Self {
        StoreError::RollbackFailed {
            source: Box::new(source),
            rollback: Box::new(rollback),
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str, id: UserId) -> Self {
        StoreError::ArithmeticOverflow {
            operation: operation.to_string(),
            id,
        }
    }

    /// Whether this error means "no such user"
    ///
    /// Looks through commit and rollback wrappers to the primary cause.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Commit { source } | StoreError::RollbackFailed { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }

    /// Whether retrying the whole scope may succeed
    ///
    /// Only serialization conflicts qualify, including a commit that failed
    /// because of one.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict { .. } => true,
            StoreError::Commit { source } | StoreError::RollbackFailed { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }
}
