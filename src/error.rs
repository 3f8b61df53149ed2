//! Error taxonomy for Beacon.
//!
//! Every failure the engine can report falls into one of five buckets.
//! Validation, permission, and transition errors are rejected before any
//! mutation; a collaborator error on a record write propagates to the caller
//! as retryable. Scoring and notification degrade instead of failing (see
//! `scoring` and `notify`), so a collaborator hiccup there never surfaces as
//! a request failure.

use thiserror::Error;

use crate::model::AlertStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input: out-of-range coordinates, non-positive radius,
    /// missing required fields. Nothing was persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A role-gated operation was attempted by a principal without the
    /// authority role. No state change.
    #[error("operation requires the authority role")]
    Permission,

    /// The requested lifecycle edge does not exist. State unchanged.
    #[error("illegal alert transition: {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    /// A referenced record does not exist (or no longer exists).
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The record store (or another collaborator) failed. Retryable.
    #[error("record store failure: {0}")]
    Collaborator(#[from] sqlx::Error),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True when the underlying store rejected a write for violating a
    /// UNIQUE constraint. The incident ledger retries reference generation
    /// on exactly this case.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            CoreError::Collaborator(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
