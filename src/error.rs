// Typed error taxonomy for the ledger core.
// Uniqueness violations are distinguished structurally from other storage
// faults so callers never have to sniff error message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage-layer 5-tuple uniqueness constraint rejected a write.
    /// When this happens at batch commit, the whole batch has been rolled
    /// back and nothing was persisted.
    #[error("uniqueness constraint violated: a transaction with the same unit, timestamp, student, description and amount already exists")]
    UniqueViolation,

    /// Any other SQLite fault. The failed operation had no partial effect.
    #[error("storage error: {0}")]
    Storage(rusqlite::Error),
}

// Classify at the conversion boundary so `?` on any rusqlite error yields
// the structured variant.
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::UniqueViolation
            }
            _ => StoreError::Storage(err),
        }
    }
}

/// User-facing rejection reasons for a disbursement request.
#[derive(Debug, Error)]
pub enum DisbursementError {
    #[error("disbursement amount must be greater than zero (got {0})")]
    InvalidAmount(f64),

    /// The request exceeds the unit's available cash. Both values are raw
    /// decimals; currency formatting is a presentation concern.
    #[error("insufficient funds: requested {requested} but only {available} available")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
