//! Transaction error types.

use thiserror::Error;

/// Errors that can occur while applying operations inside a storage
/// transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The storage layer returned an error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The named table is not declared in the store's schema.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The named index is not declared on the table.
    #[error("index '{index}' not found on table '{table}'")]
    IndexNotFound {
        /// The table the index was looked up on.
        table: String,
        /// The missing index name.
        index: String,
    },

    /// A record that an operation requires does not exist.
    #[error("no record with key {key} in table '{table}'")]
    KeyNotFound {
        /// The table that was searched.
        table: String,
        /// Display form of the missing key.
        key: String,
    },

    /// A uniqueness constraint was violated (duplicate primary key, or a
    /// unique index collision).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Attempted a write operation on a read-only transaction.
    #[error("cannot write in read-only transaction")]
    ReadOnly,

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TransactionError {
    /// Returns `true` if this is a "not found" type error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. } | Self::TableNotFound(_) | Self::IndexNotFound { .. }
        )
    }

    /// Returns `true` if this is a uniqueness violation.
    #[must_use]
    pub const fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }
}

/// Result type alias for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;
