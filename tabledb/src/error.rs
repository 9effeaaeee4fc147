//! Error types for the facade crate.

use thiserror::Error;

use tabledb_core::TransactionError;
use tabledb_storage::StorageError;

/// Errors that can occur when using TableDB.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was attempted after the session was closed.
    #[error("session is closed")]
    Closed,

    /// `close()` was called on a session that is already closed.
    #[error("session is already closed")]
    AlreadyClosed,

    /// The open configuration is malformed, or an operation received
    /// input it cannot act on (an empty `set` list, a record whose key
    /// field holds a non-key value, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// A record passed to a write operation lacks its primary-key field.
    #[error("record for table '{table}' is missing its key field '{key_path}'")]
    MissingKey {
        /// The table the record was destined for.
        table: String,
        /// The key path the record should have carried.
        key_path: String,
    },

    /// The transactional apply layer failed: a duplicate key, a missing
    /// update target, a unique-index violation, or a storage fault
    /// surfaced mid-transaction. The batch the operation belonged to was
    /// rolled back.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// The storage engine failed outside a transaction (opening the
    /// store, beginning or committing a transaction).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The host has no usable embedded storage location.
    #[error("embedded storage unavailable: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns `true` for errors raised by the engine rather than by
    /// input validation.
    #[must_use]
    pub const fn is_engine_error(&self) -> bool {
        matches!(self, Self::Transaction(_) | Self::Storage(_))
    }
}

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
