//! Error types for the core crate.

use thiserror::Error;

/// Errors that can occur in the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A value is not usable as a primary or index key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A value is not usable as a record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// An encoding or decoding error occurred.
    #[error("encoding error: {0}")]
    Encoding(String),
}
