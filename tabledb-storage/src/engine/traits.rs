//! Core storage engine traits.

use std::ops::Bound;

use super::StorageError;

/// An owned key-value pair returned by a scan.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// A storage engine that provides transactional key-value operations over
/// named logical tables.
///
/// Tables are identified by name; they spring into existence on first
/// write and reading a table that was never written behaves as reading an
/// empty one.
pub trait StorageEngine: Send + Sync + 'static {
    /// The transaction type for this engine.
    type Transaction<'a>: Transaction
    where
        Self: 'a;

    /// Begin a read-only transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] if the transaction cannot start.
    fn begin_read(&self) -> Result<Self::Transaction<'_>, StorageError>;

    /// Begin a read-write transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] if the transaction cannot start.
    fn begin_write(&self) -> Result<Self::Transaction<'_>, StorageError>;
}

/// A transaction over the engine's tables.
///
/// A write transaction is atomic: either [`commit`](Self::commit) makes
/// every mutation visible, or dropping / [`rollback`](Self::rollback)
/// discards all of them.
pub trait Transaction {
    /// Get a value by key from a table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the backend fails.
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Put a key-value pair into a table, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadOnly`] on a read transaction.
    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key from a table.
    ///
    /// Returns `true` if the key existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadOnly`] on a read transaction.
    fn delete(&mut self, table: &str, key: &[u8]) -> Result<bool, StorageError>;

    /// Scan a key range of a table, materialized in ascending key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the backend fails.
    fn scan(
        &self,
        table: &str,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
    ) -> Result<Vec<KeyValue>, StorageError>;

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] if the commit fails; the
    /// transaction is rolled back in that case.
    fn commit(self) -> Result<(), StorageError>;

    /// Roll back the transaction (implicit on drop for uncommitted
    /// transactions).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] if the abort itself fails.
    fn rollback(self) -> Result<(), StorageError>;

    /// Whether this is a read-only transaction.
    fn is_read_only(&self) -> bool;
}
