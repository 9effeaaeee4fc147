//! Redb transaction implementation.
//!
//! This module provides the [`RedbTransaction`] type which implements the
//! [`Transaction`] trait for both read-only and read-write transactions.

use std::ops::Bound;

use redb::{ReadTransaction, ReadableTable, WriteTransaction};

use crate::engine::{KeyValue, StorageError, Transaction};

use super::tables::{decode_key, encode_key, table_end_key, table_start_key, DATA_TABLE};

/// A transaction for the redb storage engine.
///
/// Wraps both read-only and read-write redb transactions behind the
/// unified [`Transaction`] trait.
///
/// Boxing the `WriteTransaction` would add indirection on every operation
/// and transactions are short-lived, so the size difference between the
/// variants is accepted.
#[allow(clippy::large_enum_variant)]
pub enum RedbTransaction {
    /// A read-only transaction.
    Read(ReadTransaction),
    /// A read-write transaction.
    Write(WriteTransaction),
}

impl RedbTransaction {
    /// Create a new read-only transaction.
    pub const fn new_read(tx: ReadTransaction) -> Self {
        Self::Read(tx)
    }

    /// Create a new read-write transaction.
    pub const fn new_write(tx: WriteTransaction) -> Self {
        Self::Write(tx)
    }
}

impl Transaction for RedbTransaction {
    fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let physical = encode_key(table, key);
        match self {
            Self::Read(tx) => match tx.open_table(DATA_TABLE) {
                Ok(t) => get_from(&t, &physical),
                // No data table means no data
                Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
                Err(e) => Err(StorageError::Internal(e.to_string())),
            },
            Self::Write(tx) => {
                let t = tx
                    .open_table(DATA_TABLE)
                    .map_err(|e| StorageError::Internal(e.to_string()))?;
                get_from(&t, &physical)
            }
        }
    }

    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        match self {
            Self::Read(_) => Err(StorageError::ReadOnly),
            Self::Write(tx) => {
                let physical = encode_key(table, key);
                let mut t = tx
                    .open_table(DATA_TABLE)
                    .map_err(|e| StorageError::Internal(e.to_string()))?;
                t.insert(physical.as_slice(), value)
                    .map_err(|e| StorageError::Internal(e.to_string()))?;
                Ok(())
            }
        }
    }

    fn delete(&mut self, table: &str, key: &[u8]) -> Result<bool, StorageError> {
        match self {
            Self::Read(_) => Err(StorageError::ReadOnly),
            Self::Write(tx) => {
                let physical = encode_key(table, key);
                let mut t = tx
                    .open_table(DATA_TABLE)
                    .map_err(|e| StorageError::Internal(e.to_string()))?;
                let result = match t.remove(physical.as_slice()) {
                    Ok(Some(_)) => Ok(true),
                    Ok(None) => Ok(false),
                    Err(e) => Err(StorageError::Internal(e.to_string())),
                };
                result
            }
        }
    }

    fn scan(
        &self,
        table: &str,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
    ) -> Result<Vec<KeyValue>, StorageError> {
        let start = physical_start(table, start);
        let end = physical_end(table, end);

        match self {
            Self::Read(tx) => match tx.open_table(DATA_TABLE) {
                Ok(t) => scan_from(&t, table, &start, &end),
                // Table doesn't exist yet: an empty scan, not an error
                Err(redb::TableError::TableDoesNotExist(_)) => Ok(Vec::new()),
                Err(e) => Err(StorageError::Internal(e.to_string())),
            },
            Self::Write(tx) => {
                let t = tx
                    .open_table(DATA_TABLE)
                    .map_err(|e| StorageError::Internal(e.to_string()))?;
                scan_from(&t, table, &start, &end)
            }
        }
    }

    fn commit(self) -> Result<(), StorageError> {
        match self {
            // Read transactions don't need explicit commit
            Self::Read(_) => Ok(()),
            Self::Write(tx) => tx
                .commit()
                .map_err(|e| StorageError::Transaction(e.to_string())),
        }
    }

    fn rollback(self) -> Result<(), StorageError> {
        match self {
            // Read transactions just get dropped
            Self::Read(_) => Ok(()),
            Self::Write(tx) => tx
                .abort()
                .map_err(|e| StorageError::Transaction(e.to_string())),
        }
    }

    fn is_read_only(&self) -> bool {
        matches!(self, Self::Read(_))
    }
}

fn get_from(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    physical: &[u8],
) -> Result<Option<Vec<u8>>, StorageError> {
    match table.get(physical) {
        Ok(Some(value)) => Ok(Some(value.value().to_vec())),
        Ok(None) => Ok(None),
        Err(e) => Err(StorageError::Internal(e.to_string())),
    }
}

fn scan_from(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    logical: &str,
    start: &Bound<Vec<u8>>,
    end: &Bound<Vec<u8>>,
) -> Result<Vec<KeyValue>, StorageError> {
    let range = table
        .range::<&[u8]>((bound_as_slice(start), bound_as_slice(end)))
        .map_err(|e| StorageError::Internal(e.to_string()))?;

    let mut entries = Vec::new();
    for item in range {
        let (k, v) = item.map_err(|e| StorageError::Internal(e.to_string()))?;
        if let Some(key) = decode_key(logical, k.value()) {
            entries.push((key.to_vec(), v.value().to_vec()));
        }
    }
    Ok(entries)
}

/// Map a logical start bound onto the table's physical range.
fn physical_start(table: &str, bound: Bound<&[u8]>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(encode_key(table, k)),
        Bound::Excluded(k) => Bound::Excluded(encode_key(table, k)),
        Bound::Unbounded => Bound::Included(table_start_key(table)),
    }
}

/// Map a logical end bound onto the table's physical range.
fn physical_end(table: &str, bound: Bound<&[u8]>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(encode_key(table, k)),
        Bound::Excluded(k) => Bound::Excluded(encode_key(table, k)),
        Bound::Unbounded => Bound::Excluded(table_end_key(table)),
    }
}

fn bound_as_slice(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
