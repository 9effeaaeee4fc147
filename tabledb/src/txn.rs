//! The transactional apply layer.
//!
//! [`TableTransaction`] wraps one storage transaction and applies
//! per-record operations against it: the record codec, primary-key
//! resolution, and secondary-index maintenance all live here. The facade
//! runs every batch through one of these and commits once, so a batch
//! either lands whole or not at all: the first failing sub-operation
//! propagates out, the transaction rolls back, and later sub-operations
//! never run.

use std::ops::Bound;

use serde_json::{json, Value};

use tabledb_core::encoding::keys::{
    decode_key, encode_index_entry, encode_index_prefix, encode_key, prefix_upper_bound,
};
use tabledb_core::{Key, Record, TransactionError, TransactionResult};
use tabledb_storage::{KeyValue, StorageError, Transaction};

use crate::range::ResolvedRange;
use crate::schema::{self, tables, Catalog, IndexSchema, KeySpec, TableSchema};

/// A storage transaction with the store's catalog in scope.
pub(crate) struct TableTransaction<'c, T: Transaction> {
    storage: T,
    catalog: &'c Catalog,
}

impl<'c, T: Transaction> TableTransaction<'c, T> {
    pub fn new(storage: T, catalog: &'c Catalog) -> Self {
        Self { storage, catalog }
    }

    pub fn commit(self) -> TransactionResult<()> {
        self.storage.commit().map_err(storage_error)
    }

    pub fn rollback(self) -> TransactionResult<()> {
        self.storage.rollback().map_err(storage_error)
    }

    fn schema(&self, table: &str) -> TransactionResult<&'c TableSchema> {
        self.catalog.table(table)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, table: &str, key: &Key) -> TransactionResult<Option<Record>> {
        self.schema(table)?;
        self.storage
            .get(&tables::records(table), &encode_key(key))
            .map_err(storage_error)?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    pub fn count(&self, table: &str) -> TransactionResult<u64> {
        self.schema(table)?;
        let entries = self.scan_raw(&tables::records(table), &ResolvedRange::All, primary_bounds)?;
        Ok(entries.len() as u64)
    }

    /// Scan records in ascending primary-key order, invoking `on_each`
    /// per visited record.
    pub fn scan(
        &self,
        table: &str,
        range: &ResolvedRange,
        mut on_each: impl FnMut(&Record),
    ) -> TransactionResult<Vec<Record>> {
        self.schema(table)?;
        let entries = self.scan_raw(&tables::records(table), range, primary_bounds)?;
        let mut out = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            let record = decode_record(&value)?;
            on_each(&record);
            out.push(record);
        }
        Ok(out)
    }

    /// Scan records through a secondary index, in ascending index-key
    /// order. A multi-entry index yields a record once per indexed
    /// element.
    pub fn scan_index(
        &self,
        table: &str,
        index: &str,
        range: &ResolvedRange,
        mut on_each: impl FnMut(&Record),
    ) -> TransactionResult<Vec<Record>> {
        let table_schema = self.schema(table)?;
        let index = table_schema.indexes.get(index).ok_or_else(|| {
            TransactionError::IndexNotFound { table: table.to_owned(), index: index.to_owned() }
        })?;

        let entries =
            self.scan_raw(&tables::index(table, &index.name), range, index_bounds)?;
        let records_table = tables::records(table);

        let mut out = Vec::with_capacity(entries.len());
        for (_, encoded_pk) in entries {
            // The entry value is the encoded primary key of the record
            let bytes = self
                .storage
                .get(&records_table, &encoded_pk)
                .map_err(storage_error)?
                .ok_or_else(|| {
                    TransactionError::Internal(format!(
                        "index '{}' on table '{table}' points at a missing record",
                        index.name
                    ))
                })?;
            let record = decode_record(&bytes)?;
            on_each(&record);
            out.push(record);
        }
        Ok(out)
    }

    /// Every primary key currently in the table, ascending.
    pub fn current_keys(&self, table: &str) -> TransactionResult<Vec<Key>> {
        self.schema(table)?;
        let entries = self.scan_raw(&tables::records(table), &ResolvedRange::All, primary_bounds)?;
        entries
            .iter()
            .map(|(key, _)| {
                decode_key(key).map_err(|e| TransactionError::Serialization(e.to_string()))
            })
            .collect()
    }

    fn scan_raw(
        &self,
        storage_table: &str,
        range: &ResolvedRange,
        bounds: fn(&ResolvedRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>),
    ) -> TransactionResult<Vec<KeyValue>> {
        let (start, end) = bounds(range);
        self.storage
            .scan(storage_table, as_slice(&start), as_slice(&end))
            .map_err(storage_error)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a new record. The primary key must not already exist.
    pub fn add(&mut self, table: &str, record: Record) -> TransactionResult<Record> {
        let schema = self.schema(table)?;
        let (key, record) = self.resolve_key(schema, record)?;

        let existing = self
            .storage
            .get(&tables::records(table), &encode_key(&key))
            .map_err(storage_error)?;
        if existing.is_some() {
            return Err(TransactionError::ConstraintViolation(format!(
                "duplicate key {key} in table '{table}'"
            )));
        }
        self.write_record(schema, &key, record, None)
    }

    /// Write a record unconditionally, replacing any record under the
    /// same primary key.
    pub fn put(&mut self, table: &str, record: Record) -> TransactionResult<Record> {
        let schema = self.schema(table)?;
        let (key, record) = self.resolve_key(schema, record)?;
        let previous = self.get(table, &key)?;
        self.write_record(schema, &key, record, previous)
    }

    /// Shallow-merge a partial record over the stored one and write the
    /// result back. The record must already exist.
    pub fn merge(&mut self, table: &str, partial: Record) -> TransactionResult<Record> {
        let schema = self.schema(table)?;
        let path = schema.key.path().ok_or_else(|| {
            TransactionError::Internal(format!(
                "table '{table}' keeps keys out of line; merge needs a key path"
            ))
        })?;
        let key = partial
            .key_at(path)
            .map_err(|e| TransactionError::Internal(e.to_string()))?
            .ok_or_else(|| {
                TransactionError::Internal(format!(
                    "record for table '{table}' lost its key field '{path}'"
                ))
            })?;

        let previous = self.get(table, &key)?.ok_or_else(|| TransactionError::KeyNotFound {
            table: table.to_owned(),
            key: key.to_string(),
        })?;

        let mut merged = previous.clone();
        merged.merge_from(&partial);
        self.write_record(schema, &key, merged, Some(previous))
    }

    /// Delete by primary key. Deleting an absent key is a no-op success.
    pub fn delete(&mut self, table: &str, key: &Key) -> TransactionResult<bool> {
        let schema = self.schema(table)?;
        let Some(previous) = self.get(table, key)? else {
            return Ok(false);
        };
        self.remove_index_entries(schema, key, &previous)?;
        self.storage
            .delete(&tables::records(table), &encode_key(key))
            .map_err(storage_error)
    }

    /// Remove every record and index entry of a table. The key generator
    /// survives.
    pub fn clear(&mut self, table: &str) -> TransactionResult<u64> {
        let schema = self.schema(table)?;

        for index in schema.indexes.values() {
            let index_table = tables::index(table, &index.name);
            for (key, _) in self.scan_raw(&index_table, &ResolvedRange::All, primary_bounds)? {
                self.storage.delete(&index_table, &key).map_err(storage_error)?;
            }
        }

        let records_table = tables::records(table);
        let mut removed = 0u64;
        for (key, _) in self.scan_raw(&records_table, &ResolvedRange::All, primary_bounds)? {
            self.storage.delete(&records_table, &key).map_err(storage_error)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Resolve a record's primary key, generating and injecting one on
    /// auto-increment tables.
    fn resolve_key(
        &mut self,
        schema: &TableSchema,
        mut record: Record,
    ) -> TransactionResult<(Key, Record)> {
        match &schema.key {
            KeySpec::Path(path) => {
                let key = record
                    .key_at(path)
                    .map_err(|e| TransactionError::Internal(e.to_string()))?
                    .ok_or_else(|| {
                        TransactionError::Internal(format!(
                            "record for table '{}' lost its key field '{path}'",
                            schema.name
                        ))
                    })?;
                Ok((key, record))
            }
            KeySpec::Auto { path } => {
                if let Some(path) = path {
                    if let Some(key) = record
                        .key_at(path)
                        .map_err(|e| TransactionError::Internal(e.to_string()))?
                    {
                        // Keep the generator ahead of explicitly chosen keys
                        schema::observe_explicit_key(&mut self.storage, &schema.name, &key)?;
                        return Ok((key, record));
                    }
                }
                let n = schema::next_sequence(&mut self.storage, &schema.name)?;
                if let Some(path) = path {
                    record.set_path(path, json!(n)).map_err(|e| {
                        TransactionError::Serialization(format!(
                            "cannot inject generated key into record for table '{}': {e}",
                            schema.name
                        ))
                    })?;
                }
                #[allow(clippy::cast_precision_loss)]
                let key = Key::Number(n as f64);
                Ok((key, record))
            }
        }
    }

    /// Store a record and bring its index entries up to date.
    fn write_record(
        &mut self,
        schema: &TableSchema,
        key: &Key,
        record: Record,
        previous: Option<Record>,
    ) -> TransactionResult<Record> {
        if let Some(previous) = previous {
            self.remove_index_entries(schema, key, &previous)?;
        }
        self.add_index_entries(schema, key, &record)?;

        let bytes = encode_record(&record)?;
        self.storage
            .put(&tables::records(&schema.name), &encode_key(key), &bytes)
            .map_err(storage_error)?;
        Ok(record)
    }

    fn add_index_entries(
        &mut self,
        schema: &TableSchema,
        key: &Key,
        record: &Record,
    ) -> TransactionResult<()> {
        let encoded_pk = encode_key(key);
        for index in schema.indexes.values() {
            let index_table = tables::index(&schema.name, &index.name);
            for atoms in index_tuples(index, record) {
                if index.unique {
                    self.check_unique(&index_table, &schema.name, index, &atoms, &encoded_pk)?;
                }
                let entry = encode_index_entry(&atoms, key);
                self.storage
                    .put(&index_table, &entry, &encoded_pk)
                    .map_err(storage_error)?;
            }
        }
        Ok(())
    }

    fn remove_index_entries(
        &mut self,
        schema: &TableSchema,
        key: &Key,
        record: &Record,
    ) -> TransactionResult<()> {
        for index in schema.indexes.values() {
            let index_table = tables::index(&schema.name, &index.name);
            for atoms in index_tuples(index, record) {
                let entry = encode_index_entry(&atoms, key);
                self.storage.delete(&index_table, &entry).map_err(storage_error)?;
            }
        }
        Ok(())
    }

    /// Reject an indexed value already claimed by a different record.
    fn check_unique(
        &self,
        index_table: &str,
        table: &str,
        index: &IndexSchema,
        atoms: &[Key],
        encoded_pk: &[u8],
    ) -> TransactionResult<()> {
        let prefix = encode_index_prefix(atoms);
        let upper = prefix_upper_bound(&prefix);
        let entries = self
            .storage
            .scan(
                index_table,
                Bound::Included(prefix.as_slice()),
                Bound::Excluded(upper.as_slice()),
            )
            .map_err(storage_error)?;
        for (_, existing_pk) in entries {
            if existing_pk != encoded_pk {
                return Err(TransactionError::ConstraintViolation(format!(
                    "unique index '{}' on table '{table}' already holds this value",
                    index.name
                )));
            }
        }
        Ok(())
    }
}

/// The index-key tuples a record contributes to one index.
///
/// Records missing an indexed field, or holding a non-key value in it,
/// contribute nothing. A multi-entry index maps an array field to one
/// tuple per valid element.
fn index_tuples(index: &IndexSchema, record: &Record) -> Vec<Vec<Key>> {
    if index.multi_entry {
        let Some(value) = record.get_path(&index.paths[0]) else {
            return Vec::new();
        };
        return match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| Key::from_json(item).ok())
                .map(|key| vec![key])
                .collect(),
            scalar => Key::from_json(scalar).map(|key| vec![vec![key]]).unwrap_or_default(),
        };
    }

    let mut atoms = Vec::with_capacity(index.paths.len());
    for path in &index.paths {
        match record.get_path(path) {
            Some(value) if !value.is_null() => match Key::from_json(value) {
                Ok(key) => atoms.push(key),
                Err(_) => return Vec::new(),
            },
            _ => return Vec::new(),
        }
    }
    vec![atoms]
}

/// Byte bounds of a resolved range over a record table.
fn primary_bounds(range: &ResolvedRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    match range {
        ResolvedRange::All => (Bound::Unbounded, Bound::Unbounded),
        ResolvedRange::Only(key) => {
            let encoded = encode_key(key);
            (Bound::Included(encoded.clone()), Bound::Included(encoded))
        }
        ResolvedRange::Between { lower, upper } => (
            lower
                .as_ref()
                .map_or(Bound::Unbounded, |key| Bound::Included(encode_key(key))),
            upper
                .as_ref()
                .map_or(Bound::Unbounded, |key| Bound::Included(encode_key(key))),
        ),
    }
}

/// Byte bounds of a resolved range over an index table.
///
/// Index entry keys carry a primary-key suffix, so an inclusive upper
/// bound widens to the end of that indexed value's prefix.
fn index_bounds(range: &ResolvedRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    match range {
        ResolvedRange::All => (Bound::Unbounded, Bound::Unbounded),
        ResolvedRange::Only(key) => {
            let prefix = encode_index_prefix(std::slice::from_ref(key));
            let upper = prefix_upper_bound(&prefix);
            (Bound::Included(prefix), Bound::Excluded(upper))
        }
        ResolvedRange::Between { lower, upper } => (
            lower.as_ref().map_or(Bound::Unbounded, |key| {
                Bound::Included(encode_index_prefix(std::slice::from_ref(key)))
            }),
            upper.as_ref().map_or(Bound::Unbounded, |key| {
                let prefix = encode_index_prefix(std::slice::from_ref(key));
                Bound::Excluded(prefix_upper_bound(&prefix))
            }),
        ),
    }
}

fn as_slice(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn encode_record(record: &Record) -> TransactionResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| TransactionError::Serialization(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> TransactionResult<Record> {
    serde_json::from_slice(bytes).map_err(|e| TransactionError::Serialization(e.to_string()))
}

/// Lower a storage fault into the transaction error taxonomy.
pub(crate) fn storage_error(e: StorageError) -> TransactionError {
    match e {
        StorageError::ReadOnly => TransactionError::ReadOnly,
        other => TransactionError::Storage(other.to_string()),
    }
}
