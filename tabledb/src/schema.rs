//! The persistent schema catalog and the schema initializer.
//!
//! The catalog (every table's name, primary-key spec and index specs)
//! is written to a reserved meta table when a store is first created, and
//! upgraded in place when a store is reopened at a higher version. The
//! per-table key generators for auto-increment tables live in the same
//! meta table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tabledb_core::{Key, Record, TransactionError, TransactionResult};
use tabledb_storage::Transaction;

use crate::error::{Error, Result};
use crate::txn::storage_error;

/// Well-known storage table names.
pub(crate) mod tables {
    /// The meta table holding the catalog and key generators.
    pub const META: &str = "__meta";

    /// The storage table holding a table's records.
    pub fn records(table: &str) -> String {
        format!("r:{table}")
    }

    /// The storage table holding one secondary index of a table.
    pub fn index(table: &str, index: &str) -> String {
        format!("x:{table}:{index}")
    }
}

/// Keys within the meta table.
pub(crate) mod meta {
    /// The serialized [`Catalog`](super::Catalog).
    pub const CATALOG: &[u8] = b"catalog";

    /// The next auto-increment key of a table, as a big-endian `u64`.
    pub fn sequence(table: &str) -> Vec<u8> {
        format!("seq:{table}").into_bytes()
    }
}

/// How a table derives the primary key of its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySpec {
    /// The key is read from the record at this field path.
    Path(String),
    /// The key is generated from the table's counter. With a `path`, the
    /// generated key is injected into the record; without one the key
    /// stays out of line and records do not carry it.
    Auto {
        /// Field path to inject generated keys at, if any.
        path: Option<String>,
    },
}

impl KeySpec {
    /// The field path records carry their key at, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Path(path) | Self::Auto { path: Some(path) } => Some(path),
            Self::Auto { path: None } => None,
        }
    }

    /// Whether keys are generated by the table's counter.
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::Auto { .. })
    }
}

/// A secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    /// The index name.
    pub name: String,
    /// The indexed field path(s). More than one makes a composite index.
    pub paths: Vec<String>,
    /// Whether two records may share an indexed value.
    pub unique: bool,
    /// Whether an array value yields one entry per element. Only valid
    /// for single-path indexes.
    pub multi_entry: bool,
}

/// A table declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// The table name.
    pub name: String,
    /// How records are keyed.
    pub key: KeySpec,
    /// Secondary indexes by name.
    pub indexes: BTreeMap<String, IndexSchema>,
}

impl TableSchema {
    /// Extract a record's primary key, if it carries one in-line.
    ///
    /// Returns `Ok(None)` both when the key field is absent and when the
    /// table keeps keys out of line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key field holds a non-key value.
    pub fn key_of(&self, record: &Record) -> Result<Option<Key>> {
        match self.key.path() {
            Some(path) => record.key_at(path).map_err(|e| {
                Error::Config(format!("table '{}': {e}", self.name))
            }),
            None => Ok(None),
        }
    }
}

/// The full schema of a store: its name, version, and tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// The store name.
    pub name: String,
    /// The schema version this catalog was written at.
    pub version: u32,
    /// Declared tables by name.
    pub tables: BTreeMap<String, TableSchema>,
}

impl Catalog {
    /// Look up a declared table.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::TableNotFound`] for undeclared tables.
    pub fn table(&self, name: &str) -> TransactionResult<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| TransactionError::TableNotFound(name.to_owned()))
    }

    /// The declared table names, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

/// Initialize or upgrade the stored catalog inside an open write
/// transaction.
///
/// - First open: the requested catalog is stored as-is.
/// - Reopen at the stored version: the stored catalog is used unchanged.
/// - Reopen at a higher version: missing tables and missing indexes are
///   created; existing indexes are left untouched; changing an existing
///   table's key spec is rejected.
/// - Reopen at a lower version: rejected.
///
/// Returns the catalog the session will run with.
pub(crate) fn initialize<T: Transaction>(txn: &mut T, requested: Catalog) -> Result<Catalog> {
    let stored = match txn.get(tables::META, meta::CATALOG)? {
        Some(bytes) => Some(decode_catalog(&bytes)?),
        None => None,
    };

    let catalog = match stored {
        None => {
            debug!(store = %requested.name, version = requested.version, "creating schema");
            requested
        }
        Some(stored) if stored.version > requested.version => {
            return Err(Error::Config(format!(
                "store '{}' is at version {} which is newer than the requested version {}",
                stored.name, stored.version, requested.version
            )));
        }
        Some(stored) if stored.version == requested.version => return Ok(stored),
        Some(stored) => upgrade(stored, requested)?,
    };

    let bytes = encode_catalog(&catalog)?;
    txn.put(tables::META, meta::CATALOG, &bytes)?;
    Ok(catalog)
}

/// Merge a requested catalog into the stored one for a version bump.
fn upgrade(mut stored: Catalog, requested: Catalog) -> Result<Catalog> {
    debug!(
        store = %stored.name,
        from = stored.version,
        to = requested.version,
        "upgrading schema"
    );
    for (name, table) in requested.tables {
        match stored.tables.get_mut(&name) {
            None => {
                stored.tables.insert(name, table);
            }
            Some(existing) => {
                if existing.key != table.key {
                    return Err(Error::Config(format!(
                        "cannot change the key of existing table '{name}'"
                    )));
                }
                // Existing indexes stay untouched; only new ones are added
                for (index_name, index) in table.indexes {
                    existing.indexes.entry(index_name).or_insert(index);
                }
            }
        }
    }
    stored.version = requested.version;
    Ok(stored)
}

/// Read a table's next auto-increment key and advance the counter.
pub(crate) fn next_sequence<T: Transaction>(txn: &mut T, table: &str) -> TransactionResult<u64> {
    let key = meta::sequence(table);
    let next = match txn.get(tables::META, &key).map_err(storage_error)? {
        Some(bytes) => decode_sequence(&bytes)?,
        None => 1,
    };
    txn.put(tables::META, &key, &(next + 1).to_be_bytes())
        .map_err(storage_error)?;
    Ok(next)
}

/// Raise a table's counter so future generated keys stay above an
/// explicitly provided numeric key.
pub(crate) fn observe_explicit_key<T: Transaction>(
    txn: &mut T,
    table: &str,
    key: &Key,
) -> TransactionResult<()> {
    let Some(n) = key.as_number() else { return Ok(()) };
    if !n.is_finite() || n < 1.0 {
        return Ok(());
    }
    let meta_key = meta::sequence(table);
    let next = match txn.get(tables::META, &meta_key).map_err(storage_error)? {
        Some(bytes) => decode_sequence(&bytes)?,
        None => 1,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let provided = n.floor() as u64;
    if provided >= next {
        txn.put(tables::META, &meta_key, &(provided + 1).to_be_bytes())
            .map_err(storage_error)?;
    }
    Ok(())
}

fn decode_sequence(bytes: &[u8]) -> TransactionResult<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        TransactionError::Serialization("malformed key generator state".to_owned())
    })?;
    Ok(u64::from_be_bytes(raw))
}

fn encode_catalog(catalog: &Catalog) -> Result<Vec<u8>> {
    serde_json::to_vec(catalog)
        .map_err(|e| TransactionError::Serialization(e.to_string()).into())
}

fn decode_catalog(bytes: &[u8]) -> Result<Catalog> {
    serde_json::from_slice(bytes)
        .map_err(|e| TransactionError::Serialization(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabledb_storage::backends::RedbEngine;
    use tabledb_storage::StorageEngine;

    fn table(name: &str, key: KeySpec) -> TableSchema {
        TableSchema { name: name.to_owned(), key, indexes: BTreeMap::new() }
    }

    fn catalog(version: u32, tables: Vec<TableSchema>) -> Catalog {
        Catalog {
            name: "test".to_owned(),
            version,
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    #[test]
    fn first_open_stores_the_requested_catalog() {
        let engine = RedbEngine::in_memory().expect("engine");
        let requested = catalog(1, vec![table("users", KeySpec::Path("id".into()))]);

        let mut txn = engine.begin_write().expect("begin");
        let stored = initialize(&mut txn, requested.clone()).expect("initialize");
        txn.commit().expect("commit");
        assert_eq!(stored, requested);

        // Idempotent reopen at the same version
        let mut txn = engine.begin_write().expect("begin");
        let again = initialize(&mut txn, requested.clone()).expect("reopen");
        txn.commit().expect("commit");
        assert_eq!(again, requested);
    }

    #[test]
    fn version_downgrade_is_rejected() {
        let engine = RedbEngine::in_memory().expect("engine");
        let v2 = catalog(2, vec![table("users", KeySpec::Path("id".into()))]);

        let mut txn = engine.begin_write().expect("begin");
        initialize(&mut txn, v2).expect("initialize");
        txn.commit().expect("commit");

        let v1 = catalog(1, vec![table("users", KeySpec::Path("id".into()))]);
        let mut txn = engine.begin_write().expect("begin");
        let err = initialize(&mut txn, v1).expect_err("downgrade must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn upgrade_adds_tables_and_keeps_existing_indexes() {
        let engine = RedbEngine::in_memory().expect("engine");

        let mut users = table("users", KeySpec::Path("id".into()));
        users.indexes.insert(
            "by_email".to_owned(),
            IndexSchema {
                name: "by_email".to_owned(),
                paths: vec!["email".to_owned()],
                unique: true,
                multi_entry: false,
            },
        );
        let v1 = catalog(1, vec![users.clone()]);

        let mut txn = engine.begin_write().expect("begin");
        initialize(&mut txn, v1).expect("initialize");
        txn.commit().expect("commit");

        // v2 re-declares by_email differently (ignored) and adds a table
        let mut users_v2 = table("users", KeySpec::Path("id".into()));
        users_v2.indexes.insert(
            "by_email".to_owned(),
            IndexSchema {
                name: "by_email".to_owned(),
                paths: vec!["email".to_owned()],
                unique: false,
                multi_entry: false,
            },
        );
        let v2 = catalog(
            2,
            vec![users_v2, table("orders", KeySpec::Auto { path: Some("id".into()) })],
        );

        let mut txn = engine.begin_write().expect("begin");
        let upgraded = initialize(&mut txn, v2).expect("upgrade");
        txn.commit().expect("commit");

        assert_eq!(upgraded.version, 2);
        assert!(upgraded.tables.contains_key("orders"));
        // The stored unique flag survived the redeclaration
        assert!(upgraded.tables["users"].indexes["by_email"].unique);
    }

    #[test]
    fn changing_a_key_spec_is_rejected() {
        let engine = RedbEngine::in_memory().expect("engine");
        let v1 = catalog(1, vec![table("users", KeySpec::Path("id".into()))]);

        let mut txn = engine.begin_write().expect("begin");
        initialize(&mut txn, v1).expect("initialize");
        txn.commit().expect("commit");

        let v2 = catalog(2, vec![table("users", KeySpec::Path("email".into()))]);
        let mut txn = engine.begin_write().expect("begin");
        let err = initialize(&mut txn, v2).expect_err("key change must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn sequences_count_up_from_one() {
        let engine = RedbEngine::in_memory().expect("engine");
        let mut txn = engine.begin_write().expect("begin");
        assert_eq!(next_sequence(&mut txn, "users").unwrap(), 1);
        assert_eq!(next_sequence(&mut txn, "users").unwrap(), 2);
        assert_eq!(next_sequence(&mut txn, "orders").unwrap(), 1);
        txn.commit().expect("commit");

        let mut txn = engine.begin_write().expect("begin");
        assert_eq!(next_sequence(&mut txn, "users").unwrap(), 3);
    }

    #[test]
    fn explicit_keys_advance_the_sequence() {
        let engine = RedbEngine::in_memory().expect("engine");
        let mut txn = engine.begin_write().expect("begin");
        observe_explicit_key(&mut txn, "users", &Key::from(10)).unwrap();
        assert_eq!(next_sequence(&mut txn, "users").unwrap(), 11);
        // Text keys leave the counter alone
        observe_explicit_key(&mut txn, "users", &Key::from("zz")).unwrap();
        assert_eq!(next_sequence(&mut txn, "users").unwrap(), 12);
    }
}
