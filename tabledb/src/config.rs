//! Open-time configuration.
//!
//! The configuration accepts the flexible wire shapes of the source data
//! model (a key can be a bare field name or an options object; indexes
//! can be a single name, a map, or a list) and normalizes them exactly
//! once, when the session opens. Past that boundary only the normalized
//! [`Catalog`] exists.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::schema::{Catalog, IndexSchema, KeySpec, TableSchema};

/// Configuration for opening a store.
///
/// Deserializable from JSON, or built in code:
///
/// ```ignore
/// let config = Config::new("app", 1).table(
///     TableSpec::new("users")
///         .key_path("id")
///         .index("by_email", IndexSpec::path("email").unique()),
/// );
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The store name. File-backed stores derive their filename from it.
    pub name: String,
    /// The schema version. Bumping it triggers the schema initializer on
    /// the next open.
    pub version: u32,
    /// Declared tables.
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

impl Config {
    /// Create a configuration with no tables yet.
    #[must_use]
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self { name: name.into(), version, tables: Vec::new() }
    }

    /// Add a table declaration.
    #[must_use]
    pub fn table(mut self, table: TableSpec) -> Self {
        self.tables.push(table);
        self
    }

    /// Validate the configuration and normalize it into a [`Catalog`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty store name, a zero version,
    /// no tables, a nameless table, names containing NUL, or malformed
    /// key/index declarations.
    pub fn into_catalog(self) -> Result<Catalog> {
        if self.name.is_empty() {
            return Err(Error::Config("store name must not be empty".to_owned()));
        }
        if self.version == 0 {
            return Err(Error::Config("version must be at least 1".to_owned()));
        }
        if self.tables.is_empty() {
            return Err(Error::Config(
                "you must declare at least one table".to_owned(),
            ));
        }

        let mut tables = BTreeMap::new();
        for spec in self.tables {
            let table = spec.normalize()?;
            if tables.insert(table.name.clone(), table).is_some() {
                return Err(Error::Config("duplicate table declaration".to_owned()));
            }
        }
        Ok(Catalog { name: self.name, version: self.version, tables })
    }
}

/// A table declaration, before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    /// The table name.
    pub name: String,
    /// The primary-key declaration.
    pub key: KeySpecInput,
    /// Index declarations, in any of the accepted shapes.
    #[serde(default)]
    pub indexes: Option<IndexesInput>,
}

impl TableSpec {
    /// Start declaring a table. Set a key with
    /// [`key_path`](Self::key_path) or [`auto_increment`](Self::auto_increment).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: KeySpecInput::Options { key_path: None, auto_increment: false },
            indexes: None,
        }
    }

    /// Key records by the value at this field path.
    #[must_use]
    pub fn key_path(mut self, path: impl Into<String>) -> Self {
        let auto = matches!(
            self.key,
            KeySpecInput::Options { auto_increment: true, .. }
        );
        self.key = KeySpecInput::Options {
            key_path: Some(path.into()),
            auto_increment: auto,
        };
        self
    }

    /// Generate keys from a per-table counter. Combine with
    /// [`key_path`](Self::key_path) to inject generated keys into records.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        let path = match self.key {
            KeySpecInput::Path(path) => Some(path),
            KeySpecInput::Options { key_path, .. } => key_path,
        };
        self.key = KeySpecInput::Options { key_path: path, auto_increment: true };
        self
    }

    /// Add a named index.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>, spec: IndexSpec) -> Self {
        let path = spec.paths.map(|mut paths| {
            if paths.len() == 1 {
                IndexPathInput::One(paths.remove(0))
            } else {
                IndexPathInput::Many(paths)
            }
        });
        let entry = IndexInput::Options {
            path,
            unique: spec.unique,
            multi_entry: spec.multi_entry,
        };
        let mut map = BTreeMap::new();
        map.insert(name.into(), entry);
        let addition = IndexesInput::Map(map);

        self.indexes = Some(match self.indexes.take() {
            None => addition,
            Some(IndexesInput::Many(mut items)) => {
                items.push(addition);
                IndexesInput::Many(items)
            }
            Some(existing) => IndexesInput::Many(vec![existing, addition]),
        });
        self
    }

    /// Normalize into a [`TableSchema`].
    fn normalize(self) -> Result<TableSchema> {
        if self.name.is_empty() {
            return Err(Error::Config("a table must have a name".to_owned()));
        }
        if self.name.contains('\0') {
            return Err(Error::Config(format!(
                "table name {:?} must not contain NUL",
                self.name
            )));
        }

        let key = self.key.normalize(&self.name)?;

        let mut indexes = BTreeMap::new();
        if let Some(input) = self.indexes {
            for (name, schema) in input.normalize()? {
                if name.is_empty() || name.contains('\0') {
                    return Err(Error::Config(format!(
                        "table '{}': invalid index name {name:?}",
                        self.name
                    )));
                }
                if indexes.insert(name.clone(), schema).is_some() {
                    return Err(Error::Config(format!(
                        "table '{}': duplicate index '{name}'",
                        self.name
                    )));
                }
            }
        }

        Ok(TableSchema { name: self.name, key, indexes })
    }
}

/// The accepted wire shapes of a primary-key declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeySpecInput {
    /// A bare field path.
    Path(String),
    /// An options object.
    Options {
        /// Field path holding the key.
        #[serde(default, rename = "keyPath")]
        key_path: Option<String>,
        /// Generate keys from a counter.
        #[serde(default, rename = "autoIncrement")]
        auto_increment: bool,
    },
}

impl KeySpecInput {
    fn normalize(self, table: &str) -> Result<KeySpec> {
        match self {
            Self::Path(path) if !path.is_empty() => Ok(KeySpec::Path(path)),
            Self::Options { key_path: Some(path), auto_increment: false }
                if !path.is_empty() =>
            {
                Ok(KeySpec::Path(path))
            }
            Self::Options { key_path, auto_increment: true } => {
                Ok(KeySpec::Auto { path: key_path.filter(|p| !p.is_empty()) })
            }
            _ => Err(Error::Config(format!(
                "table '{table}' must name a key field or enable autoIncrement"
            ))),
        }
    }
}

/// The accepted wire shapes of a table's whole `indexes` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IndexesInput {
    /// One index, named by (and indexing) this field.
    One(String),
    /// A map of index name to declaration.
    Map(BTreeMap<String, IndexInput>),
    /// A list of the above shapes.
    Many(Vec<IndexesInput>),
}

impl IndexesInput {
    fn normalize(self) -> Result<Vec<(String, IndexSchema)>> {
        match self {
            Self::One(name) => {
                let schema = IndexInput::Path(name.clone()).normalize(&name)?;
                Ok(vec![(name, schema)])
            }
            Self::Map(map) => map
                .into_iter()
                .map(|(name, input)| {
                    let schema = input.normalize(&name)?;
                    Ok((name, schema))
                })
                .collect(),
            Self::Many(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(item.normalize()?);
                }
                Ok(out)
            }
        }
    }
}

/// The accepted wire shapes of one index declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IndexInput {
    /// A bare field path.
    Path(String),
    /// A composite list of field paths.
    Paths(Vec<String>),
    /// An options object. The path defaults to the index's own name.
    Options {
        /// Indexed field path(s).
        #[serde(default, alias = "key")]
        path: Option<IndexPathInput>,
        /// Reject two records with the same indexed value.
        #[serde(default)]
        unique: bool,
        /// Index each element of an array value separately.
        #[serde(default, rename = "multiEntry")]
        multi_entry: bool,
    },
}

/// One path or several, inside an index options object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IndexPathInput {
    /// A single field path.
    One(String),
    /// A composite list of field paths.
    Many(Vec<String>),
}

impl IndexInput {
    fn normalize(self, name: &str) -> Result<IndexSchema> {
        let (paths, unique, multi_entry) = match self {
            Self::Path(path) => (vec![path], false, false),
            Self::Paths(paths) => (paths, false, false),
            Self::Options { path, unique, multi_entry } => {
                let paths = match path {
                    // Path defaults to the index's own name
                    None => vec![name.to_owned()],
                    Some(IndexPathInput::One(path)) => vec![path],
                    Some(IndexPathInput::Many(paths)) => paths,
                };
                (paths, unique, multi_entry)
            }
        };

        if paths.is_empty() || paths.iter().any(String::is_empty) {
            return Err(Error::Config(format!(
                "index '{name}' must index at least one named field"
            )));
        }
        if multi_entry && paths.len() > 1 {
            return Err(Error::Config(format!(
                "index '{name}' cannot be both composite and multiEntry"
            )));
        }

        Ok(IndexSchema { name: name.to_owned(), paths, unique, multi_entry })
    }
}

/// Builder for one index declaration.
#[derive(Debug, Clone, Default)]
pub struct IndexSpec {
    paths: Option<Vec<String>>,
    unique: bool,
    multi_entry: bool,
}

impl IndexSpec {
    /// Index the value at this field path.
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self { paths: Some(vec![path.into()]), ..Self::default() }
    }

    /// Index the combination of values at these field paths.
    #[must_use]
    pub fn composite(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            paths: Some(paths.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Index the field named like the index itself.
    #[must_use]
    pub fn on_own_name() -> Self {
        Self::default()
    }

    /// Reject two records with the same indexed value.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Index each element of an array value separately.
    #[must_use]
    pub const fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_config(json: serde_json::Value) -> Result<Catalog> {
        let config: Config = serde_json::from_value(json).expect("parse config");
        config.into_catalog()
    }

    #[test]
    fn bare_string_key_becomes_a_path() {
        let catalog = users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [{"name": "users", "key": "id"}]
        }))
        .expect("catalog");
        assert_eq!(catalog.tables["users"].key, KeySpec::Path("id".to_owned()));
    }

    #[test]
    fn key_object_shapes_normalize() {
        let catalog = users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [
                {"name": "a", "key": {"keyPath": "pk"}},
                {"name": "b", "key": {"autoIncrement": true}},
                {"name": "c", "key": {"keyPath": "pk", "autoIncrement": true}},
            ]
        }))
        .expect("catalog");
        assert_eq!(catalog.tables["a"].key, KeySpec::Path("pk".to_owned()));
        assert_eq!(catalog.tables["b"].key, KeySpec::Auto { path: None });
        assert_eq!(
            catalog.tables["c"].key,
            KeySpec::Auto { path: Some("pk".to_owned()) }
        );
    }

    #[test]
    fn a_table_needs_a_name_and_a_key() {
        assert!(users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [{"name": "", "key": "id"}]
        }))
        .is_err());

        assert!(users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [{"name": "users", "key": {}}]
        }))
        .is_err());
    }

    #[test]
    fn at_least_one_table_is_required() {
        let err = users_config(serde_json::json!({
            "name": "app", "version": 1, "tables": []
        }))
        .expect_err("no tables must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn index_shapes_normalize() {
        let catalog = users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [{
                "name": "users", "key": "id",
                "indexes": {
                    "email": {},
                    "by_name": "name",
                    "by_tag": {"path": "tags", "multiEntry": true},
                    "by_login": {"key": "login", "unique": true},
                    "by_city_age": ["address.city", "age"],
                }
            }]
        }))
        .expect("catalog");

        let indexes = &catalog.tables["users"].indexes;
        // Path defaults to the index's own name
        assert_eq!(indexes["email"].paths, vec!["email"]);
        assert_eq!(indexes["by_name"].paths, vec!["name"]);
        assert!(indexes["by_tag"].multi_entry);
        assert!(indexes["by_login"].unique);
        assert_eq!(indexes["by_login"].paths, vec!["login"]);
        assert_eq!(indexes["by_city_age"].paths, vec!["address.city", "age"]);
    }

    #[test]
    fn single_string_indexes_shape() {
        let catalog = users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [{"name": "users", "key": "id", "indexes": "email"}]
        }))
        .expect("catalog");
        assert_eq!(
            catalog.tables["users"].indexes["email"].paths,
            vec!["email"]
        );
    }

    #[test]
    fn composite_multi_entry_is_rejected() {
        let err = users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [{
                "name": "users", "key": "id",
                "indexes": {"bad": {"path": ["a", "b"], "multiEntry": true}}
            }]
        }))
        .expect_err("must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builder_produces_the_same_catalog() {
        let built = Config::new("app", 1)
            .table(
                TableSpec::new("users")
                    .key_path("id")
                    .index("by_email", IndexSpec::path("email").unique()),
            )
            .into_catalog()
            .expect("catalog");

        let parsed = users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [{
                "name": "users", "key": "id",
                "indexes": {"by_email": {"path": "email", "unique": true}}
            }]
        }))
        .expect("catalog");

        assert_eq!(built, parsed);
    }

    #[test]
    fn nul_in_table_name_is_rejected() {
        assert!(users_config(serde_json::json!({
            "name": "app", "version": 1,
            "tables": [{"name": "bad\u{0}name", "key": "id"}]
        }))
        .is_err());
    }
}
