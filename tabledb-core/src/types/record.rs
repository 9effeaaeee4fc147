//! Records: the values stored in tables.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::Key;

/// A record is a JSON object: a mapping from field names to values.
///
/// Field paths passed to [`get_path`](Self::get_path), [`set_path`](Self::set_path)
/// and [`key_at`](Self::key_at) may be dotted (`"address.city"`) to reach
/// into nested objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRecord`] if the value is not an object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CoreError::InvalidRecord(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    /// Consume the record, returning it as a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Get a top-level field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a top-level field.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Look up a dotted field path.
    ///
    /// Returns `None` if any segment is absent or a non-object intervenes.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Set a dotted field path, creating intermediate objects as needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRecord`] if a non-object value sits on
    /// the path.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<(), CoreError> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().unwrap_or(path);

        let mut current = &mut self.0;
        for segment in segments {
            let slot = current
                .entry(segment.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            current = slot.as_object_mut().ok_or_else(|| {
                CoreError::InvalidRecord(format!(
                    "field '{segment}' in path '{path}' is not an object"
                ))
            })?;
        }
        current.insert(last.to_owned(), value);
        Ok(())
    }

    /// Extract the key stored at a field path.
    ///
    /// Returns `Ok(None)` if the field is absent or `null`: the record has
    /// no key at that path. An explicit non-key value (a boolean, an
    /// object, ...) is an error rather than a missing key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] if the field holds a non-key value.
    pub fn key_at(&self, path: &str) -> Result<Option<Key>, CoreError> {
        match self.get_path(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Key::from_json(value).map(Some),
        }
    }

    /// Shallow-merge another record's top-level fields over this one.
    ///
    /// Fields named by `partial` win; fields it does not mention survive
    /// unchanged.
    pub fn merge_from(&mut self, partial: &Self) {
        for (field, value) in &partial.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the top-level fields.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The underlying field map.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
