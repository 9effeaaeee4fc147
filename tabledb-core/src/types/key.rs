//! Primary and index key values.

use std::cmp::Ordering;
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// A value that identifies a record within a table, or positions a record
/// within a secondary index.
///
/// Keys are totally ordered. Different key types never compare equal; the
/// type order is `Number < Text < Bytes`, and within a type keys compare
/// numerically or lexicographically. This is the same order the
/// [`encoding`](crate::encoding) module preserves at the byte level, so a
/// range scan over encoded keys visits records in `Key` order.
///
/// Numbers are `f64` because the source data model is JSON: integer JSON
/// keys convert exactly up to 2^53. `NaN` is not a valid key and is
/// rejected by every fallible constructor.
#[derive(Debug, Clone)]
pub enum Key {
    /// Numeric key.
    Number(f64),
    /// UTF-8 string key.
    Text(String),
    /// Raw binary key. Not expressible in a JSON record field; only
    /// constructible through the API.
    Bytes(Vec<u8>),
}

impl Key {
    /// Build a key from a JSON value.
    ///
    /// Accepts numbers and strings. Everything else, including `null`,
    /// booleans, arrays and objects, is not a key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for non-key JSON values.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoreError> {
        match value {
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Self::Number)
                .ok_or_else(|| CoreError::InvalidKey(format!("unrepresentable number {n}"))),
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            other => Err(CoreError::InvalidKey(format!(
                "expected a number or string, got {other}"
            ))),
        }
    }

    /// Convert the key back to a JSON value.
    ///
    /// Binary keys become arrays of byte values.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|byte| (*byte).into()).collect())
            }
        }
    }

    /// Returns the key as a number if it is one.
    #[inline]
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the key as a string slice if it is one.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the key as a byte slice if it is one.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Rank used for cross-type ordering: Number < Text < Bytes.
    const fn type_rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Text(_) => 1,
            Self::Bytes(_) => 2,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // total_cmp keeps Eq and the byte encoding consistent for -0.0
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "0x{}", hex(b)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl From<i64> for Key {
    #[inline]
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for Key {
    #[inline]
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Key {
    #[inline]
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Key {
    #[inline]
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Key {
    #[inline]
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Key {
    #[inline]
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl TryFrom<f64> for Key {
    type Error = CoreError;

    fn try_from(n: f64) -> Result<Self, CoreError> {
        if n.is_nan() {
            return Err(CoreError::InvalidKey("NaN is not a valid key".to_owned()));
        }
        Ok(Self::Number(n))
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Bytes(b) => serializer.collect_seq(b.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = Key;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number, a string, or a byte sequence")
            }

            fn visit_i64<E: de::Error>(self, n: i64) -> Result<Key, E> {
                Ok(Key::from(n))
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_u64<E: de::Error>(self, n: u64) -> Result<Key, E> {
                Ok(Key::Number(n as f64))
            }

            fn visit_f64<E: de::Error>(self, n: f64) -> Result<Key, E> {
                Key::try_from(n).map_err(de::Error::custom)
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<Key, E> {
                Ok(Key::from(s))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Key, A::Error> {
                let mut bytes = Vec::new();
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                Ok(Key::Bytes(bytes))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}
