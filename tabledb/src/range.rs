//! Declarative key ranges for queries.

use serde::{Deserialize, Serialize};

use tabledb_core::Key;

/// A declarative range of keys, used only for reads.
///
/// The wire shape is `{ lower?, upper?, only? }`. When fields are
/// combined, [`resolve`](Self::resolve) applies a fixed precedence rather
/// than guessing: both bounds beat `only`, and `only` beats a single
/// bound.
///
/// All bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<Key>,
    /// Inclusive upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<Key>,
    /// Exact-match key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<Key>,
}

impl KeyRange {
    /// The range covering every key.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Exactly one key.
    #[must_use]
    pub fn only(key: impl Into<Key>) -> Self {
        Self { only: Some(key.into()), ..Self::default() }
    }

    /// Keys `k` with `lower <= k <= upper`.
    #[must_use]
    pub fn bounded(lower: impl Into<Key>, upper: impl Into<Key>) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: Some(upper.into()),
            ..Self::default()
        }
    }

    /// Keys `k` with `lower <= k`.
    #[must_use]
    pub fn at_least(lower: impl Into<Key>) -> Self {
        Self { lower: Some(lower.into()), ..Self::default() }
    }

    /// Keys `k` with `k <= upper`.
    #[must_use]
    pub fn at_most(upper: impl Into<Key>) -> Self {
        Self { upper: Some(upper.into()), ..Self::default() }
    }

    /// Resolve the descriptor into its canonical form.
    ///
    /// Precedence, applied in order:
    ///
    /// 1. both bounds present → bounded range
    /// 2. `only` present → exact match
    /// 3. `lower` present → open-ended above
    /// 4. `upper` present → open-ended below
    /// 5. nothing present → all records
    #[must_use]
    pub fn resolve(&self) -> ResolvedRange {
        if self.lower.is_some() && self.upper.is_some() {
            return ResolvedRange::Between {
                lower: self.lower.clone(),
                upper: self.upper.clone(),
            };
        }
        if let Some(only) = &self.only {
            return ResolvedRange::Only(only.clone());
        }
        if self.lower.is_some() || self.upper.is_some() {
            return ResolvedRange::Between {
                lower: self.lower.clone(),
                upper: self.upper.clone(),
            };
        }
        ResolvedRange::All
    }
}

/// The canonical form of a [`KeyRange`], fed to the storage scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedRange {
    /// No restriction: every key.
    All,
    /// Exactly one key.
    Only(Key),
    /// An inclusive range, open-ended where a bound is `None`.
    Between {
        /// Inclusive lower bound, if any.
        lower: Option<Key>,
        /// Inclusive upper bound, if any.
        upper: Option<Key>,
    },
}
