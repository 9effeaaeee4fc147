//! Reconciliation planning for [`set`](crate::Session::set).

use std::collections::BTreeSet;

use tabledb_core::{Key, Record};

/// The derived work list of one `set` call: which primary keys to delete,
/// and which records to upsert.
///
/// Computed once per call, never stored. Membership is an explicit set
/// test over the desired list's primary keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationPlan {
    /// Keys present in the table but absent from the desired list,
    /// ascending.
    pub to_delete: Vec<Key>,
    /// The desired records, in caller order; all of them are upserted.
    pub to_upsert: Vec<Record>,
}

impl ReconciliationPlan {
    /// Derive the plan from the table's current keys and the desired
    /// records, paired with their primary keys where they carry one
    /// (records awaiting a generated key count as new).
    #[must_use]
    pub fn compute(current_keys: Vec<Key>, desired: Vec<(Option<Key>, Record)>) -> Self {
        let desired_keys: BTreeSet<&Key> =
            desired.iter().filter_map(|(key, _)| key.as_ref()).collect();
        let to_delete = current_keys
            .into_iter()
            .filter(|key| !desired_keys.contains(key))
            .collect();
        let to_upsert = desired.into_iter().map(|(_, record)| record).collect();
        Self { to_delete, to_upsert }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn desired(keys: &[i64]) -> Vec<(Option<Key>, Record)> {
        keys.iter()
            .map(|k| {
                let record = Record::from_value(json!({ "id": k })).expect("object");
                (Some(Key::from(*k)), record)
            })
            .collect()
    }

    #[test]
    fn keys_missing_from_the_desired_list_are_deleted() {
        let plan = ReconciliationPlan::compute(
            vec![Key::from(1), Key::from(2), Key::from(3)],
            desired(&[2, 4]),
        );
        assert_eq!(plan.to_delete, vec![Key::from(1), Key::from(3)]);
        assert_eq!(plan.to_upsert.len(), 2);
    }

    #[test]
    fn identical_contents_delete_nothing() {
        let plan = ReconciliationPlan::compute(
            vec![Key::from(1), Key::from(2)],
            desired(&[1, 2]),
        );
        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.to_upsert.len(), 2);
    }

    #[test]
    fn an_empty_table_only_upserts() {
        let plan = ReconciliationPlan::compute(Vec::new(), desired(&[1]));
        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.to_upsert.len(), 1);
    }

    #[test]
    fn membership_is_by_key_identity_not_record_equality() {
        // Same key, different fields: the record is upserted, not deleted
        let record = Record::from_value(json!({"id": 1, "name": "new"})).expect("object");
        let plan = ReconciliationPlan::compute(
            vec![Key::from(1)],
            vec![(Some(Key::from(1)), record)],
        );
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn keyless_records_count_as_new() {
        let keyless = Record::from_value(json!({"name": "fresh"})).expect("object");
        let plan =
            ReconciliationPlan::compute(vec![Key::from(1)], vec![(None, keyless)]);
        // Nothing in the desired list claims key 1, so it goes
        assert_eq!(plan.to_delete, vec![Key::from(1)]);
        assert_eq!(plan.to_upsert.len(), 1);
    }
}
