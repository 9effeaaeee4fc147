//! Physical key layout for the redb backend.
//!
//! All logical tables share one physical redb table. A physical key is the
//! logical table name, a `0x00` separator, then the logical key:
//!
//! ```text
//! [table bytes][0x00][key bytes]
//! ```
//!
//! Logical table names must not contain `0x00` (the facade's configuration
//! layer rejects them). Within one table the prefix is constant, so
//! logical key order equals physical key order, and the whole table spans
//! the physical range `[table 0x00, table 0x01)`.

use redb::TableDefinition;

/// The single physical table holding every logical table's entries.
pub const DATA_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("data");

const SEPARATOR: u8 = 0x00;

/// Encode a logical (table, key) pair as a physical key.
#[must_use]
pub fn encode_key(table: &str, key: &[u8]) -> Vec<u8> {
    debug_assert!(!table.as_bytes().contains(&SEPARATOR));
    let mut out = Vec::with_capacity(table.len() + 1 + key.len());
    out.extend_from_slice(table.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(key);
    out
}

/// Decode a physical key back into its logical key, if it belongs to the
/// given table.
#[must_use]
pub fn decode_key<'a>(table: &str, physical: &'a [u8]) -> Option<&'a [u8]> {
    let prefix_len = table.len() + 1;
    if physical.len() < prefix_len
        || &physical[..table.len()] != table.as_bytes()
        || physical[table.len()] != SEPARATOR
    {
        return None;
    }
    Some(&physical[prefix_len..])
}

/// The first physical key of a logical table's range.
#[must_use]
pub fn table_start_key(table: &str) -> Vec<u8> {
    encode_key(table, &[])
}

/// The exclusive end of a logical table's physical range.
#[must_use]
pub fn table_end_key(table: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(table.len() + 1);
    out.extend_from_slice(table.as_bytes());
    out.push(SEPARATOR + 1);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let physical = encode_key("users", b"k1");
        assert_eq!(decode_key("users", &physical), Some(b"k1".as_slice()));
        assert_eq!(decode_key("user", &physical), None);
        assert_eq!(decode_key("orders", &physical), None);
    }

    #[test]
    fn table_ranges_do_not_overlap() {
        // "users2" must fall outside the range of "users"
        let inside = encode_key("users", b"zzzz");
        let other = encode_key("users2", b"");
        let end = table_end_key("users");
        assert!(table_start_key("users") <= inside);
        assert!(inside < end);
        assert!(other >= end);
    }

    #[test]
    fn key_order_is_preserved_within_a_table() {
        let a = encode_key("t", b"a");
        let b = encode_key("t", b"b");
        let empty = encode_key("t", b"");
        assert!(empty < a);
        assert!(a < b);
    }
}
