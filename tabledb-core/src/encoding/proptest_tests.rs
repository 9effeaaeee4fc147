//! Property-based tests for key encoding round-trips and ordering.

#![allow(clippy::expect_used)]

use proptest::prelude::*;

use crate::encoding::keys::{decode_atom, decode_key, encode_index_entry, encode_key};
use crate::types::Key;

/// Strategy for generating arbitrary `Key` instances.
fn arb_key() -> impl Strategy<Value = Key> {
    prop_oneof![
        // Filter out NaN: not a valid key
        any::<f64>()
            .prop_filter("not NaN", |f| !f.is_nan())
            .prop_map(Key::Number),
        ".*".prop_map(Key::Text),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Key::Bytes),
    ]
}

proptest! {
    #[test]
    fn encode_decode_roundtrip(key in arb_key()) {
        let encoded = encode_key(&key);
        let decoded = decode_key(&encoded).expect("decode failed");
        prop_assert_eq!(decoded, key);
    }

    #[test]
    fn encoding_preserves_key_order(a in arb_key(), b in arb_key()) {
        let ea = encode_key(&a);
        let eb = encode_key(&b);
        prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
    }

    #[test]
    fn index_entries_preserve_lexicographic_order(
        ia in arb_key(), pa in arb_key(),
        ib in arb_key(), pb in arb_key(),
    ) {
        let ea = encode_index_entry(std::slice::from_ref(&ia), &pa);
        let eb = encode_index_entry(std::slice::from_ref(&ib), &pb);
        let logical = (&ia, &pa).cmp(&(&ib, &pb));
        prop_assert_eq!(logical, ea.cmp(&eb));
    }

    #[test]
    fn index_entry_suffix_decodes_to_primary_key(ik in arb_key(), pk in arb_key()) {
        let entry = encode_index_entry(std::slice::from_ref(&ik), &pk);
        let (first, rest) = decode_atom(&entry).expect("first atom");
        let (second, tail) = decode_atom(rest).expect("second atom");
        prop_assert_eq!(first, ik);
        prop_assert_eq!(second, pk);
        prop_assert!(tail.is_empty());
    }
}
