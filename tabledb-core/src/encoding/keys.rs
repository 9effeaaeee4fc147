//! Key encoding for ordered storage.
//!
//! Encodes [`Key`]s into byte strings whose lexicographic order equals the
//! keys' logical order, so the storage layer's byte-range scans visit
//! records in key order.
//!
//! # Atom format
//!
//! Each key is one *atom*: a type tag byte followed by a type-specific
//! payload. Tags partition the byte space by type, in the same order keys
//! compare:
//!
//! - `0x10` - Number: 8 bytes, the order-preserving transform of the f64 bits
//! - `0x20` - Text: escaped UTF-8 bytes, `0x00` terminated
//! - `0x30` - Bytes: escaped raw bytes, `0x00` terminated
//!
//! Variable-length payloads escape a literal `0x00` as `0x00 0xFF` and end
//! with a bare `0x00`. Any byte that can follow a terminator (an atom tag,
//! or nothing) sorts below `0xFF`, so a key that is a strict prefix of
//! another sorts first.
//!
//! Index entries concatenate atoms: the indexed value(s) first, the primary
//! key last. Concatenation keeps ordering because atoms are
//! self-delimiting.

use crate::error::CoreError;
use crate::types::Key;

/// Atom tag for numeric keys.
pub const TAG_NUMBER: u8 = 0x10;
/// Atom tag for text keys.
pub const TAG_TEXT: u8 = 0x20;
/// Atom tag for binary keys.
pub const TAG_BYTES: u8 = 0x30;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// Encode a single key as a storage key.
#[must_use]
pub fn encode_key(key: &Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len_hint(key));
    append_atom(&mut out, key);
    out
}

/// Encode a secondary index entry key: the indexed atoms, then the primary
/// key atom.
///
/// The primary key suffix makes entries unique per record while keeping
/// entries with equal indexed values adjacent and ordered by primary key.
#[must_use]
pub fn encode_index_entry(indexed: &[Key], primary: &Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        indexed.iter().map(encoded_len_hint).sum::<usize>() + encoded_len_hint(primary),
    );
    for key in indexed {
        append_atom(&mut out, key);
    }
    append_atom(&mut out, primary);
    out
}

/// Encode the prefix shared by every index entry with the given indexed
/// atoms, regardless of primary key.
#[must_use]
pub fn encode_index_prefix(indexed: &[Key]) -> Vec<u8> {
    let mut out = Vec::with_capacity(indexed.iter().map(encoded_len_hint).sum());
    for key in indexed {
        append_atom(&mut out, key);
    }
    out
}

/// The exclusive upper bound of the byte range covered by `prefix`.
///
/// Every encoding that begins with `prefix` followed by more atoms sorts
/// below the returned bound (atom tags are all below `0xFF`), and every
/// encoding whose leading atoms sort above the prefix sorts at or above it.
#[must_use]
pub fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + 1);
    out.extend_from_slice(prefix);
    out.push(0xFF);
    out
}

/// Decode a storage key produced by [`encode_key`].
///
/// # Errors
///
/// Returns [`CoreError::Encoding`] on malformed input or trailing bytes.
pub fn decode_key(bytes: &[u8]) -> Result<Key, CoreError> {
    let (key, rest) = decode_atom(bytes)?;
    if rest.is_empty() {
        Ok(key)
    } else {
        Err(CoreError::Encoding(format!(
            "{} trailing bytes after key",
            rest.len()
        )))
    }
}

/// Decode one atom, returning the key and the remaining bytes.
///
/// # Errors
///
/// Returns [`CoreError::Encoding`] on an unknown tag, a truncated payload,
/// or invalid UTF-8 in a text atom.
pub fn decode_atom(bytes: &[u8]) -> Result<(Key, &[u8]), CoreError> {
    let (&tag, payload) = bytes
        .split_first()
        .ok_or_else(|| CoreError::Encoding("empty atom".to_owned()))?;
    match tag {
        TAG_NUMBER => {
            if payload.len() < 8 {
                return Err(CoreError::Encoding("truncated number atom".to_owned()));
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&payload[..8]);
            Ok((Key::Number(decode_f64(raw)), &payload[8..]))
        }
        TAG_TEXT => {
            let (content, rest) = unescape(payload)?;
            let text = String::from_utf8(content)
                .map_err(|e| CoreError::Encoding(format!("invalid UTF-8 in text atom: {e}")))?;
            Ok((Key::Text(text), rest))
        }
        TAG_BYTES => {
            let (content, rest) = unescape(payload)?;
            Ok((Key::Bytes(content), rest))
        }
        other => Err(CoreError::Encoding(format!("unknown atom tag 0x{other:02x}"))),
    }
}

/// Append one atom to `out`.
pub fn append_atom(out: &mut Vec<u8>, key: &Key) {
    match key {
        Key::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&encode_f64(*n));
        }
        Key::Text(s) => {
            out.push(TAG_TEXT);
            escape_into(out, s.as_bytes());
        }
        Key::Bytes(b) => {
            out.push(TAG_BYTES);
            escape_into(out, b);
        }
    }
}

fn encoded_len_hint(key: &Key) -> usize {
    match key {
        Key::Number(_) => 9,
        Key::Text(s) => s.len() + 2,
        Key::Bytes(b) => b.len() + 2,
    }
}

/// Map an `f64` to 8 bytes whose big-endian order matches `total_cmp`:
/// flip the sign bit of non-negative values, flip every bit of negative
/// ones.
fn encode_f64(n: f64) -> [u8; 8] {
    let bits = n.to_bits();
    let monotone = if bits >> 63 == 0 {
        bits ^ (1 << 63)
    } else {
        !bits
    };
    monotone.to_be_bytes()
}

fn decode_f64(raw: [u8; 8]) -> f64 {
    let monotone = u64::from_be_bytes(raw);
    let bits = if monotone >> 63 == 1 {
        monotone ^ (1 << 63)
    } else {
        !monotone
    };
    f64::from_bits(bits)
}

fn escape_into(out: &mut Vec<u8>, content: &[u8]) {
    for &byte in content {
        out.push(byte);
        if byte == TERMINATOR {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

fn unescape(payload: &[u8]) -> Result<(Vec<u8>, &[u8]), CoreError> {
    let mut content = Vec::new();
    let mut i = 0;
    while i < payload.len() {
        let byte = payload[i];
        if byte == TERMINATOR {
            if payload.get(i + 1) == Some(&ESCAPE) {
                content.push(TERMINATOR);
                i += 2;
            } else {
                return Ok((content, &payload[i + 1..]));
            }
        } else {
            content.push(byte);
            i += 1;
        }
    }
    Err(CoreError::Encoding("unterminated atom".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrip() {
        for key in [
            Key::from(0),
            Key::from(-3),
            Key::try_from(2.5).unwrap(),
            Key::from(""),
            Key::from("alpha"),
            Key::Text("nul\0inside".to_owned()),
            Key::Bytes(vec![]),
            Key::Bytes(vec![0x00, 0xFF, 0x00]),
        ] {
            let encoded = encode_key(&key);
            assert_eq!(decode_key(&encoded).unwrap(), key, "roundtrip of {key}");
        }
    }

    #[test]
    fn numbers_encode_in_numeric_order() {
        let values = [f64::NEG_INFINITY, -100.0, -1.5, -0.0, 0.0, 0.25, 3.0, 1e9];
        let encoded: Vec<_> = values
            .iter()
            .map(|n| encode_key(&Key::Number(*n)))
            .collect();
        for window in encoded.windows(2) {
            assert!(window[0] <= window[1]);
        }
    }

    #[test]
    fn text_prefix_sorts_first() {
        let a = encode_key(&Key::from("a"));
        let ab = encode_key(&Key::from("ab"));
        let a_nul = encode_key(&Key::Text("a\0".to_owned()));
        assert!(a < ab);
        assert!(a < a_nul);
        assert!(a_nul < ab);
    }

    #[test]
    fn type_tags_partition_the_keyspace() {
        let number = encode_key(&Key::from(i64::MAX));
        let text = encode_key(&Key::from(""));
        let bytes = encode_key(&Key::Bytes(vec![]));
        assert!(number < text);
        assert!(text < bytes);
    }

    #[test]
    fn index_entries_group_under_their_prefix() {
        let prefix = encode_index_prefix(&[Key::from("blue")]);
        let entry1 = encode_index_entry(&[Key::from("blue")], &Key::from(1));
        let entry2 = encode_index_entry(&[Key::from("blue")], &Key::from(2));
        let other = encode_index_entry(&[Key::from("bluebell")], &Key::from(1));

        assert!(entry1.starts_with(&prefix));
        assert!(entry2.starts_with(&prefix));
        assert!(entry1 < entry2);

        let upper = prefix_upper_bound(&prefix);
        assert!(entry1 < upper);
        assert!(entry2 < upper);
        assert!(other > upper);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_key(&[]).is_err());
        assert!(decode_key(&[0x42]).is_err());
        assert!(decode_key(&[TAG_NUMBER, 1, 2]).is_err());
        assert!(decode_key(&[TAG_TEXT, b'a']).is_err());
        let mut trailing = encode_key(&Key::from(1));
        trailing.push(0x00);
        assert!(decode_key(&trailing).is_err());
    }
}
