//! Order-preserving encodings for storage keys.

pub mod keys;

#[cfg(test)]
mod proptest_tests;

pub use keys::{
    decode_key, encode_index_entry, encode_index_prefix, encode_key, prefix_upper_bound,
};
