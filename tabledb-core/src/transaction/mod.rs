//! Transaction error types shared by the storage-facing layers.

mod error;

pub use error::{TransactionError, TransactionResult};
