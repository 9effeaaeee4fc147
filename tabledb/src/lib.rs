//! TableDB
//!
//! An async facade over an embedded, transactional table store: named
//! tables of JSON records, each keyed by a primary key with optional
//! secondary indexes. Every operation is an `async fn` whose `Result`
//! settles exactly once, when the enclosing storage transaction
//! completes, never per sub-request.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use tabledb::{Config, IndexSpec, Record, Session, Storage, TableSpec};
//!
//! let config = Config::new("app", 1).table(
//!     TableSpec::new("users")
//!         .key_path("id")
//!         .index("by_email", IndexSpec::path("email").unique()),
//! );
//! let session = Session::open(Storage::in_memory(), config).await?;
//!
//! let alice = Record::from_value(json!({"id": 1, "email": "alice@example.com"}))?;
//! session.add("users", alice).await?;
//!
//! let found = session.get("users", 1).await?;
//! session.close().await?;
//! ```
//!
//! # Batches
//!
//! `add`, `upsert`, `update` and `delete` accept one record/key or a
//! list. A batch runs inside one storage transaction: it lands whole or
//! not at all, and the first failing sub-operation settles the whole
//! call with its error.

// Re-export core types
pub use tabledb_core::{CoreError, Key, Record, TransactionError, TransactionResult};

// Re-export storage types
pub use tabledb_storage::{StorageEngine, StorageError, Transaction};

pub mod batch;
pub mod config;
pub mod error;
pub mod range;
pub mod reconcile;
pub mod schema;
pub mod session;

mod txn;

pub use batch::Batch;
pub use config::{Config, IndexSpec, TableSpec};
pub use error::{Error, Result};
pub use range::{KeyRange, ResolvedRange};
pub use schema::{Catalog, IndexSchema, KeySpec, TableSchema};
pub use session::{Session, Storage};
