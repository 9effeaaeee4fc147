//! The store session: lifecycle, liveness, and the async operation
//! surface.
//!
//! Every public operation follows the same shape: check liveness and
//! validate inputs synchronously, then hand the engine work to a blocking
//! task and suspend until the enclosing storage transaction completes.
//! The operation's `Result` settles exactly once: there is no per-record
//! completion visible to the caller, only the transaction-scoped outcome.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::task;
use tracing::{debug, trace};

use tabledb_core::{Key, Record, TransactionError, TransactionResult};
use tabledb_storage::backends::RedbEngine;
use tabledb_storage::{StorageEngine, Transaction};

use crate::batch::Batch;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::range::KeyRange;
use crate::reconcile::ReconciliationPlan;
use crate::schema::{self, Catalog, TableSchema};
use crate::txn::TableTransaction;

/// The host's storage capability, passed explicitly into
/// [`Session::open`] instead of being discovered from ambient state.
#[derive(Debug, Clone)]
pub enum Storage {
    /// Store data in files under this directory.
    File {
        /// Directory the store file lives in.
        dir: PathBuf,
    },
    /// Keep data in memory; lost when the session closes.
    InMemory,
}

impl Storage {
    /// File-backed storage under the given directory.
    #[must_use]
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::File { dir: dir.into() }
    }

    /// In-memory storage.
    #[must_use]
    pub const fn in_memory() -> Self {
        Self::InMemory
    }

    /// Find a per-user data directory on this host.
    ///
    /// Honors `TABLEDB_DATA_DIR`, then the platform conventions
    /// (`XDG_DATA_HOME`, `HOME`, `APPDATA`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] when the host exposes no usable
    /// data directory.
    pub fn detect() -> Result<Self> {
        let base = std::env::var_os("TABLEDB_DATA_DIR")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("XDG_DATA_HOME").map(PathBuf::from))
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share"))
            })
            .or_else(|| std::env::var_os("APPDATA").map(PathBuf::from));
        match base {
            Some(dir) => Ok(Self::File { dir: dir.join("tabledb") }),
            None => Err(Error::Unsupported(
                "no per-user data directory on this host".to_owned(),
            )),
        }
    }
}

/// Which key guarantees a write path demands of its input records.
#[derive(Clone, Copy, PartialEq, Eq)]
enum KeyRule {
    /// `add`: keys may be generated on auto-increment tables.
    Add,
    /// `upsert` / `set`: the table must keep keys in-line, but
    /// auto-increment tables may still generate missing ones.
    Replace,
    /// `update`: every record must carry its key.
    Merge,
}

/// An open session against one store.
///
/// `Session` is the only entry point to the store: it owns the engine
/// handle, knows the declared tables, and enforces the closed/open
/// lifecycle. It is cheap to clone and safe to share across tasks.
///
/// # Example
///
/// ```ignore
/// use tabledb::{Config, Session, Storage, TableSpec};
///
/// let config = Config::new("app", 1).table(TableSpec::new("users").key_path("id"));
/// let session = Session::open(Storage::in_memory(), config).await?;
///
/// session.add("users", record).await?;
/// let user = session.get("users", 1).await?;
/// session.close().await?;
/// ```
pub struct Session<E: StorageEngine = RedbEngine> {
    inner: Arc<SessionInner<E>>,
}

impl<E: StorageEngine> Clone for Session<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: StorageEngine> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

struct SessionInner<E> {
    /// `None` once the session is closed. In-flight operations hold
    /// their own `Arc` of the state, so the engine is released when the
    /// last of them finishes.
    state: Mutex<Option<Arc<SessionState<E>>>>,
}

struct SessionState<E> {
    engine: E,
    catalog: Catalog,
}

impl Session<RedbEngine> {
    /// Open a store with the default redb engine on the given storage
    /// capability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed configuration,
    /// [`Error::Storage`] if the engine cannot be opened, and whatever
    /// the schema initializer reports.
    pub async fn open(storage: Storage, config: Config) -> Result<Self> {
        // Validate before touching the filesystem
        let catalog = config.into_catalog()?;
        let engine = match storage {
            Storage::File { dir } => {
                std::fs::create_dir_all(&dir)
                    .map_err(|e| Error::Storage(tabledb_storage::StorageError::Io(e)))?;
                RedbEngine::open(dir.join(format!("{}.redb", catalog.name)))?
            }
            Storage::InMemory => RedbEngine::in_memory()?,
        };
        Self::open_with_catalog(engine, catalog).await
    }

    /// Open an in-memory store; a shorthand for
    /// `open(Storage::in_memory(), config)`.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open).
    pub async fn in_memory(config: Config) -> Result<Self> {
        Self::open(Storage::InMemory, config).await
    }
}

impl<E: StorageEngine> Session<E> {
    /// Open a store on a caller-provided engine.
    ///
    /// This is the full capability-injection form: tests pass an
    /// in-memory engine, embedders pass whatever implements
    /// [`StorageEngine`].
    ///
    /// # Errors
    ///
    /// As [`Session::open`].
    pub async fn open_with_engine(engine: E, config: Config) -> Result<Self> {
        Self::open_with_catalog(engine, config.into_catalog()?).await
    }

    async fn open_with_catalog(engine: E, requested: Catalog) -> Result<Self> {
        let (engine, catalog) = task::spawn_blocking(move || -> Result<(E, Catalog)> {
            let catalog = {
                let mut txn = engine.begin_write()?;
                let catalog = schema::initialize(&mut txn, requested)?;
                txn.commit()?;
                catalog
            };
            Ok((engine, catalog))
        })
        .await
        .map_err(join_error)??;

        debug!(
            store = %catalog.name,
            version = catalog.version,
            tables = catalog.tables.len(),
            "session opened"
        );
        Ok(Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(Some(Arc::new(SessionState { engine, catalog }))),
            }),
        })
    }

    /// Close the session and release the engine handle.
    ///
    /// Terminal: every later operation fails with [`Error::Closed`], and
    /// a second `close` fails with [`Error::AlreadyClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyClosed`] if the session is already closed.
    pub async fn close(&self) -> Result<()> {
        let mut guard = lock(&self.inner.state)?;
        if guard.take().is_none() {
            return Err(Error::AlreadyClosed);
        }
        debug!("session closed");
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).map_or(true, |guard| guard.is_none())
    }

    /// The declared table names, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after `close`.
    pub async fn table_names(&self) -> Result<Vec<String>> {
        let state = self.handle()?;
        Ok(state.catalog.table_names())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get one record by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after `close`, or a
    /// [`TransactionError::TableNotFound`] for undeclared tables.
    pub async fn get(&self, table: &str, key: impl Into<Key>) -> Result<Option<Record>> {
        let state = self.handle()?;
        state.catalog.table(table)?;
        let table = table.to_owned();
        let key = key.into();
        task::spawn_blocking(move || {
            let txn = TableTransaction::new(state.engine.begin_read()?, &state.catalog);
            Ok(txn.get(&table, &key)?)
        })
        .await
        .map_err(join_error)?
    }

    /// Count the records of a table.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn count(&self, table: &str) -> Result<u64> {
        let state = self.handle()?;
        state.catalog.table(table)?;
        let table = table.to_owned();
        task::spawn_blocking(move || {
            let txn = TableTransaction::new(state.engine.begin_read()?, &state.catalog);
            Ok(txn.count(&table)?)
        })
        .await
        .map_err(join_error)?
    }

    /// Query records in ascending primary-key order.
    ///
    /// `range` restricts the scan; `None` scans the whole table. The
    /// result is materialized; each call re-executes the scan.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn query(&self, table: &str, range: Option<KeyRange>) -> Result<Vec<Record>> {
        self.query_with(table, range, |_| {}).await
    }

    /// [`query`](Self::query), invoking `on_record` once per record as it
    /// is visited. The callback observes the scan; it cannot alter it.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn query_with<F>(
        &self,
        table: &str,
        range: Option<KeyRange>,
        on_record: F,
    ) -> Result<Vec<Record>>
    where
        F: FnMut(&Record) + Send + 'static,
    {
        let state = self.handle()?;
        state.catalog.table(table)?;
        let table = table.to_owned();
        let resolved = range.unwrap_or_default().resolve();
        let mut on_record = on_record;
        task::spawn_blocking(move || {
            let txn = TableTransaction::new(state.engine.begin_read()?, &state.catalog);
            Ok(txn.scan(&table, &resolved, &mut on_record)?)
        })
        .await
        .map_err(join_error)?
    }

    /// Query records through a secondary index, in ascending index-key
    /// order. A multi-entry index may yield a record once per indexed
    /// element.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`TransactionError::IndexNotFound`]
    /// for undeclared indexes.
    pub async fn query_index(
        &self,
        table: &str,
        index: &str,
        range: Option<KeyRange>,
    ) -> Result<Vec<Record>> {
        self.query_index_with(table, index, range, |_| {}).await
    }

    /// [`query_index`](Self::query_index) with a per-record observer.
    ///
    /// # Errors
    ///
    /// As [`query_index`](Self::query_index).
    pub async fn query_index_with<F>(
        &self,
        table: &str,
        index: &str,
        range: Option<KeyRange>,
        on_record: F,
    ) -> Result<Vec<Record>>
    where
        F: FnMut(&Record) + Send + 'static,
    {
        let state = self.handle()?;
        state.catalog.table(table)?;
        let table = table.to_owned();
        let index = index.to_owned();
        let resolved = range.unwrap_or_default().resolve();
        let mut on_record = on_record;
        task::spawn_blocking(move || {
            let txn = TableTransaction::new(state.engine.begin_read()?, &state.catalog);
            Ok(txn.scan_index(&table, &index, &resolved, &mut on_record)?)
        })
        .await
        .map_err(join_error)?
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert new records. Every record must be new: a duplicate primary
    /// key fails the whole batch and none of it lands.
    ///
    /// Resolves with the records as written (generated keys injected)
    /// once the enclosing transaction commits.
    ///
    /// # Errors
    ///
    /// [`Error::MissingKey`] when a record lacks its key field,
    /// [`Error::Transaction`] for duplicate keys and unique-index
    /// violations.
    pub async fn add(
        &self,
        table: &str,
        records: impl Into<Batch<Record>>,
    ) -> Result<Vec<Record>> {
        self.add_with(table, records, |_| {}).await
    }

    /// [`add`](Self::add), invoking `on_record` after each record is
    /// accepted. Strictly observational: the callback affects neither the
    /// result nor the batch outcome, and a later failure still rolls the
    /// observed records back.
    ///
    /// # Errors
    ///
    /// As [`add`](Self::add).
    pub async fn add_with<F>(
        &self,
        table: &str,
        records: impl Into<Batch<Record>>,
        on_record: F,
    ) -> Result<Vec<Record>>
    where
        F: FnMut(&Record) + Send + 'static,
    {
        let state = self.handle()?;
        let records = records.into().into_vec();
        validate_write(state.catalog.table(table)?, &records, KeyRule::Add)?;
        let table = table.to_owned();
        let mut on_record = on_record;
        task::spawn_blocking(move || {
            let mut txn = TableTransaction::new(state.engine.begin_write()?, &state.catalog);
            let mut out = Vec::with_capacity(records.len());
            for record in records {
                match txn.add(&table, record) {
                    Ok(written) => {
                        on_record(&written);
                        out.push(written);
                    }
                    Err(e) => return fail(txn, e),
                }
            }
            txn.commit()?;
            trace!(table = %table, records = out.len(), "add committed");
            Ok(out)
        })
        .await
        .map_err(join_error)?
    }

    /// Write records unconditionally, replacing any record under the
    /// same primary key. No merge: the new record is stored as given.
    ///
    /// # Errors
    ///
    /// As [`add`](Self::add); additionally [`Error::Config`] on tables
    /// that keep keys out of line.
    pub async fn upsert(
        &self,
        table: &str,
        records: impl Into<Batch<Record>>,
    ) -> Result<Vec<Record>> {
        self.upsert_with(table, records, |_| {}).await
    }

    /// [`upsert`](Self::upsert) with a per-record observer.
    ///
    /// # Errors
    ///
    /// As [`upsert`](Self::upsert).
    pub async fn upsert_with<F>(
        &self,
        table: &str,
        records: impl Into<Batch<Record>>,
        on_record: F,
    ) -> Result<Vec<Record>>
    where
        F: FnMut(&Record) + Send + 'static,
    {
        let state = self.handle()?;
        let records = records.into().into_vec();
        validate_write(state.catalog.table(table)?, &records, KeyRule::Replace)?;
        let table = table.to_owned();
        let mut on_record = on_record;
        task::spawn_blocking(move || {
            let mut txn = TableTransaction::new(state.engine.begin_write()?, &state.catalog);
            let mut out = Vec::with_capacity(records.len());
            for record in records {
                match txn.put(&table, record) {
                    Ok(written) => {
                        on_record(&written);
                        out.push(written);
                    }
                    Err(e) => return fail(txn, e),
                }
            }
            txn.commit()?;
            trace!(table = %table, records = out.len(), "upsert committed");
            Ok(out)
        })
        .await
        .map_err(join_error)?
    }

    /// Update existing records by shallow merge: each partial's fields
    /// win, fields it does not mention survive unchanged.
    ///
    /// Every partial must name an existing record; a missing target is an
    /// engine-level failure that rolls the whole batch back.
    ///
    /// Resolves with the merged records as written.
    ///
    /// # Errors
    ///
    /// [`Error::MissingKey`] when a partial lacks the key field,
    /// [`Error::Transaction`] ([`TransactionError::KeyNotFound`]) when
    /// the target record does not exist.
    pub async fn update(
        &self,
        table: &str,
        partials: impl Into<Batch<Record>>,
    ) -> Result<Vec<Record>> {
        self.update_with(table, partials, |_| {}).await
    }

    /// [`update`](Self::update) with a per-record observer; the callback
    /// sees the merged record.
    ///
    /// # Errors
    ///
    /// As [`update`](Self::update).
    pub async fn update_with<F>(
        &self,
        table: &str,
        partials: impl Into<Batch<Record>>,
        on_record: F,
    ) -> Result<Vec<Record>>
    where
        F: FnMut(&Record) + Send + 'static,
    {
        let state = self.handle()?;
        let partials = partials.into().into_vec();
        validate_write(state.catalog.table(table)?, &partials, KeyRule::Merge)?;
        let table = table.to_owned();
        let mut on_record = on_record;
        task::spawn_blocking(move || {
            let mut txn = TableTransaction::new(state.engine.begin_write()?, &state.catalog);
            let mut out = Vec::with_capacity(partials.len());
            for partial in partials {
                match txn.merge(&table, partial) {
                    Ok(merged) => {
                        on_record(&merged);
                        out.push(merged);
                    }
                    Err(e) => return fail(txn, e),
                }
            }
            txn.commit()?;
            trace!(table = %table, records = out.len(), "update committed");
            Ok(out)
        })
        .await
        .map_err(join_error)?
    }

    /// Delete records by primary key. Deleting an absent key is a no-op
    /// success, so the batch outcome only reflects engine failures.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn delete(&self, table: &str, keys: impl Into<Batch<Key>>) -> Result<()> {
        self.delete_with(table, keys, |_| {}).await
    }

    /// [`delete`](Self::delete), invoking `on_key` once per processed
    /// key (present or not, matching the engine's no-op success).
    ///
    /// # Errors
    ///
    /// As [`delete`](Self::delete).
    pub async fn delete_with<F>(
        &self,
        table: &str,
        keys: impl Into<Batch<Key>>,
        on_key: F,
    ) -> Result<()>
    where
        F: FnMut(&Key) + Send + 'static,
    {
        let state = self.handle()?;
        state.catalog.table(table)?;
        let keys = keys.into().into_vec();
        let table = table.to_owned();
        let mut on_key = on_key;
        task::spawn_blocking(move || {
            let mut txn = TableTransaction::new(state.engine.begin_write()?, &state.catalog);
            for key in &keys {
                match txn.delete(&table, key) {
                    Ok(_) => on_key(key),
                    Err(e) => return fail(txn, e),
                }
            }
            txn.commit()?;
            trace!(table = %table, keys = keys.len(), "delete committed");
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    /// Remove every record of a table. The auto-increment counter is
    /// preserved.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn clear(&self, table: &str) -> Result<()> {
        let state = self.handle()?;
        state.catalog.table(table)?;
        let table = table.to_owned();
        task::spawn_blocking(move || {
            let mut txn = TableTransaction::new(state.engine.begin_write()?, &state.catalog);
            match txn.clear(&table) {
                Ok(removed) => {
                    txn.commit()?;
                    trace!(table = %table, removed, "clear committed");
                    Ok(())
                }
                Err(e) => fail(txn, e),
            }
        })
        .await
        .map_err(join_error)?
    }

    /// Make the table's contents exactly equal to `desired`, by primary
    /// key: keys not in the list are deleted, every listed record is
    /// upserted.
    ///
    /// The delete phase runs first and a failure in it stops the upsert
    /// phase from ever starting. Both phases execute inside one storage
    /// transaction here. The classic rendition of this algorithm ran
    /// them as two separate transactions and could be caught between
    /// them by a crash; folding them is the stronger behavior this
    /// engine can afford.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an empty `desired` list, otherwise as
    /// [`upsert`](Self::upsert).
    pub async fn set(
        &self,
        table: &str,
        desired: impl Into<Batch<Record>>,
    ) -> Result<Vec<Record>> {
        let state = self.handle()?;
        let desired = desired.into().into_vec();
        if desired.is_empty() {
            return Err(Error::Config(
                "set requires at least one record; use clear to empty a table".to_owned(),
            ));
        }

        let schema = state.catalog.table(table)?;
        validate_write(schema, &desired, KeyRule::Replace)?;
        let keyed: Vec<(Option<Key>, Record)> = desired
            .into_iter()
            .map(|record| {
                let key = schema.key_of(&record)?;
                Ok((key, record))
            })
            .collect::<Result<_>>()?;

        let table = table.to_owned();
        task::spawn_blocking(move || {
            let mut txn = TableTransaction::new(state.engine.begin_write()?, &state.catalog);
            let applied: TransactionResult<Vec<Record>> = (|| {
                let current = txn.current_keys(&table)?;
                let plan = ReconciliationPlan::compute(current, keyed);
                trace!(
                    table = %table,
                    deletes = plan.to_delete.len(),
                    upserts = plan.to_upsert.len(),
                    "reconciling"
                );
                // Phase 1: deletes. Short-circuits phase 2 on failure.
                for key in &plan.to_delete {
                    txn.delete(&table, key)?;
                }
                // Phase 2: upsert the entire desired list, in order.
                let mut out = Vec::with_capacity(plan.to_upsert.len());
                for record in plan.to_upsert {
                    out.push(txn.put(&table, record)?);
                }
                Ok(out)
            })();
            match applied {
                Ok(out) => {
                    txn.commit()?;
                    trace!(table = %table, records = out.len(), "set committed");
                    Ok(out)
                }
                Err(e) => fail(txn, e),
            }
        })
        .await
        .map_err(join_error)?
    }

    /// Synchronous liveness gate: the current state, or [`Error::Closed`].
    fn handle(&self) -> Result<Arc<SessionState<E>>> {
        lock(&self.inner.state)?.as_ref().cloned().ok_or(Error::Closed)
    }
}

/// Roll a failed batch back and surface its first error.
fn fail<R>(txn: TableTransaction<'_, impl Transaction>, e: TransactionError) -> Result<R> {
    trace!(error = %e, "rolling back");
    let _ = txn.rollback();
    Err(e.into())
}

fn lock<E>(
    mutex: &Mutex<Option<Arc<SessionState<E>>>>,
) -> Result<std::sync::MutexGuard<'_, Option<Arc<SessionState<E>>>>> {
    mutex
        .lock()
        .map_err(|_| TransactionError::Internal("session state lock poisoned".to_owned()).into())
}

fn join_error(e: task::JoinError) -> Error {
    Error::Transaction(TransactionError::Internal(format!(
        "blocking task failed: {e}"
    )))
}

/// Synchronous input validation for the write paths.
fn validate_write(schema: &TableSchema, records: &[Record], rule: KeyRule) -> Result<()> {
    let path = schema.key.path();

    if path.is_none() && rule != KeyRule::Add {
        return Err(Error::Config(format!(
            "table '{}' keeps keys out of line; this operation needs in-line keys",
            schema.name
        )));
    }

    for record in records {
        let Some(path) = path else { continue };
        match record.key_at(path) {
            Ok(Some(_)) => {}
            Ok(None) => {
                let generated = schema.key.is_auto() && rule != KeyRule::Merge;
                if !generated {
                    return Err(Error::MissingKey {
                        table: schema.name.clone(),
                        key_path: path.to_owned(),
                    });
                }
            }
            Err(e) => {
                return Err(Error::Config(format!("table '{}': {e}", schema.name)));
            }
        }
    }
    Ok(())
}
