//! In-memory adapter for testing.

use crate::adapter::{ChangeStream, IsolationLevel, RowStream, StorageAdapter};
use crate::config::DEFAULT_METADATA_SUFFIX;
use crate::error::{AdapterError, AdapterResult};
use parking_lot::Mutex;
use rowsync_protocol::{MetadataEntry, PrimaryKey, Revision, Role, Row, Schema, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct MetaRow {
    revision: Revision,
    exists: bool,
    fingerprint: String,
    dirty: bool,
}

impl MetaRow {
    fn entry(&self, table: &str, key: &PrimaryKey) -> MetadataEntry {
        MetadataEntry {
            table: table.to_string(),
            primary_key: key.clone(),
            revision: self.revision,
            exists: self.exists,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    scope: Option<Role>,
    revision: Revision,
    schema: Schema,
    rows: BTreeMap<String, BTreeMap<PrimaryKey, Row>>,
    metadata: BTreeMap<String, BTreeMap<PrimaryKey, MetaRow>>,
}

impl MemoryState {
    fn table_rows(&self, table: &str) -> AdapterResult<&BTreeMap<PrimaryKey, Row>> {
        self.rows
            .get(table)
            .ok_or_else(|| AdapterError::UnknownTable(table.to_string()))
    }

    fn table_meta(&self, table: &str) -> AdapterResult<&BTreeMap<PrimaryKey, MetaRow>> {
        self.metadata
            .get(table)
            .ok_or_else(|| AdapterError::UnknownTable(format!("{table} (metadata)")))
    }

    fn entries_where(
        &self,
        table: &str,
        pred: impl Fn(&MetaRow) -> bool,
    ) -> AdapterResult<Vec<MetadataEntry>> {
        let mut entries: Vec<_> = self
            .table_meta(table)?
            .iter()
            .filter(|(_, m)| pred(m))
            .map(|(k, m)| m.entry(table, k))
            .collect();
        entries.sort_by_key(|e| e.revision);
        Ok(entries)
    }

    fn write_row(&mut self, table: &str, key: &PrimaryKey, data: &Row) -> AdapterResult<()> {
        let def = self
            .schema
            .table(table)
            .ok_or_else(|| AdapterError::UnknownTable(table.to_string()))?;
        let mut row = data.clone();
        row.insert(def.primary_key.clone(), Value::from(key.clone()));
        def.check_row(&row).map_err(AdapterError::Backend)?;
        self.rows
            .entry(table.to_string())
            .or_default()
            .insert(key.clone(), row);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Committed {
    generation: u64,
    state: MemoryState,
}

/// Shared in-memory database.
///
/// Cloning the handle shares the underlying data, so several adapters
/// (one per request or per thread) can run transactions against the same
/// store. Application writes go through [`MemoryStore::insert_row`] and
/// [`MemoryStore::remove_row`], which bypass metadata just like an
/// application writing to its own tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Committed>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new adapter over this store.
    pub fn adapter(&self) -> MemoryAdapter {
        MemoryAdapter::with_store(self.clone())
    }

    /// Inserts or replaces an application row, outside of synchronization.
    ///
    /// # Errors
    ///
    /// Fails if the table is unknown, the row has no usable key, or a
    /// column does not match the schema.
    pub fn insert_row(&self, table: &str, row: Row) -> AdapterResult<()> {
        let mut guard = self.inner.lock();
        let pk_col = guard
            .state
            .schema
            .table(table)
            .map(|t| t.primary_key.clone())
            .ok_or_else(|| AdapterError::UnknownTable(table.to_string()))?;
        let key = row
            .get(&pk_col)
            .and_then(PrimaryKey::from_value)
            .ok_or_else(|| AdapterError::Backend(format!("row for {table} has no key")))?;
        guard.state.write_row(table, &key, &row)?;
        guard.generation += 1;
        Ok(())
    }

    /// Removes an application row, outside of synchronization.
    pub fn remove_row(&self, table: &str, key: &PrimaryKey) -> AdapterResult<()> {
        let mut guard = self.inner.lock();
        if let Some(rows) = guard.state.rows.get_mut(table) {
            rows.remove(key);
        }
        guard.generation += 1;
        Ok(())
    }

    /// Returns a copy of the rows of `table`, ordered by key.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let guard = self.inner.lock();
        guard
            .state
            .rows
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the commit generation. Every writing commit increments it.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }
}

struct Transaction {
    base_generation: u64,
    state: MemoryState,
    wrote: bool,
}

/// Adapter over a [`MemoryStore`].
///
/// Transactions are optimistic: a transaction works on a private copy of
/// the store and commit fails with [`AdapterError::TransactionAborted`] if
/// any other commit happened since `begin`. Read-only transactions always
/// commit. This gives serializable
/// isolation without holding a lock across the transaction.
pub struct MemoryAdapter {
    store: MemoryStore,
    suffix: String,
    txn: Option<Transaction>,
}

impl MemoryAdapter {
    /// Creates an adapter over a fresh store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Creates an adapter over an existing store.
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            suffix: DEFAULT_METADATA_SUFFIX.to_string(),
            txn: None,
        }
    }

    /// Sets the metadata table suffix.
    #[must_use]
    pub fn with_metadata_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn read<R>(&self, f: impl FnOnce(&MemoryState) -> R) -> R {
        match &self.txn {
            Some(txn) => f(&txn.state),
            None => f(&self.store.inner.lock().state),
        }
    }

    /// Runs a definition change in the open transaction, or commits it
    /// immediately when none is open.
    fn define<R>(&mut self, f: impl FnOnce(&mut MemoryState) -> AdapterResult<R>) -> AdapterResult<R> {
        match &mut self.txn {
            Some(txn) => {
                txn.wrote = true;
                f(&mut txn.state)
            }
            None => {
                let mut guard = self.store.inner.lock();
                let out = f(&mut guard.state)?;
                guard.generation += 1;
                Ok(out)
            }
        }
    }

    fn write(&mut self) -> AdapterResult<&mut MemoryState> {
        let txn = self.txn.as_mut().ok_or(AdapterError::NoTransaction)?;
        txn.wrote = true;
        Ok(&mut txn.state)
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageAdapter for MemoryAdapter {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn metadata_suffix(&self) -> &str {
        &self.suffix
    }

    fn ensure_metadata_schema(&mut self, scope: Role) -> AdapterResult<()> {
        self.define(|s| match s.scope {
            Some(existing) if existing != scope => Err(AdapterError::Backend(format!(
                "store already initialized for {existing}"
            ))),
            _ => {
                s.scope = Some(scope);
                Ok(())
            }
        })
    }

    fn scope(&self) -> AdapterResult<Option<Role>> {
        Ok(self.read(|s| s.scope))
    }

    fn ensure_metadata_table(&mut self, table: &str) -> AdapterResult<()> {
        self.define(|s| {
            if s.schema.table(table).is_none() {
                return Err(AdapterError::UnknownTable(table.to_string()));
            }
            s.metadata.entry(table.to_string()).or_default();
            Ok(())
        })
    }

    fn metadata_table_exists(&self, table: &str) -> AdapterResult<bool> {
        Ok(self.read(|s| s.metadata.contains_key(table)))
    }

    fn next_revision(&mut self) -> AdapterResult<Revision> {
        let state = self.write()?;
        state.revision += 1;
        Ok(state.revision)
    }

    fn last_revision(&self) -> AdapterResult<Revision> {
        Ok(self.read(|s| s.revision))
    }

    fn set_last_revision(&mut self, revision: Revision) -> AdapterResult<()> {
        let state = self.write()?;
        if revision < state.revision {
            return Err(AdapterError::Backend(format!(
                "cannot rewind revision from {} to {revision}",
                state.revision
            )));
        }
        state.revision = revision;
        Ok(())
    }

    fn table_revision(&self, table: &str) -> AdapterResult<Revision> {
        self.read(|s| {
            Ok(s.table_meta(table)?
                .values()
                .map(|m| m.revision)
                .max()
                .unwrap_or(0))
        })
    }

    fn changes_since(&self, table: &str, since: Revision) -> AdapterResult<ChangeStream<'_>> {
        let entries = self.read(|s| s.entries_where(table, |m| m.revision > since))?;
        Ok(ChangeStream::new(self, entries))
    }

    fn changes_by_dirty_flag(&self, table: &str) -> AdapterResult<ChangeStream<'_>> {
        let entries = self.read(|s| s.entries_where(table, |m| m.dirty))?;
        Ok(ChangeStream::new(self, entries))
    }

    fn deleted_rows(&self, table: &str) -> AdapterResult<ChangeStream<'_>> {
        let entries = self.read(|s| s.entries_where(table, |m| !m.exists))?;
        Ok(ChangeStream::new(self, entries))
    }

    fn all_rows(&self, table: &str) -> AdapterResult<RowStream<'_>> {
        let keys = self.read(|s| Ok::<_, AdapterError>(s.table_rows(table)?.keys().cloned().collect()))?;
        Ok(RowStream::new(self, table, keys))
    }

    fn row_by_key(&self, table: &str, key: &PrimaryKey) -> AdapterResult<Option<Row>> {
        self.read(|s| Ok(s.table_rows(table)?.get(key).cloned()))
    }

    fn metadata(&self, table: &str, key: &PrimaryKey) -> AdapterResult<Option<MetadataEntry>> {
        self.read(|s| Ok(s.table_meta(table)?.get(key).map(|m| m.entry(table, key))))
    }

    fn metadata_entries(&self, table: &str) -> AdapterResult<Vec<MetadataEntry>> {
        self.read(|s| s.entries_where(table, |_| true))
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn begin(&mut self) -> AdapterResult<()> {
        if self.txn.is_some() {
            return Err(AdapterError::TransactionActive);
        }
        let guard = self.store.inner.lock();
        self.txn = Some(Transaction {
            base_generation: guard.generation,
            state: guard.state.clone(),
            wrote: false,
        });
        Ok(())
    }

    fn upsert_metadata(&mut self, entry: &MetadataEntry, dirty: bool) -> AdapterResult<()> {
        let state = self.write()?;
        let meta = state
            .metadata
            .get_mut(&entry.table)
            .ok_or_else(|| AdapterError::UnknownTable(format!("{} (metadata)", entry.table)))?;
        meta.insert(
            entry.primary_key.clone(),
            MetaRow {
                revision: entry.revision,
                exists: entry.exists,
                fingerprint: entry.fingerprint.clone(),
                dirty,
            },
        );
        Ok(())
    }

    fn upsert_row(&mut self, table: &str, key: &PrimaryKey, data: &Row) -> AdapterResult<()> {
        self.write()?.write_row(table, key, data)
    }

    fn delete_row(&mut self, table: &str, key: &PrimaryKey) -> AdapterResult<()> {
        let state = self.write()?;
        if let Some(rows) = state.rows.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }

    fn advance_revision(
        &mut self,
        table: &str,
        key: &PrimaryKey,
        revision: Revision,
    ) -> AdapterResult<()> {
        let state = self.write()?;
        if let Some(meta) = state.metadata.get_mut(table).and_then(|m| m.get_mut(key)) {
            meta.revision = revision;
            meta.dirty = false;
        }
        Ok(())
    }

    fn commit(&mut self) -> AdapterResult<()> {
        let txn = self.txn.take().ok_or(AdapterError::NoTransaction)?;
        if !txn.wrote {
            return Ok(());
        }
        let mut guard = self.store.inner.lock();
        if guard.generation != txn.base_generation {
            debug!(
                base = txn.base_generation,
                current = guard.generation,
                "memory transaction lost a race"
            );
            return Err(AdapterError::TransactionAborted(
                "store changed since transaction began".to_string(),
            ));
        }
        guard.state = txn.state;
        guard.generation += 1;
        Ok(())
    }

    fn rollback(&mut self) -> AdapterResult<()> {
        self.txn = None;
        Ok(())
    }

    fn primary_key_column(&self, table: &str) -> AdapterResult<String> {
        self.read(|s| {
            s.schema
                .table(table)
                .map(|t| t.primary_key.clone())
                .ok_or_else(|| AdapterError::UnknownTable(table.to_string()))
        })
    }

    fn column_names(&self, table: &str) -> AdapterResult<Vec<String>> {
        self.read(|s| {
            s.schema
                .table(table)
                .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
                .ok_or_else(|| AdapterError::UnknownTable(table.to_string()))
        })
    }

    fn current_schema(&self) -> AdapterResult<Schema> {
        Ok(self.read(|s| s.schema.clone()))
    }

    fn apply_schema(&mut self, schema: &Schema) -> AdapterResult<()> {
        self.define(|s| {
            for table in schema.tables() {
                if table.column(&table.primary_key).is_none() {
                    return Err(AdapterError::SchemaConversion(format!(
                        "table {} has no column for key {}",
                        table.name, table.primary_key
                    )));
                }
                if s.schema.table(&table.name).is_none() {
                    s.schema.insert(table.clone());
                    s.rows.entry(table.name.clone()).or_default();
                }
            }
            Ok(())
        })
    }

    fn has_schema(&self) -> AdapterResult<bool> {
        Ok(self.read(|s| !s.schema.is_empty()))
    }
}
