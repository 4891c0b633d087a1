//! Fault injection for adapters.
//!
//! [`FaultyAdapter`] wraps any adapter and fails a scripted number of
//! commits with a retryable error, so retry paths can be exercised without
//! real contention.

use parking_lot::Mutex;
use rowsync_protocol::{MetadataEntry, PrimaryKey, Revision, Role, Row, Schema};
use rowsync_storage::{
    AdapterError, AdapterResult, ChangeStream, IsolationLevel, RowStream, StorageAdapter,
};
use std::sync::Arc;

/// Failures still to inject, shared between an adapter and the test.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    inner: Arc<Mutex<FaultState>>,
}

#[derive(Debug, Default)]
struct FaultState {
    aborts: u32,
    collisions: u32,
    injected: u32,
}

impl FaultPlan {
    /// Creates a plan injecting nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` commits with `TransactionAborted`.
    pub fn abort_commits(&self, n: u32) -> &Self {
        self.inner.lock().aborts += n;
        self
    }

    /// Fails the next `n` commits with `UniqueConstraint`, after any
    /// scripted aborts.
    pub fn collide_commits(&self, n: u32) -> &Self {
        self.inner.lock().collisions += n;
        self
    }

    /// Returns how many failures were injected so far.
    pub fn injected(&self) -> u32 {
        self.inner.lock().injected
    }

    fn next_fault(&self) -> Option<AdapterError> {
        let mut state = self.inner.lock();
        let fault = if state.aborts > 0 {
            state.aborts -= 1;
            AdapterError::TransactionAborted("injected abort".to_string())
        } else if state.collisions > 0 {
            state.collisions -= 1;
            AdapterError::UniqueConstraint("injected collision".to_string())
        } else {
            return None;
        };
        state.injected += 1;
        Some(fault)
    }
}

/// Adapter decorator failing commits according to a [`FaultPlan`].
pub struct FaultyAdapter<A> {
    inner: A,
    plan: FaultPlan,
}

impl<A: StorageAdapter> FaultyAdapter<A> {
    /// Wraps `inner`.
    pub fn new(inner: A, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }

    /// Returns the wrapped adapter.
    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: StorageAdapter> StorageAdapter for FaultyAdapter<A> {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    fn isolation(&self) -> IsolationLevel {
        self.inner.isolation()
    }

    fn metadata_suffix(&self) -> &str {
        self.inner.metadata_suffix()
    }

    fn ensure_metadata_schema(&mut self, scope: Role) -> AdapterResult<()> {
        self.inner.ensure_metadata_schema(scope)
    }

    fn scope(&self) -> AdapterResult<Option<Role>> {
        self.inner.scope()
    }

    fn ensure_metadata_table(&mut self, table: &str) -> AdapterResult<()> {
        self.inner.ensure_metadata_table(table)
    }

    fn metadata_table_exists(&self, table: &str) -> AdapterResult<bool> {
        self.inner.metadata_table_exists(table)
    }

    fn next_revision(&mut self) -> AdapterResult<Revision> {
        self.inner.next_revision()
    }

    fn last_revision(&self) -> AdapterResult<Revision> {
        self.inner.last_revision()
    }

    fn set_last_revision(&mut self, revision: Revision) -> AdapterResult<()> {
        self.inner.set_last_revision(revision)
    }

    fn table_revision(&self, table: &str) -> AdapterResult<Revision> {
        self.inner.table_revision(table)
    }

    fn changes_since(&self, table: &str, since: Revision) -> AdapterResult<ChangeStream<'_>> {
        self.inner.changes_since(table, since)
    }

    fn changes_by_dirty_flag(&self, table: &str) -> AdapterResult<ChangeStream<'_>> {
        self.inner.changes_by_dirty_flag(table)
    }

    fn deleted_rows(&self, table: &str) -> AdapterResult<ChangeStream<'_>> {
        self.inner.deleted_rows(table)
    }

    fn all_rows(&self, table: &str) -> AdapterResult<RowStream<'_>> {
        self.inner.all_rows(table)
    }

    fn row_by_key(&self, table: &str, key: &PrimaryKey) -> AdapterResult<Option<Row>> {
        self.inner.row_by_key(table, key)
    }

    fn metadata(&self, table: &str, key: &PrimaryKey) -> AdapterResult<Option<MetadataEntry>> {
        self.inner.metadata(table, key)
    }

    fn metadata_entries(&self, table: &str) -> AdapterResult<Vec<MetadataEntry>> {
        self.inner.metadata_entries(table)
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn begin(&mut self) -> AdapterResult<()> {
        self.inner.begin()
    }

    fn upsert_metadata(&mut self, entry: &MetadataEntry, dirty: bool) -> AdapterResult<()> {
        self.inner.upsert_metadata(entry, dirty)
    }

    fn upsert_row(&mut self, table: &str, key: &PrimaryKey, data: &Row) -> AdapterResult<()> {
        self.inner.upsert_row(table, key, data)
    }

    fn delete_row(&mut self, table: &str, key: &PrimaryKey) -> AdapterResult<()> {
        self.inner.delete_row(table, key)
    }

    fn advance_revision(
        &mut self,
        table: &str,
        key: &PrimaryKey,
        revision: Revision,
    ) -> AdapterResult<()> {
        self.inner.advance_revision(table, key, revision)
    }

    fn commit(&mut self) -> AdapterResult<()> {
        if !self.inner.in_transaction() {
            return Err(AdapterError::NoTransaction);
        }
        if let Some(fault) = self.plan.next_fault() {
            self.inner.rollback()?;
            return Err(fault);
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> AdapterResult<()> {
        self.inner.rollback()
    }

    fn primary_key_column(&self, table: &str) -> AdapterResult<String> {
        self.inner.primary_key_column(table)
    }

    fn column_names(&self, table: &str) -> AdapterResult<Vec<String>> {
        self.inner.column_names(table)
    }

    fn current_schema(&self) -> AdapterResult<Schema> {
        self.inner.current_schema()
    }

    fn schema_for(&self, tables: &[String]) -> AdapterResult<Schema> {
        self.inner.schema_for(tables)
    }

    fn apply_schema(&mut self, schema: &Schema) -> AdapterResult<()> {
        self.inner.apply_schema(schema)
    }

    fn has_schema(&self) -> AdapterResult<bool> {
        self.inner.has_schema()
    }
}
