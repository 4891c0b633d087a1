//! Storage adapter trait definition.

use crate::error::AdapterResult;
use rowsync_protocol::{Change, MetadataEntry, PrimaryKey, Revision, Role, Row, Schema};

/// Transaction isolation an adapter runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsolationLevel {
    /// Committed reads only; concurrent commits may interleave.
    ReadCommitted,
    /// Transactions behave as if run one after another.
    Serializable,
}

/// A backend participating in synchronization.
///
/// Adapters expose revision and metadata semantics over a concrete store.
/// Each adapter owns one connection; transactions never outlive the
/// adapter that opened them.
///
/// # Invariants
///
/// - Mutations (`next_revision`, `upsert_*`, `delete_row`,
///   `advance_revision`) fail with [`crate::AdapterError::NoTransaction`]
///   outside a transaction opened by [`StorageAdapter::begin`]
/// - `next_revision` values are unique across concurrently committing
///   adapters over the same store; uniqueness comes from the backend's
///   isolation, so a losing transaction fails on commit
/// - The revision counter only moves forward
/// - Streams read metadata when created and fetch row payloads on demand
///
/// # Implementors
///
/// - [`super::MemoryAdapter`] - For testing
/// - [`super::SqliteAdapter`] - For persistent storage
pub trait StorageAdapter: Send {
    /// Returns the backend identifier.
    fn backend(&self) -> &'static str;

    /// Returns the isolation level transactions run with.
    fn isolation(&self) -> IsolationLevel;

    /// Returns the suffix used to name metadata tables.
    fn metadata_suffix(&self) -> &str;

    /// Creates the revision store for the given role. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails if the store was already initialized for the other role.
    fn ensure_metadata_schema(&mut self, scope: Role) -> AdapterResult<()>;

    /// Returns the role the store was initialized for, if any.
    fn scope(&self) -> AdapterResult<Option<Role>>;

    /// Creates the metadata table for `table`. Idempotent.
    fn ensure_metadata_table(&mut self, table: &str) -> AdapterResult<()>;

    /// Returns true if the metadata table for `table` exists.
    fn metadata_table_exists(&self, table: &str) -> AdapterResult<bool>;

    /// Increments the revision counter and returns the new value.
    ///
    /// Only valid inside a transaction the caller will commit.
    fn next_revision(&mut self) -> AdapterResult<Revision>;

    /// Returns the current revision counter.
    ///
    /// On a server this is the global revision. On a client it is the sync
    /// anchor: the last server revision the client fully reconciled with.
    fn last_revision(&self) -> AdapterResult<Revision>;

    /// Moves the revision counter forward to `revision`.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::AdapterError::Backend`] if `revision` is lower
    /// than the current counter.
    fn set_last_revision(&mut self, revision: Revision) -> AdapterResult<()>;

    /// Returns the highest metadata revision recorded for `table`, or 0.
    fn table_revision(&self, table: &str) -> AdapterResult<Revision>;

    /// Streams changes of `table` with a revision greater than `since`.
    fn changes_since(&self, table: &str, since: Revision) -> AdapterResult<ChangeStream<'_>>;

    /// Streams changes of `table` marked dirty, regardless of revision.
    fn changes_by_dirty_flag(&self, table: &str) -> AdapterResult<ChangeStream<'_>>;

    /// Streams the tombstones of `table`.
    fn deleted_rows(&self, table: &str) -> AdapterResult<ChangeStream<'_>>;

    /// Streams every live row of `table` with its key.
    fn all_rows(&self, table: &str) -> AdapterResult<RowStream<'_>>;

    /// Reads one row by primary key.
    fn row_by_key(&self, table: &str, key: &PrimaryKey) -> AdapterResult<Option<Row>>;

    /// Reads the metadata entry for one row.
    fn metadata(&self, table: &str, key: &PrimaryKey) -> AdapterResult<Option<MetadataEntry>>;

    /// Reads every metadata entry of `table`.
    fn metadata_entries(&self, table: &str) -> AdapterResult<Vec<MetadataEntry>>;

    /// Returns true while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Opens a transaction.
    fn begin(&mut self) -> AdapterResult<()>;

    /// Inserts or replaces the metadata entry for a row.
    fn upsert_metadata(&mut self, entry: &MetadataEntry, dirty: bool) -> AdapterResult<()>;

    /// Inserts or replaces a row. The key column is set from `key`.
    fn upsert_row(&mut self, table: &str, key: &PrimaryKey, data: &Row) -> AdapterResult<()>;

    /// Deletes a row. Deleting a missing row is not an error.
    fn delete_row(&mut self, table: &str, key: &PrimaryKey) -> AdapterResult<()>;

    /// Sets a row's metadata revision and clears its dirty flag.
    fn advance_revision(
        &mut self,
        table: &str,
        key: &PrimaryKey,
        revision: Revision,
    ) -> AdapterResult<()>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// - [`crate::AdapterError::TransactionAborted`] on a serialization failure
    /// - [`crate::AdapterError::UniqueConstraint`] on a key collision
    ///
    /// Both leave the transaction rolled back and may be retried.
    fn commit(&mut self) -> AdapterResult<()>;

    /// Rolls back the open transaction. A no-op without one.
    fn rollback(&mut self) -> AdapterResult<()>;

    /// Returns the primary key column of `table`.
    fn primary_key_column(&self, table: &str) -> AdapterResult<String>;

    /// Returns the column names of `table` in declaration order.
    fn column_names(&self, table: &str) -> AdapterResult<Vec<String>>;

    /// Returns the schema of all application tables.
    ///
    /// Tables the adapter cannot describe are left out.
    fn current_schema(&self) -> AdapterResult<Schema>;

    /// Returns the schema of the named tables that exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AdapterError::SchemaConversion`] if a named table
    /// cannot be described.
    fn schema_for(&self, tables: &[String]) -> AdapterResult<Schema> {
        Ok(self.current_schema()?.subset(tables.iter().map(String::as_str)))
    }

    /// Creates the tables of `schema` that do not exist yet.
    fn apply_schema(&mut self, schema: &Schema) -> AdapterResult<()>;

    /// Returns true if at least one application table exists.
    fn has_schema(&self) -> AdapterResult<bool>;
}

/// Lazy, single-pass stream of changes.
///
/// Metadata is read when the stream is created; each row payload is
/// fetched as the stream is consumed. A live entry whose row vanished in
/// between is yielded as a tombstone.
pub struct ChangeStream<'a> {
    source: &'a dyn StorageAdapter,
    entries: std::vec::IntoIter<MetadataEntry>,
}

impl<'a> ChangeStream<'a> {
    /// Creates a stream over `entries`, fetching payloads from `source`.
    pub fn new(source: &'a dyn StorageAdapter, entries: Vec<MetadataEntry>) -> Self {
        Self {
            source,
            entries: entries.into_iter(),
        }
    }

    /// Collects the remaining changes.
    pub fn collect_changes(self) -> AdapterResult<Vec<Change>> {
        self.collect()
    }
}

impl Iterator for ChangeStream<'_> {
    type Item = AdapterResult<Change>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        if entry.is_tombstone() {
            return Some(Ok(Change::delete(entry)));
        }
        let change = self
            .source
            .row_by_key(&entry.table, &entry.primary_key)
            .map(|row| match row {
                Some(data) => Change::upsert(entry, data),
                None => Change::delete(MetadataEntry::tombstone(
                    entry.table,
                    entry.primary_key,
                    entry.revision,
                )),
            });
        Some(change)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

/// Lazy, single-pass stream of live rows with their keys.
pub struct RowStream<'a> {
    source: &'a dyn StorageAdapter,
    table: String,
    keys: std::vec::IntoIter<PrimaryKey>,
}

impl<'a> RowStream<'a> {
    /// Creates a stream over `keys` of `table`.
    pub fn new(source: &'a dyn StorageAdapter, table: &str, keys: Vec<PrimaryKey>) -> Self {
        Self {
            source,
            table: table.to_string(),
            keys: keys.into_iter(),
        }
    }
}

impl Iterator for RowStream<'_> {
    type Item = AdapterResult<(PrimaryKey, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            match self.source.row_by_key(&self.table, &key) {
                Ok(Some(row)) => return Some(Ok((key, row))),
                // Deleted since the key scan.
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.keys.size_hint().1)
    }
}
