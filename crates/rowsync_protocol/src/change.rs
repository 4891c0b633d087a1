//! Metadata entries, changes and change sets.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::{PrimaryKey, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A revision number. Monotonically increasing per party.
pub type Revision = u64;

/// Per-row bookkeeping used to detect and order changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Owning table.
    pub table: String,
    /// Row key within the table.
    pub primary_key: PrimaryKey,
    /// Revision at which the row last changed.
    pub revision: Revision,
    /// False once the row has been deleted.
    pub exists: bool,
    /// Content fingerprint, hex encoded. Empty for tombstones.
    pub fingerprint: String,
}

impl MetadataEntry {
    /// Creates an entry for a live row.
    pub fn live(
        table: impl Into<String>,
        primary_key: impl Into<PrimaryKey>,
        revision: Revision,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            revision,
            exists: true,
            fingerprint: fingerprint.into(),
        }
    }

    /// Creates a tombstone entry.
    pub fn tombstone(
        table: impl Into<String>,
        primary_key: impl Into<PrimaryKey>,
        revision: Revision,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            revision,
            exists: false,
            fingerprint: String::new(),
        }
    }

    /// Returns true if this entry records a deletion.
    pub fn is_tombstone(&self) -> bool {
        !self.exists
    }

    /// Returns a copy with the revision replaced.
    #[must_use]
    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }
}

/// A metadata entry plus the row payload it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Metadata for the changed row.
    pub entry: MetadataEntry,
    /// Row payload. Always `None` for tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Row>,
}

impl Change {
    /// Creates a change. The payload is dropped if the entry is a tombstone.
    pub fn new(entry: MetadataEntry, data: Option<Row>) -> Self {
        let data = if entry.exists { data } else { None };
        Self { entry, data }
    }

    /// Creates an upsert change.
    pub fn upsert(entry: MetadataEntry, data: Row) -> Self {
        Self::new(entry, Some(data))
    }

    /// Creates a deletion change.
    pub fn delete(entry: MetadataEntry) -> Self {
        Self::new(entry, None)
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.entry.table
    }

    /// Returns the primary key.
    pub fn key(&self) -> &PrimaryKey {
        &self.entry.primary_key
    }

    /// Returns true if this change deletes the row.
    pub fn is_delete(&self) -> bool {
        self.entry.is_tombstone()
    }

    /// Returns the fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.entry.fingerprint
    }

    pub(crate) fn check(&self) -> ProtocolResult<()> {
        if self.entry.is_tombstone() && self.data.is_some() {
            return Err(ProtocolError::incompatible(format!(
                "tombstone {}:{} carries a payload",
                self.entry.table, self.entry.primary_key
            )));
        }
        if self.entry.exists && self.data.is_none() {
            return Err(ProtocolError::incompatible(format!(
                "live change {}:{} has no payload",
                self.entry.table, self.entry.primary_key
            )));
        }
        if let Some(data) = &self.data {
            if let Some((col, _)) = data.iter().find(|(_, v)| !v.is_finite()) {
                return Err(ProtocolError::incompatible(format!(
                    "column {col} of {}:{} is not a finite number",
                    self.entry.table, self.entry.primary_key
                )));
            }
        }
        Ok(())
    }
}

/// An ordered batch of changes tagged with the revision it brings the
/// receiver up to.
///
/// A change set never contains two changes for the same `(table, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    revision: Revision,
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Creates a change set.
    pub fn new(revision: Revision, changes: Vec<Change>) -> Self {
        Self { revision, changes }
    }

    /// Creates an empty change set at the given revision.
    pub fn empty(revision: Revision) -> Self {
        Self::new(revision, Vec::new())
    }

    /// Returns the revision this set brings the receiver up to.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Returns the changes in order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Consumes the set, returning its changes.
    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }

    /// Returns the number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if the set holds no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Iterates over the changes.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Returns the distinct tables touched by this set.
    pub fn tables(&self) -> BTreeSet<&str> {
        self.changes.iter().map(Change::table).collect()
    }

    /// Finds the change for a row, if present.
    pub fn find(&self, table: &str, key: &PrimaryKey) -> Option<&Change> {
        self.changes
            .iter()
            .find(|c| c.table() == table && c.key() == key)
    }

    /// Verifies structural invariants: unique row keys, tombstones without
    /// payloads, live rows with payloads and finite numbers.
    pub fn check(&self) -> ProtocolResult<()> {
        let mut seen = BTreeSet::new();
        for change in &self.changes {
            change.check()?;
            if !seen.insert((change.table(), change.key())) {
                return Err(ProtocolError::incompatible(format!(
                    "duplicate change for {}:{}",
                    change.table(),
                    change.key()
                )));
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Output of conflict resolution: what each side still has to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledChangeSets {
    /// Changes the server must apply.
    pub to_server: ChangeSet,
    /// Changes the client must apply.
    pub to_client: ChangeSet,
}

impl ReconciledChangeSets {
    /// Returns true if neither side has anything to apply.
    pub fn is_empty(&self) -> bool {
        self.to_server.is_empty() && self.to_client.is_empty()
    }
}
