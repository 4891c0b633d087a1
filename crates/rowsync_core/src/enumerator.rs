//! Change enumeration.

use crate::error::CoreResult;
use rowsync_protocol::{ChangeSet, Revision, Role, SyncStrategies};
use rowsync_storage::StorageAdapter;
use tracing::debug;

/// What to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enumeration {
    /// Rows whose revision is above `since`.
    Incremental {
        /// The receiver's last known revision.
        since: Revision,
    },
    /// Rows flagged dirty, regardless of revision.
    Full,
}

/// Builds the change set one party offers the other.
#[derive(Debug, Clone, Copy)]
pub struct ChangeEnumerator<'a> {
    strategies: &'a SyncStrategies,
}

impl<'a> ChangeEnumerator<'a> {
    /// Creates an enumerator.
    pub fn new(strategies: &'a SyncStrategies) -> Self {
        Self { strategies }
    }

    /// Enumerates the changes a party playing `origin` may send.
    ///
    /// Only tables whose direction permits outbound flow from `origin` are
    /// visited. The set is stamped with `last_revision()` read before any
    /// metadata, so a change committed during enumeration is caught by the
    /// receiver's staleness check.
    pub fn enumerate(
        &self,
        adapter: &dyn StorageAdapter,
        origin: Role,
        mode: Enumeration,
    ) -> CoreResult<ChangeSet> {
        let revision = adapter.last_revision()?;
        let mut changes = Vec::new();
        for table in self.strategies.outbound_tables(origin) {
            let stream = match mode {
                Enumeration::Incremental { since } => adapter.changes_since(table, since)?,
                Enumeration::Full => adapter.changes_by_dirty_flag(table)?,
            };
            for change in stream {
                changes.push(change?);
            }
        }
        debug!(%origin, ?mode, revision, count = changes.len(), "enumerated changes");
        Ok(ChangeSet::new(revision, changes))
    }

    /// Server changes newer than the client's anchor.
    pub fn server_changes(&self, adapter: &dyn StorageAdapter, since: Revision) -> CoreResult<ChangeSet> {
        self.enumerate(adapter, Role::Server, Enumeration::Incremental { since })
    }

    /// Dirty client changes. The set's revision is the client's anchor.
    pub fn client_changes(&self, adapter: &dyn StorageAdapter) -> CoreResult<ChangeSet> {
        self.enumerate(adapter, Role::Client, Enumeration::Full)
    }
}
