//! Change application.

use crate::conflict::RowRef;
use crate::error::{CoreError, CoreResult};
use crate::settings::SyncSettings;
use crate::tracker::ChangeTracker;
use crate::transaction::run_in_transaction;
use rowsync_protocol::{Change, ChangeSet, MetadataEntry, Revision, Role};
use rowsync_storage::StorageAdapter;
use tracing::{debug, info};

/// Applies change sets, all or nothing.
#[derive(Debug, Clone, Copy)]
pub struct ChangeApplier<'a> {
    settings: &'a SyncSettings,
}

impl<'a> ChangeApplier<'a> {
    /// Creates an applier.
    pub fn new(settings: &'a SyncSettings) -> Self {
        Self { settings }
    }

    /// Applies a client's set on the server.
    ///
    /// `basis` is the server revision the client reconciled against. If any
    /// participating table has moved past it the whole set is rejected with
    /// [`CoreError::Stale`]. Otherwise every change receives a fresh
    /// revision and the post-commit revision is returned.
    ///
    /// With change detection enabled, application writes are recorded in
    /// the same transaction before the check, so a write that landed after
    /// the client's fetch makes the set stale.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidChange`] for a table that does not participate
    ///   or does not accept client changes
    /// - [`CoreError::Stale`] if the basis is out of date
    /// - [`CoreError::Adapter`] once commit retries are used up
    pub fn apply_remote_set(
        &self,
        adapter: &mut dyn StorageAdapter,
        set: &ChangeSet,
        basis: Revision,
    ) -> CoreResult<Revision> {
        let strategies = &self.settings.strategies;
        for change in set {
            let table = change.table();
            if !strategies.contains(table) {
                return Err(CoreError::InvalidChange(format!(
                    "table {table} does not participate"
                )));
            }
            if !strategies.for_table(table).direction.allows_from(Role::Client) {
                return Err(CoreError::InvalidChange(format!(
                    "table {table} does not accept client changes"
                )));
            }
        }

        let tracker = ChangeTracker::new(self.settings);
        let revision = run_in_transaction(adapter, self.settings.max_commit_attempts, |a| {
            if self.settings.detect_changes {
                tracker.detect_in(a, Role::Server)?;
            }
            for table in strategies.tables() {
                let current = a.table_revision(table)?;
                if current > basis {
                    debug!(table = table.as_str(), basis, current, "rejecting stale set");
                    return Err(CoreError::Stale {
                        table: table.clone(),
                        basis,
                        current,
                    });
                }
            }
            for change in set {
                let revision = a.next_revision()?;
                self.write_change(a, change, revision)?;
            }
            Ok(a.last_revision()?)
        })?;
        info!(count = set.len(), basis, revision, "applied remote change set");
        Ok(revision)
    }

    /// Applies the server's changes on the client and moves the anchor.
    ///
    /// Rows in `settled` are marked clean at `anchor`. The changes in
    /// `to_client` are written afterwards with their server revisions, so
    /// a row that is in both ends up carrying the server's revision.
    pub fn apply_local_set(
        &self,
        adapter: &mut dyn StorageAdapter,
        to_client: &ChangeSet,
        settled: &[RowRef],
        anchor: Revision,
    ) -> CoreResult<Revision> {
        let revision = run_in_transaction(adapter, self.settings.max_commit_attempts, |a| {
            for row in settled {
                a.advance_revision(&row.table, &row.primary_key, anchor)?;
            }
            for change in to_client {
                self.write_change(a, change, change.entry.revision)?;
            }
            if anchor > a.last_revision()? {
                a.set_last_revision(anchor)?;
            }
            Ok(a.last_revision()?)
        })?;
        info!(
            received = to_client.len(),
            settled = settled.len(),
            anchor = revision,
            "applied local change set"
        );
        Ok(revision)
    }

    /// Writes one change and its clean metadata.
    ///
    /// The fingerprint is taken from the stored row so that it matches what
    /// change detection computes later.
    fn write_change(
        &self,
        adapter: &mut dyn StorageAdapter,
        change: &Change,
        revision: Revision,
    ) -> CoreResult<()> {
        let (table, key) = (change.table(), change.key());
        let Some(data) = change.data.as_ref() else {
            adapter.delete_row(table, key)?;
            adapter.upsert_metadata(&MetadataEntry::tombstone(table, key.clone(), revision), false)?;
            return Ok(());
        };
        adapter.upsert_row(table, key, data)?;
        let stored = adapter.row_by_key(table, key)?.ok_or_else(|| {
            CoreError::InvalidChange(format!("row {table}:{key} vanished after write"))
        })?;
        let fingerprint = self.settings.fingerprinter().fingerprint(&stored);
        adapter.upsert_metadata(&MetadataEntry::live(table, key.clone(), revision, fingerprint), false)?;
        Ok(())
    }
}
