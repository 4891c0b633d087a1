//! Detection of application writes.

use crate::error::CoreResult;
use crate::settings::SyncSettings;
use crate::transaction::run_in_transaction;
use rowsync_protocol::{MetadataEntry, PrimaryKey, Role};
use rowsync_storage::StorageAdapter;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Counts of changes found by [`ChangeTracker::detect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectedChanges {
    /// Rows without metadata.
    pub inserted: usize,
    /// Rows whose fingerprint moved.
    pub updated: usize,
    /// Metadata entries whose row is gone.
    pub deleted: usize,
}

impl DetectedChanges {
    /// Returns the total number of detected changes.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Records application writes in metadata.
///
/// Applications write to their tables directly. The tracker fingerprints
/// every row of each participating table and compares the result with the
/// metadata: unknown rows are inserts, moved fingerprints are updates and
/// live metadata without a row is a delete. A server stamps each change
/// with a new revision; a client flags it dirty and keeps its revision.
#[derive(Debug, Clone, Copy)]
pub struct ChangeTracker<'a> {
    settings: &'a SyncSettings,
}

impl<'a> ChangeTracker<'a> {
    /// Creates a tracker.
    pub fn new(settings: &'a SyncSettings) -> Self {
        Self { settings }
    }

    /// Scans the participating tables and records what changed.
    pub fn detect(
        &self,
        adapter: &mut dyn StorageAdapter,
        role: Role,
    ) -> CoreResult<DetectedChanges> {
        let found = run_in_transaction(adapter, self.settings.max_commit_attempts, |a| {
            self.detect_in(a, role)
        })?;
        if found.total() > 0 {
            info!(
                %role,
                inserted = found.inserted,
                updated = found.updated,
                deleted = found.deleted,
                "recorded local changes"
            );
        }
        Ok(found)
    }

    /// Like [`ChangeTracker::detect`], but inside the caller's open
    /// transaction.
    pub fn detect_in(&self, adapter: &mut dyn StorageAdapter, role: Role) -> CoreResult<DetectedChanges> {
        let fingerprinter = self.settings.fingerprinter();
        let mut found = DetectedChanges::default();
        let mut pending = Vec::new();

        for table in self.settings.tables() {
            let known: BTreeMap<PrimaryKey, MetadataEntry> = adapter
                .metadata_entries(table)?
                .into_iter()
                .map(|e| (e.primary_key.clone(), e))
                .collect();
            let previous = |key: &PrimaryKey| known.get(key).map_or(0, |m| m.revision);

            let mut seen = BTreeSet::new();
            for item in adapter.all_rows(table)? {
                let (key, row) = item?;
                let fingerprint = fingerprinter.fingerprint(&row);
                seen.insert(key.clone());
                match known.get(&key) {
                    None => found.inserted += 1,
                    Some(meta) if !meta.exists || meta.fingerprint != fingerprint => {
                        found.updated += 1
                    }
                    Some(_) => continue,
                }
                let revision = previous(&key);
                pending.push(MetadataEntry::live(table.as_str(), key, revision, fingerprint));
            }
            for meta in known.values() {
                if meta.exists && !seen.contains(&meta.primary_key) {
                    found.deleted += 1;
                    pending.push(MetadataEntry::tombstone(
                        table.as_str(),
                        meta.primary_key.clone(),
                        meta.revision,
                    ));
                }
            }
        }

        for entry in pending {
            match role {
                Role::Server => {
                    let revision = adapter.next_revision()?;
                    adapter.upsert_metadata(&entry.with_revision(revision), false)?;
                }
                Role::Client => adapter.upsert_metadata(&entry, true)?,
            }
        }
        debug!(%role, total = found.total(), "change detection finished");
        Ok(found)
    }

    /// Flags every known local row dirty so the next run offers all of it.
    pub fn mark_all_dirty(&self, adapter: &mut dyn StorageAdapter) -> CoreResult<usize> {
        run_in_transaction(adapter, self.settings.max_commit_attempts, |a| {
            let mut marked = 0;
            for table in self.settings.tables() {
                for entry in a.metadata_entries(table)? {
                    a.upsert_metadata(&entry, true)?;
                    marked += 1;
                }
            }
            Ok(marked)
        })
    }
}
