//! Conflict resolution.
//!
//! [`ConflictEngine::reconcile`] merges the client's and the server's change
//! sets key by key:
//!
//! - a key offered by one side only passes through to the other side, if
//!   the table's direction lets that side send;
//! - a key offered by both sides with the same content is dropped;
//! - anything else is a conflict settled by the table's
//!   [`ConflictPolicy`].
//!
//! Interactive conflicts are put to a [`ConflictDecider`]. The decider is
//! called synchronously and may block for as long as it likes.

use crate::fingerprint::Fingerprinter;
use rowsync_protocol::{
    Change, ChangeSet, Conflict, ConflictPolicy, Decision, MetadataEntry, PrimaryKey,
    ReconciledChangeSets, ResolutionKind, Role, Row, SyncStrategies,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use tracing::{debug, info, warn};

/// Answers interactive conflicts.
///
/// # Implementors
///
/// - [`ChannelDecider`] forwards conflicts to another thread
/// - any `Fn(&Conflict) -> Decision + Send` closure
pub trait ConflictDecider: Send {
    /// Decides one conflict. Blocking is allowed.
    fn decide(&self, conflict: &Conflict) -> Decision;
}

impl<F> ConflictDecider for F
where
    F: Fn(&Conflict) -> Decision + Send,
{
    fn decide(&self, conflict: &Conflict) -> Decision {
        self(conflict)
    }
}

/// A conflict waiting for an answer on another thread.
#[derive(Debug)]
pub struct ConflictRequest {
    /// The conflict to decide.
    pub conflict: Conflict,
    reply: SyncSender<Decision>,
}

impl ConflictRequest {
    /// Sends the answer back to the waiting engine.
    pub fn respond(self, decision: Decision) {
        // The engine may have given up; nothing to do then.
        let _ = self.reply.send(decision);
    }
}

/// Forwards each conflict over a channel and blocks on a single-use reply.
///
/// Dropping a [`ConflictRequest`] without responding, or dropping the
/// receiver, counts as [`Decision::Cancel`].
#[derive(Debug, Clone)]
pub struct ChannelDecider {
    requests: Sender<ConflictRequest>,
}

impl ChannelDecider {
    /// Creates a decider and the receiver the answering side reads from.
    pub fn new() -> (Self, Receiver<ConflictRequest>) {
        let (requests, rx) = mpsc::channel();
        (Self { requests }, rx)
    }
}

impl ConflictDecider for ChannelDecider {
    fn decide(&self, conflict: &Conflict) -> Decision {
        let (reply, answer) = mpsc::sync_channel(1);
        let request = ConflictRequest {
            conflict: conflict.clone(),
            reply,
        };
        if self.requests.send(request).is_err() {
            return Decision::Cancel;
        }
        answer.recv().unwrap_or(Decision::Cancel)
    }
}

/// A row identified by table and key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowRef {
    /// Table name.
    pub table: String,
    /// Primary key.
    pub primary_key: PrimaryKey,
}

impl RowRef {
    /// Creates a row reference.
    pub fn new(table: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            table: table.into(),
            primary_key,
        }
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.primary_key)
    }
}

/// One settled conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConflict {
    /// Table name.
    pub table: String,
    /// Primary key.
    pub primary_key: PrimaryKey,
    /// Policy that applied.
    pub policy: ConflictPolicy,
    /// Outcome.
    pub resolution: ResolutionKind,
}

/// Every conflict settled by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictReport {
    /// Settled conflicts in key order.
    pub conflicts: Vec<ResolvedConflict>,
}

impl ConflictReport {
    /// Returns the number of conflicts.
    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    /// Returns true if no conflict occurred.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Result of [`ConflictEngine::reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// What each side still has to apply.
    pub change_sets: ReconciledChangeSets,
    /// Conflicts and their outcome.
    pub report: ConflictReport,
    /// Client rows the merge accounts for. Once the server set is applied
    /// they are clean at the new anchor.
    pub settled: Vec<RowRef>,
}

/// Merges two change sets into per-side apply sets.
pub struct ConflictEngine<'a> {
    strategies: &'a SyncStrategies,
    fingerprinter: Fingerprinter,
    decider: Option<&'a dyn ConflictDecider>,
}

impl fmt::Debug for ConflictEngine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictEngine")
            .field("strategies", self.strategies)
            .field("fingerprinter", &self.fingerprinter)
            .field("decider", &self.decider.is_some())
            .finish()
    }
}

enum Outcome {
    Server,
    Client,
    Edited(Row),
}

impl<'a> ConflictEngine<'a> {
    /// Creates an engine without a decider.
    pub fn new(strategies: &'a SyncStrategies, fingerprinter: Fingerprinter) -> Self {
        Self {
            strategies,
            fingerprinter,
            decider: None,
        }
    }

    /// Sets the decider used for interactive tables.
    #[must_use]
    pub fn with_decider(mut self, decider: &'a dyn ConflictDecider) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Reconciles the client's dirty changes with the server's changes.
    ///
    /// `to_server` keeps the client set's revision and `to_client` the
    /// server set's revision.
    pub fn reconcile(&self, client: &ChangeSet, server: &ChangeSet) -> Reconciliation {
        let mut pairs: BTreeMap<(&str, &PrimaryKey), (Option<&Change>, Option<&Change>)> =
            BTreeMap::new();
        for change in client {
            pairs.entry((change.table(), change.key())).or_default().0 = Some(change);
        }
        for change in server {
            pairs.entry((change.table(), change.key())).or_default().1 = Some(change);
        }

        let mut to_server = Vec::new();
        let mut to_client = Vec::new();
        let mut report = ConflictReport::default();
        let settled = client
            .iter()
            .filter(|c| self.strategies.contains(c.table()))
            .map(|c| RowRef::new(c.table(), c.key().clone()))
            .collect();

        for ((table, _), (local, remote)) in pairs {
            if !self.strategies.contains(table) {
                continue;
            }
            let strategy = self.strategies.for_table(table);
            match (local, remote) {
                (Some(local), None) => {
                    if strategy.direction.allows_from(Role::Client) {
                        to_server.push(local.clone());
                    }
                }
                (None, Some(remote)) => {
                    if strategy.direction.allows_from(Role::Server) {
                        to_client.push(remote.clone());
                    }
                }
                (Some(local), Some(remote)) => {
                    if consistent(local, remote) {
                        continue;
                    }
                    let policy = strategy.conflict_policy;
                    let resolution = match self.resolve(policy, local, remote) {
                        Outcome::Server => {
                            to_client.push(remote.clone());
                            ResolutionKind::ServerWins
                        }
                        Outcome::Client => {
                            to_server.push(local.clone());
                            ResolutionKind::ClientWins
                        }
                        Outcome::Edited(row) => {
                            let fingerprint = self.fingerprinter.fingerprint(&row);
                            let entry = MetadataEntry::live(
                                table,
                                remote.key().clone(),
                                remote.entry.revision,
                                fingerprint,
                            );
                            let edited = Change::upsert(entry, row);
                            to_server.push(edited.clone());
                            to_client.push(edited);
                            ResolutionKind::UserEdit
                        }
                    };
                    info!(table, key = %remote.key(), ?policy, ?resolution, "conflict resolved");
                    report.conflicts.push(ResolvedConflict {
                        table: table.to_string(),
                        primary_key: remote.key().clone(),
                        policy,
                        resolution,
                    });
                }
                (None, None) => {}
            }
        }

        debug!(
            to_server = to_server.len(),
            to_client = to_client.len(),
            conflicts = report.len(),
            "reconciled change sets"
        );
        Reconciliation {
            change_sets: ReconciledChangeSets {
                to_server: ChangeSet::new(client.revision(), to_server),
                to_client: ChangeSet::new(server.revision(), to_client),
            },
            report,
            settled,
        }
    }

    fn resolve(&self, policy: ConflictPolicy, local: &Change, remote: &Change) -> Outcome {
        match policy {
            ConflictPolicy::ServerWins => Outcome::Server,
            ConflictPolicy::ClientWins => Outcome::Client,
            ConflictPolicy::Interactive => {
                let Some(decider) = self.decider else {
                    warn!(
                        table = remote.table(),
                        key = %remote.key(),
                        "interactive conflict without a decider, keeping the server version"
                    );
                    return Outcome::Server;
                };
                let conflict = Conflict::new(local.clone(), remote.clone());
                match decider.decide(&conflict) {
                    Decision::UseServer | Decision::Cancel => Outcome::Server,
                    Decision::UseClient => Outcome::Client,
                    Decision::UseEdited(row) => Outcome::Edited(row),
                }
            }
        }
    }
}

/// Both sides already hold the same content for the key.
fn consistent(local: &Change, remote: &Change) -> bool {
    match (local.is_delete(), remote.is_delete()) {
        (true, true) => true,
        (false, false) => {
            (!local.fingerprint().is_empty() && local.fingerprint() == remote.fingerprint())
                || local.data == remote.data
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{row_from, SyncDirection, TableSyncStrategy, Value};
    use std::thread;

    fn upsert(table: &str, id: i64, name: &str, revision: u64) -> Change {
        let row = row_from([("id", Value::from(id)), ("name", Value::from(name))]);
        let fp = Fingerprinter::default().fingerprint(&row);
        Change::upsert(MetadataEntry::live(table, id, revision, fp), row)
    }

    fn delete(table: &str, id: i64, revision: u64) -> Change {
        Change::delete(MetadataEntry::tombstone(table, id, revision))
    }

    fn strategies(policy: ConflictPolicy) -> SyncStrategies {
        SyncStrategies::new(["categories"])
            .with_default(TableSyncStrategy::new(SyncDirection::Bidirectional, policy))
    }

    #[test]
    fn one_sided_changes_pass_through() {
        let s = strategies(ConflictPolicy::ServerWins);
        let engine = ConflictEngine::new(&s, Fingerprinter::default());
        let client = ChangeSet::new(4, vec![upsert("categories", 1, "Beverages", 0)]);
        let server = ChangeSet::new(9, vec![upsert("categories", 2, "Condiments", 9)]);

        let r = engine.reconcile(&client, &server);
        assert_eq!(r.change_sets.to_server.len(), 1);
        assert_eq!(r.change_sets.to_server.revision(), 4);
        assert_eq!(r.change_sets.to_client.len(), 1);
        assert_eq!(r.change_sets.to_client.revision(), 9);
        assert!(r.report.is_empty());
        assert_eq!(r.settled, vec![RowRef::new("categories", 1.into())]);
    }

    #[test]
    fn equal_content_is_dropped() {
        let s = strategies(ConflictPolicy::ClientWins);
        let engine = ConflictEngine::new(&s, Fingerprinter::default());
        let client = ChangeSet::new(0, vec![upsert("categories", 1, "Beverages", 0)]);
        let server = ChangeSet::new(3, vec![upsert("categories", 1, "Beverages", 3)]);

        let r = engine.reconcile(&client, &server);
        assert!(r.change_sets.is_empty());
        assert!(r.report.is_empty());
        assert_eq!(r.settled.len(), 1);
    }

    #[test]
    fn both_deleted_is_consistent() {
        let s = strategies(ConflictPolicy::ClientWins);
        let engine = ConflictEngine::new(&s, Fingerprinter::default());
        let client = ChangeSet::new(0, vec![delete("categories", 1, 0)]);
        let server = ChangeSet::new(3, vec![delete("categories", 1, 3)]);
        assert!(engine.reconcile(&client, &server).change_sets.is_empty());
    }

    #[test]
    fn server_wins() {
        let s = strategies(ConflictPolicy::ServerWins);
        let engine = ConflictEngine::new(&s, Fingerprinter::default());
        let client = ChangeSet::new(0, vec![upsert("categories", 1, "Drinks", 0)]);
        let server = ChangeSet::new(5, vec![upsert("categories", 1, "Beverages", 5)]);

        let r = engine.reconcile(&client, &server);
        assert!(r.change_sets.to_server.is_empty());
        assert_eq!(r.change_sets.to_client.changes(), server.changes());
        assert_eq!(r.report.conflicts[0].resolution, ResolutionKind::ServerWins);
    }

    #[test]
    fn client_wins_update_delete() {
        let s = strategies(ConflictPolicy::ClientWins);
        let engine = ConflictEngine::new(&s, Fingerprinter::default());
        let client = ChangeSet::new(0, vec![delete("categories", 1, 0)]);
        let server = ChangeSet::new(5, vec![upsert("categories", 1, "Beverages", 5)]);

        let r = engine.reconcile(&client, &server);
        assert_eq!(r.change_sets.to_server.changes(), client.changes());
        assert!(r.change_sets.to_client.is_empty());
        assert_eq!(r.report.conflicts[0].resolution, ResolutionKind::ClientWins);
    }

    #[test]
    fn direction_blocks_client_origin() {
        let s = SyncStrategies::new(["categories"]).with_table(
            "categories",
            TableSyncStrategy::new(SyncDirection::ServerToClient, ConflictPolicy::ServerWins),
        );
        let engine = ConflictEngine::new(&s, Fingerprinter::default());
        let client = ChangeSet::new(0, vec![upsert("categories", 1, "Drinks", 0)]);
        let r = engine.reconcile(&client, &ChangeSet::empty(0));
        assert!(r.change_sets.to_server.is_empty());
    }

    #[test]
    fn unlisted_tables_are_ignored() {
        let s = strategies(ConflictPolicy::ServerWins);
        let engine = ConflictEngine::new(&s, Fingerprinter::default());
        let client = ChangeSet::new(0, vec![upsert("audit", 1, "x", 0)]);
        let r = engine.reconcile(&client, &ChangeSet::empty(0));
        assert!(r.change_sets.is_empty());
        assert!(r.settled.is_empty());
    }

    #[test]
    fn interactive_without_decider_keeps_server() {
        let s = strategies(ConflictPolicy::Interactive);
        let engine = ConflictEngine::new(&s, Fingerprinter::default());
        let client = ChangeSet::new(0, vec![upsert("categories", 1, "Drinks", 0)]);
        let server = ChangeSet::new(5, vec![upsert("categories", 1, "Beverages", 5)]);
        let r = engine.reconcile(&client, &server);
        assert_eq!(r.change_sets.to_client.len(), 1);
        assert!(r.change_sets.to_server.is_empty());
    }

    #[test]
    fn interactive_edit_goes_both_ways() {
        let s = strategies(ConflictPolicy::Interactive);
        let decider = |conflict: &Conflict| {
            assert!(conflict.is_update_conflict());
            Decision::UseEdited(row_from([
                ("id", Value::from(1)),
                ("name", Value::from("Soft drinks")),
            ]))
        };
        let engine = ConflictEngine::new(&s, Fingerprinter::default()).with_decider(&decider);
        let client = ChangeSet::new(0, vec![upsert("categories", 1, "Drinks", 0)]);
        let server = ChangeSet::new(5, vec![upsert("categories", 1, "Beverages", 5)]);

        let r = engine.reconcile(&client, &server);
        let sent = &r.change_sets.to_server.changes()[0];
        let kept = &r.change_sets.to_client.changes()[0];
        assert_eq!(sent, kept);
        assert_eq!(kept.entry.revision, 5);
        assert_eq!(
            kept.data.as_ref().and_then(|d| d.get("name")),
            Some(&Value::from("Soft drinks"))
        );
        assert_eq!(r.report.conflicts[0].resolution, ResolutionKind::UserEdit);
    }

    #[test]
    fn channel_decider_round_trip() {
        let (decider, requests) = ChannelDecider::new();
        let answering = thread::spawn(move || {
            for request in requests {
                assert_eq!(request.conflict.table(), "categories");
                request.respond(Decision::UseClient);
            }
        });

        let s = strategies(ConflictPolicy::Interactive);
        let client = ChangeSet::new(0, vec![upsert("categories", 1, "Drinks", 0)]);
        let server = ChangeSet::new(5, vec![upsert("categories", 1, "Beverages", 5)]);
        let r = {
            let engine = ConflictEngine::new(&s, Fingerprinter::default()).with_decider(&decider);
            engine.reconcile(&client, &server)
        };
        drop(decider);
        answering.join().unwrap();

        assert_eq!(r.change_sets.to_server.len(), 1);
        assert_eq!(r.report.conflicts[0].resolution, ResolutionKind::ClientWins);
    }

    #[test]
    fn dropped_reply_counts_as_cancel() {
        let (decider, requests) = ChannelDecider::new();
        let answering = thread::spawn(move || {
            for request in requests {
                drop(request);
            }
        });
        let conflict = Conflict::new(
            upsert("categories", 1, "Drinks", 0),
            upsert("categories", 1, "Beverages", 5),
        );
        assert_eq!(decider.decide(&conflict), Decision::Cancel);
        drop(decider);
        answering.join().unwrap();
    }
}
