//! Full client/server cycles driven through the core components.

use proptest::prelude::*;
use rowsync_core::{
    ChangeApplier, ChangeEnumerator, ChangeTracker, ConflictEngine, CoreResult, SyncSettings,
};
use rowsync_protocol::{
    row_from, ColumnDef, ColumnType, ConflictPolicy, Role, Row, Schema, SyncDirection,
    SyncStrategies, TableSchema, TableSyncStrategy, Value,
};
use rowsync_storage::{MemoryAdapter, MemoryStore, StorageAdapter};

fn schema() -> Schema {
    Schema::new().with_table(TableSchema::new(
        "categories",
        "id",
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("name", ColumnType::Text).nullable(),
        ],
    ))
}

fn party(role: Role) -> (MemoryStore, MemoryAdapter) {
    let store = MemoryStore::new();
    let mut adapter = store.adapter();
    adapter.apply_schema(&schema()).unwrap();
    adapter.ensure_metadata_schema(role).unwrap();
    adapter.ensure_metadata_table("categories").unwrap();
    (store, adapter)
}

fn category(id: i64, name: &str) -> Row {
    row_from([("id", Value::from(id)), ("name", Value::from(name))])
}

fn settings(policy: ConflictPolicy) -> SyncSettings {
    SyncSettings::new(
        SyncStrategies::new(["categories"])
            .with_default(TableSyncStrategy::new(SyncDirection::Bidirectional, policy)),
    )
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Round {
    sent: usize,
    received: usize,
    anchor: u64,
}

/// One synchronization attempt, without retries.
fn sync(
    settings: &SyncSettings,
    client: &mut MemoryAdapter,
    server: &mut MemoryAdapter,
) -> CoreResult<Round> {
    let tracker = ChangeTracker::new(settings);
    tracker.detect(client, Role::Client)?;
    tracker.detect(server, Role::Server)?;

    let enumerator = ChangeEnumerator::new(&settings.strategies);
    let local = enumerator.client_changes(client)?;
    let remote = enumerator.server_changes(server, local.revision())?;

    let merged = ConflictEngine::new(&settings.strategies, settings.fingerprinter())
        .reconcile(&local, &remote);
    let sets = merged.change_sets;

    let applier = ChangeApplier::new(settings);
    let anchor = if sets.to_server.is_empty() {
        remote.revision()
    } else {
        applier.apply_remote_set(server, &sets.to_server, remote.revision())?
    };
    applier.apply_local_set(client, &sets.to_client, &merged.settled, anchor)?;
    Ok(Round {
        sent: sets.to_server.len(),
        received: sets.to_client.len(),
        anchor,
    })
}

#[test]
fn initial_download() {
    let (server_store, mut server) = party(Role::Server);
    let (client_store, mut client) = party(Role::Client);
    server_store.insert_row("categories", category(1, "Beverages")).unwrap();
    server_store.insert_row("categories", category(2, "Condiments")).unwrap();

    let settings = settings(ConflictPolicy::ServerWins);
    ChangeTracker::new(&settings).detect(&mut server, Role::Server).unwrap();

    let set = ChangeEnumerator::new(&settings.strategies)
        .server_changes(&server, 0)
        .unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.revision(), 2);

    let round = sync(&settings, &mut client, &mut server).unwrap();
    assert_eq!(round, Round { sent: 0, received: 2, anchor: 2 });
    assert_eq!(client.last_revision().unwrap(), 2);
    assert_eq!(client_store.rows("categories"), server_store.rows("categories"));

    let again = sync(&settings, &mut client, &mut server).unwrap();
    assert_eq!(again, Round { sent: 0, received: 0, anchor: 2 });
}

#[test]
fn identical_replicas_stay_put() {
    let (_, mut server) = party(Role::Server);
    let (_, mut client) = party(Role::Client);
    let settings = settings(ConflictPolicy::ServerWins);

    let round = sync(&settings, &mut client, &mut server).unwrap();
    assert_eq!(round, Round::default());
    assert_eq!(server.last_revision().unwrap(), 0);
    assert_eq!(client.last_revision().unwrap(), 0);
}

#[test]
fn upload_then_converge() {
    let (server_store, mut server) = party(Role::Server);
    let (client_store, mut client) = party(Role::Client);
    let settings = settings(ConflictPolicy::ServerWins);
    client_store.insert_row("categories", category(5, "Seafood")).unwrap();

    let round = sync(&settings, &mut client, &mut server).unwrap();
    assert_eq!(round.sent, 1);
    assert_eq!(round.anchor, 1);
    assert_eq!(server_store.rows("categories"), vec![category(5, "Seafood")]);

    let again = sync(&settings, &mut client, &mut server).unwrap();
    assert_eq!(again, Round { sent: 0, received: 0, anchor: 1 });
}

#[test]
fn tombstones_propagate_once() {
    let (server_store, mut server) = party(Role::Server);
    let (client_store, mut client) = party(Role::Client);
    let settings = settings(ConflictPolicy::ServerWins);
    server_store.insert_row("categories", category(1, "Beverages")).unwrap();
    sync(&settings, &mut client, &mut server).unwrap();

    server_store.remove_row("categories", &1.into()).unwrap();
    let round = sync(&settings, &mut client, &mut server).unwrap();
    assert_eq!(round.received, 1);
    assert!(client_store.rows("categories").is_empty());
    let meta = client.metadata("categories", &1.into()).unwrap().unwrap();
    assert!(meta.is_tombstone());

    let again = sync(&settings, &mut client, &mut server).unwrap();
    assert_eq!(again.sent, 0);
    assert_eq!(again.received, 0);
}

#[test]
fn policies_pick_a_winner() {
    for (policy, expected) in [
        (ConflictPolicy::ServerWins, "Beverages"),
        (ConflictPolicy::ClientWins, "Drinks"),
    ] {
        let (server_store, mut server) = party(Role::Server);
        let (client_store, mut client) = party(Role::Client);
        let settings = settings(policy);
        server_store.insert_row("categories", category(1, "Original")).unwrap();
        sync(&settings, &mut client, &mut server).unwrap();

        server_store.insert_row("categories", category(1, "Beverages")).unwrap();
        client_store.insert_row("categories", category(1, "Drinks")).unwrap();
        sync(&settings, &mut client, &mut server).unwrap();

        assert_eq!(server_store.rows("categories"), vec![category(1, expected)]);
        assert_eq!(client_store.rows("categories"), vec![category(1, expected)]);
        let quiet = sync(&settings, &mut client, &mut server).unwrap();
        assert_eq!((quiet.sent, quiet.received), (0, 0));
    }
}

#[test]
fn stale_attempt_then_fresh_retry() {
    let (server_store, mut server) = party(Role::Server);
    let (client_store, mut client) = party(Role::Client);
    let settings = settings(ConflictPolicy::ServerWins);
    client_store.insert_row("categories", category(7, "Grains")).unwrap();

    let tracker = ChangeTracker::new(&settings);
    let enumerator = ChangeEnumerator::new(&settings.strategies);
    tracker.detect(&mut client, Role::Client).unwrap();
    let local = enumerator.client_changes(&client).unwrap();
    let remote = enumerator.server_changes(&server, 0).unwrap();

    // Another client commits in between.
    server_store.insert_row("categories", category(8, "Dairy")).unwrap();
    tracker.detect(&mut server, Role::Server).unwrap();

    let merged = ConflictEngine::new(&settings.strategies, settings.fingerprinter())
        .reconcile(&local, &remote);
    let err = ChangeApplier::new(&settings)
        .apply_remote_set(&mut server, &merged.change_sets.to_server, remote.revision())
        .unwrap_err();
    assert!(err.is_stale());
    assert!(err.is_retryable());

    let round = sync(&settings, &mut client, &mut server).unwrap();
    assert_eq!((round.sent, round.received), (1, 1));
    assert_eq!(client_store.rows("categories"), server_store.rows("categories"));
    assert_eq!(client_store.rows("categories").len(), 2);
}

#[derive(Debug, Clone)]
enum Edit {
    Put(i64, String),
    Remove(i64),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0i64..6, "[a-z]{1,6}").prop_map(|(id, name)| Edit::Put(id, name)),
        (0i64..6).prop_map(Edit::Remove),
    ]
}

fn play(store: &MemoryStore, edits: &[Edit]) {
    for e in edits {
        match e {
            Edit::Put(id, name) => store.insert_row("categories", category(*id, name)).unwrap(),
            Edit::Remove(id) => store.remove_row("categories", &(*id).into()).unwrap(),
        }
    }
}

proptest! {
    #[test]
    fn replicas_converge(
        rounds in prop::collection::vec(
            (prop::collection::vec(edit(), 0..5), prop::collection::vec(edit(), 0..5)),
            1..5,
        ),
        client_wins in any::<bool>(),
    ) {
        let (server_store, mut server) = party(Role::Server);
        let (client_store, mut client) = party(Role::Client);
        let policy = if client_wins { ConflictPolicy::ClientWins } else { ConflictPolicy::ServerWins };
        let settings = settings(policy);

        for (client_edits, server_edits) in &rounds {
            play(&client_store, client_edits);
            play(&server_store, server_edits);
            sync(&settings, &mut client, &mut server).unwrap();
            prop_assert_eq!(client_store.rows("categories"), server_store.rows("categories"));
        }

        let quiet = sync(&settings, &mut client, &mut server).unwrap();
        prop_assert_eq!((quiet.sent, quiet.received), (0, 0));
    }
}
