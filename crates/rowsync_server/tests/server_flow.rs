//! Server requests over JSON against a SQLite database file.

use rowsync_protocol::{
    row_from, Change, ChangeSet, ColumnDef, ColumnType, ErrorKind, JsonCodec, MetadataEntry,
    RequestBody, Schema, SessionToken, SyncRequest, SyncResponse, SyncStrategies, TableSchema,
    Value, STALE_STATUS,
};
use rowsync_server::{ServerConfig, SyncServer};
use rowsync_storage::{AdapterConfig, AdapterRegistry, SqliteAdapter, StorageAdapter};
use tempfile::TempDir;

fn schema() -> Schema {
    Schema::new().with_table(TableSchema::new(
        "categories",
        "id",
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("name", ColumnType::Text),
        ],
    ))
}

struct Fixture {
    _dir: TempDir,
    config: AdapterConfig,
    server: SyncServer,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = AdapterConfig::sqlite(dir.path().join("server.db"));
        let registry = AdapterRegistry::with_defaults();
        registry.open(&config).unwrap().apply_schema(&schema()).unwrap();
        let server = SyncServer::from_registry(ServerConfig::default(), &registry, &config).unwrap();
        Self {
            _dir: dir,
            config,
            server,
        }
    }

    /// Writes a row the way an application would, without metadata.
    fn app_write(&self, id: i64, name: &str) {
        let mut adapter = AdapterRegistry::with_defaults().open(&self.config).unwrap();
        adapter.begin().unwrap();
        adapter
            .upsert_row(
                "categories",
                &id.into(),
                &row_from([("id", Value::from(id)), ("name", Value::from(name))]),
            )
            .unwrap();
        adapter.commit().unwrap();
    }

    fn send(&self, session: &str, body: RequestBody) -> SyncResponse {
        let bytes = SyncRequest::new(SessionToken::new(session), body)
            .encode()
            .unwrap();
        SyncResponse::decode(&self.server.handle_json(&bytes)).unwrap()
    }

    fn open_session(&self, session: &str) {
        let response = self.send(
            session,
            RequestBody::ValidateSettings {
                strategies: SyncStrategies::new(["categories"]),
            },
        );
        assert!(matches!(response, SyncResponse::Validation { report } if report.is_valid()));
    }

    fn fetch(&self, session: &str, since: u64) -> ChangeSet {
        let response = self.send(
            session,
            RequestBody::FetchChanges {
                since,
                strategies: SyncStrategies::new(["categories"]),
            },
        );
        match response {
            SyncResponse::Changes { changes } => changes,
            other => panic!("expected changes, got {other:?}"),
        }
    }
}

fn upsert(id: i64, name: &str) -> Change {
    Change::upsert(
        MetadataEntry::live("categories", id, 0, ""),
        row_from([("id", Value::from(id)), ("name", Value::from(name))]),
    )
}

#[test]
fn application_writes_are_served() {
    let fx = Fixture::new();
    fx.app_write(1, "Beverages");
    fx.app_write(2, "Condiments");
    fx.open_session("a");

    let changes = fx.fetch("a", 0);
    assert_eq!(changes.len(), 2);
    assert_eq!(changes.revision(), 2);
    assert!(fx.fetch("a", 2).is_empty());
    assert_eq!(fx.server.revision().unwrap(), 2);
}

#[test]
fn second_writer_makes_first_stale() {
    let fx = Fixture::new();
    fx.open_session("a");
    fx.open_session("b");
    let basis_a = fx.fetch("a", 0).revision();
    let basis_b = fx.fetch("b", 0).revision();

    let response = fx.send(
        "b",
        RequestBody::ApplyChanges {
            basis: basis_b,
            changes: ChangeSet::new(0, vec![upsert(5, "Seafood")]),
        },
    );
    assert_eq!(response, SyncResponse::Applied { revision: 1 });

    let response = fx.send(
        "a",
        RequestBody::ApplyChanges {
            basis: basis_a,
            changes: ChangeSet::new(0, vec![upsert(6, "Grains")]),
        },
    );
    let SyncResponse::Error { error } = response else {
        panic!("expected staleness");
    };
    assert_eq!(error.status, Some(STALE_STATUS));
    assert!(error.is_stale());

    let refreshed = fx.fetch("a", 0);
    assert_eq!(refreshed.len(), 1);
    let response = fx.send(
        "a",
        RequestBody::ApplyChanges {
            basis: refreshed.revision(),
            changes: ChangeSet::new(0, vec![upsert(6, "Grains")]),
        },
    );
    assert_eq!(response, SyncResponse::Applied { revision: 2 });
}

#[test]
fn apply_without_session_is_rejected() {
    let fx = Fixture::new();
    let response = fx.send(
        "ghost",
        RequestBody::ApplyChanges {
            basis: 0,
            changes: ChangeSet::new(0, vec![upsert(1, "x")]),
        },
    );
    let SyncResponse::Error { error } = response else {
        panic!("expected rejection");
    };
    assert_eq!(error.kind, ErrorKind::InvalidRequest);
    assert!(error.message.contains("ghost"));
}

#[test]
fn unknown_tables_fail_validation() {
    let fx = Fixture::new();
    let response = fx.send(
        "a",
        RequestBody::ValidateSettings {
            strategies: SyncStrategies::new(["orders"]),
        },
    );
    let SyncResponse::Validation { report } = response else {
        panic!("expected report");
    };
    assert!(!report.is_valid());
    assert_eq!(fx.server.session_count(), 0);
}

#[test]
fn schema_is_limited_to_session_tables() {
    let fx = Fixture::new();
    fx.open_session("a");
    let response = fx.send("a", RequestBody::FetchSchema);
    let SyncResponse::Schema { schema: served } = response else {
        panic!("expected schema");
    };
    assert!(served.differences(&schema(), ["categories"]).is_empty());
    assert_eq!(served.tables().count(), 1);
}

#[test]
fn unsupported_side_tables_do_not_block_sync() {
    let fx = Fixture::new();
    SqliteAdapter::open(&fx.config)
        .unwrap()
        .connection()
        .execute_batch("CREATE TABLE attachments (id INTEGER PRIMARY KEY, data BLOB)")
        .unwrap();
    fx.app_write(1, "Beverages");
    fx.open_session("a");

    let SyncResponse::Schema { schema: served } = fx.send("a", RequestBody::FetchSchema) else {
        panic!("expected schema");
    };
    assert_eq!(served.tables().count(), 1);
    assert!(served.table("categories").is_some());
    assert_eq!(fx.fetch("a", 0).len(), 1);

    let response = fx.send(
        "b",
        RequestBody::ValidateSettings {
            strategies: SyncStrategies::new(["attachments"]),
        },
    );
    let SyncResponse::Error { error } = response else {
        panic!("expected conversion failure");
    };
    assert_eq!(error.kind, ErrorKind::SchemaConversion);
}
