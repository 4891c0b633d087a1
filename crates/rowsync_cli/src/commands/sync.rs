//! Sync command implementation.

use rowsync_core::{HashAlgorithm, SyncSettings};
use rowsync_engine::{
    AgentConfig, HttpTransport, LoopbackClient, LoopbackServer, RetryConfig, SyncAgent,
    SyncOutcome,
};
use rowsync_protocol::{
    Conflict, ConflictPolicy, Decision, Row, SyncDirection, SyncStrategies, TableSyncStrategy,
    Value,
};
use rowsync_server::{ServerConfig, SyncServer};
use rowsync_storage::{AdapterConfig, AdapterRegistry};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Options of one synchronization run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Participating tables.
    pub tables: Vec<String>,
    /// Direction for every table.
    pub direction: SyncDirection,
    /// Conflict policy for every table.
    pub policy: ConflictPolicy,
    /// Fingerprint algorithm.
    pub hash: HashAlgorithm,
    /// Attempt limit, unbounded if `None`.
    pub max_attempts: Option<u32>,
    /// Force a full resynchronization.
    pub full: bool,
}

/// Serves a local server database to the loopback transport.
pub struct LocalServer(SyncServer);

impl LoopbackServer for LocalServer {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

/// Transport used by the CLI.
pub type LocalTransport = HttpTransport<LoopbackClient<LocalServer>>;

/// Builds an agent syncing the `client` database with the `server` one.
pub fn agent(
    client: &Path,
    server: &Path,
    options: &SyncOptions,
) -> Result<SyncAgent<LocalTransport>, Box<dyn std::error::Error>> {
    let registry = AdapterRegistry::with_defaults();
    let server = SyncServer::from_registry(
        ServerConfig::default().with_hash_algorithm(options.hash),
        &registry,
        &AdapterConfig::sqlite(server),
    )?;
    let transport = HttpTransport::new("http://localhost", LoopbackClient::new(LocalServer(server)));

    let strategies = SyncStrategies::new(options.tables.iter().cloned())
        .with_default(TableSyncStrategy::new(options.direction, options.policy));
    let settings = SyncSettings::new(strategies).with_hash_algorithm(options.hash);
    let config = AgentConfig::new()
        .with_retry(RetryConfig::default().with_max_attempts(options.max_attempts))
        .with_force_full_resync(options.full);

    let agent = SyncAgent::open(
        config,
        settings,
        &registry,
        &AdapterConfig::sqlite(client),
        transport,
    )?;
    Ok(agent)
}

/// Runs the sync command.
pub fn run(
    client: &Path,
    server: &Path,
    options: &SyncOptions,
) -> Result<SyncOutcome, Box<dyn std::error::Error>> {
    let mut agent = agent(client, server, options)?;
    if options.policy == ConflictPolicy::Interactive {
        agent = agent.with_decider(ask);
    }
    let outcome = agent.sync()?;

    println!(
        "Synchronized: sent {}, received {}, conflicts {}, revision {}",
        outcome.sent,
        outcome.received,
        outcome.conflicts.len(),
        outcome.revision
    );
    if outcome.attempts > 1 {
        println!("  ({} attempts)", outcome.attempts);
    }
    for resolved in &outcome.conflicts.conflicts {
        println!(
            "  {}:{} -> {:?}",
            resolved.table, resolved.primary_key, resolved.resolution
        );
    }
    Ok(outcome)
}

/// Asks on stdin how to settle a conflict.
fn ask(conflict: &Conflict) -> Decision {
    println!(
        "Conflict on {}:{}",
        conflict.table(),
        conflict.primary_key()
    );
    println!("  server: {}", describe(conflict.server_payload()));
    println!("  client: {}", describe(conflict.client_payload()));
    print!("Keep [s]erver, [c]lient, or [q]uit? ");
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => parse_answer(&line),
        Err(_) => Decision::Cancel,
    }
}

fn parse_answer(answer: &str) -> Decision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "s" | "server" => Decision::UseServer,
        "c" | "client" => Decision::UseClient,
        _ => Decision::Cancel,
    }
}

fn describe(row: Option<&Row>) -> String {
    let Some(row) = row else {
        return "(deleted)".to_string();
    };
    row.iter()
        .map(|(column, value)| {
            let shown = match value {
                Value::Null => "NULL".to_string(),
                Value::Integer(i) => i.to_string(),
                Value::Real(f) => f.to_string(),
                Value::Text(s) => format!("{s:?}"),
                Value::Bool(b) => b.to_string(),
                Value::Timestamp(ms) => format!("@{ms}"),
            };
            format!("{column}={shown}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{row_from, ColumnDef, ColumnType, Role, Schema, TableSchema};
    use tempfile::TempDir;

    fn options() -> SyncOptions {
        SyncOptions {
            tables: vec!["categories".to_string()],
            direction: SyncDirection::Bidirectional,
            policy: ConflictPolicy::ServerWins,
            hash: HashAlgorithm::Sha256,
            max_attempts: Some(5),
            full: false,
        }
    }

    fn seed_server(path: &Path) {
        let mut adapter = super::super::open(path).unwrap();
        adapter
            .apply_schema(&Schema::new().with_table(TableSchema::new(
                "categories",
                "id",
                vec![
                    ColumnDef::new("id", ColumnType::Integer),
                    ColumnDef::new("name", ColumnType::Text),
                ],
            )))
            .unwrap();
        adapter.ensure_metadata_schema(Role::Server).unwrap();
        adapter.begin().unwrap();
        adapter
            .upsert_row(
                "categories",
                &1.into(),
                &row_from([("id", Value::from(1)), ("name", Value::from("Beverages"))]),
            )
            .unwrap();
        adapter.commit().unwrap();
    }

    #[test]
    fn sync_between_files() {
        let dir = TempDir::new().unwrap();
        let (client, server) = (dir.path().join("client.db"), dir.path().join("server.db"));
        seed_server(&server);

        let outcome = run(&client, &server, &options()).unwrap();
        assert_eq!(outcome.received, 1);

        let adapter = super::super::open(&client).unwrap();
        let row = adapter.row_by_key("categories", &1.into()).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("Beverages")));
        assert_eq!(adapter.last_revision().unwrap(), 1);

        let again = run(&client, &server, &options()).unwrap();
        assert_eq!((again.sent, again.received), (0, 0));
    }

    #[test]
    fn answers() {
        assert_eq!(parse_answer("s\n"), Decision::UseServer);
        assert_eq!(parse_answer(" Client "), Decision::UseClient);
        assert_eq!(parse_answer(""), Decision::Cancel);
    }

    #[test]
    fn describes_rows() {
        let row = row_from([("id", Value::from(1)), ("name", Value::from("Chai"))]);
        assert_eq!(describe(Some(&row)), "id=1, name=\"Chai\"");
        assert_eq!(describe(None), "(deleted)");
    }
}
