//! Per-table synchronization strategies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The two participants of a synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The initiating party.
    Client,
    /// The authoritative party.
    Server,
}

impl Role {
    /// Returns the other role.
    pub fn opposite(self) -> Self {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Which way changes for a table may flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncDirection {
    /// Only client changes reach the server.
    ClientToServer,
    /// Only server changes reach the client.
    ServerToClient,
    /// Both directions.
    Bidirectional,
}

impl SyncDirection {
    /// Returns true if changes originating at `origin` may be sent to the
    /// other party.
    pub fn allows_from(self, origin: Role) -> bool {
        match (self, origin) {
            (SyncDirection::Bidirectional, _) => true,
            (SyncDirection::ClientToServer, Role::Client) => true,
            (SyncDirection::ServerToClient, Role::Server) => true,
            _ => false,
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "client-to-server" | "upload" => Ok(SyncDirection::ClientToServer),
            "server-to-client" | "download" => Ok(SyncDirection::ServerToClient),
            "bidirectional" | "both" => Ok(SyncDirection::Bidirectional),
            other => Err(format!("unknown sync direction: {other}")),
        }
    }
}

/// How a row changed on both sides is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictPolicy {
    /// The server's version is kept.
    ServerWins,
    /// The client's version is kept.
    ClientWins,
    /// A decider is asked.
    Interactive,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "server-wins" | "server" => Ok(ConflictPolicy::ServerWins),
            "client-wins" | "client" => Ok(ConflictPolicy::ClientWins),
            "interactive" | "ask" => Ok(ConflictPolicy::Interactive),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// Direction and conflict policy for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSyncStrategy {
    /// Allowed flow.
    pub direction: SyncDirection,
    /// Conflict policy.
    pub conflict_policy: ConflictPolicy,
}

impl TableSyncStrategy {
    /// Creates a strategy.
    pub fn new(direction: SyncDirection, conflict_policy: ConflictPolicy) -> Self {
        Self {
            direction,
            conflict_policy,
        }
    }
}

impl Default for TableSyncStrategy {
    fn default() -> Self {
        Self::new(SyncDirection::Bidirectional, ConflictPolicy::ServerWins)
    }
}

/// The participating tables, with a default strategy and optional
/// per-table overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStrategies {
    tables: Vec<String>,
    #[serde(default)]
    default: TableSyncStrategy,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    overrides: BTreeMap<String, TableSyncStrategy>,
}

impl SyncStrategies {
    /// Creates strategies for the given tables using the default strategy.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            default: TableSyncStrategy::default(),
            overrides: BTreeMap::new(),
        }
    }

    /// Sets the default strategy.
    #[must_use]
    pub fn with_default(mut self, strategy: TableSyncStrategy) -> Self {
        self.default = strategy;
        self
    }

    /// Overrides the strategy for one table. Adds the table if missing.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>, strategy: TableSyncStrategy) -> Self {
        let table = table.into();
        if !self.tables.contains(&table) {
            self.tables.push(table.clone());
        }
        self.overrides.insert(table, strategy);
        self
    }

    /// Returns the participating tables in declaration order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Returns true if the table participates.
    pub fn contains(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }

    /// Returns the default strategy.
    pub fn default_strategy(&self) -> TableSyncStrategy {
        self.default
    }

    /// Returns the effective strategy for a table.
    pub fn for_table(&self, table: &str) -> TableSyncStrategy {
        self.overrides.get(table).copied().unwrap_or(self.default)
    }

    /// Returns the tables whose changes may leave a party playing `origin`.
    pub fn outbound_tables(&self, origin: Role) -> impl Iterator<Item = &str> + '_ {
        self.tables
            .iter()
            .filter(move |t| self.for_table(t).direction.allows_from(origin))
            .map(String::as_str)
    }

    /// Returns problems with this configuration. Empty when valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.tables.is_empty() {
            problems.push("no tables configured for synchronization".to_string());
        }
        let mut seen = std::collections::BTreeSet::new();
        for table in &self.tables {
            if table.trim().is_empty() {
                problems.push("empty table name".to_string());
            } else if !seen.insert(table.as_str()) {
                problems.push(format!("table {table} listed twice"));
            }
        }
        for table in self.overrides.keys() {
            if !self.contains(table) {
                problems.push(format!("strategy given for unlisted table {table}"));
            }
        }
        problems
    }
}
