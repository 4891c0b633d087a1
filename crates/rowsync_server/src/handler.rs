//! Request handlers for sync actions.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use rowsync_core::{
    run_in_transaction, ChangeApplier, ChangeEnumerator, ChangeTracker, SyncSettings,
};
use rowsync_protocol::{
    ChangeSet, Revision, Role, Schema, SessionToken, SyncStrategies, ValidationReport,
};
use rowsync_storage::{AdapterFactory, StorageAdapter};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    factory: AdapterFactory,
    sessions: RwLock<HashMap<SessionToken, Session>>,
}

/// What the server remembers about a client's synchronization.
#[derive(Debug, Clone)]
struct Session {
    strategies: SyncStrategies,
    last_seen: Instant,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("config", &self.config)
            .field("sessions", &self.sessions.read().len())
            .finish_non_exhaustive()
    }
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, factory: AdapterFactory) -> Self {
        Self {
            config,
            factory,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Opens an adapter for one request.
    pub fn open_adapter(&self) -> ServerResult<Box<dyn StorageAdapter>> {
        Ok((self.factory)()?)
    }

    /// Returns the number of known sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Forgets a session.
    pub fn end_session(&self, token: &SessionToken) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// Drops sessions idle for longer than `idle`. Returns how many went.
    pub fn expire_sessions(&self, idle: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen.elapsed() <= idle);
        before - sessions.len()
    }

    fn register_session(&self, token: &SessionToken, strategies: SyncStrategies) {
        let session = Session {
            strategies,
            last_seen: Instant::now(),
        };
        self.sessions.write().insert(token.clone(), session);
    }

    fn session(&self, token: &SessionToken) -> Option<SyncStrategies> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(token)?;
        session.last_seen = Instant::now();
        Some(session.strategies.clone())
    }

    /// Builds the settings used to serve a session.
    fn settings_for(&self, strategies: SyncStrategies) -> SyncSettings {
        SyncSettings::new(strategies)
            .with_hash_algorithm(self.config.hash_algorithm)
            .with_detect_changes(self.config.detect_changes)
            .with_max_commit_attempts(self.config.max_commit_attempts)
    }
}

/// Handler for sync requests.
#[derive(Debug)]
pub struct RequestHandler {
    context: std::sync::Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: std::sync::Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Validates strategies against the server's schema and binds them to
    /// the session.
    ///
    /// A valid set also makes sure the server-side metadata exists.
    pub fn handle_validate_settings(
        &self,
        session: &SessionToken,
        strategies: SyncStrategies,
    ) -> ServerResult<ValidationReport> {
        let mut adapter = self.context.open_adapter()?;
        let schema = adapter.schema_for(strategies.tables())?;
        let mut problems = strategies.problems();
        for table in strategies.tables() {
            if schema.table(table).is_none() {
                problems.push(format!("table {table} does not exist on the server"));
            }
        }
        let report = ValidationReport { problems };
        if !report.is_valid() {
            warn!(%session, problems = ?report.problems, "rejected settings");
            return Ok(report);
        }

        prepare(adapter.as_mut(), &strategies)?;
        self.context.register_session(session, strategies);
        debug!(%session, "session registered");
        Ok(report)
    }

    /// Returns the schema of the session's tables, or of every table for
    /// an unknown session.
    pub fn handle_fetch_schema(&self, session: &SessionToken) -> ServerResult<Schema> {
        let adapter = self.context.open_adapter()?;
        Ok(match self.context.session(session) {
            Some(strategies) => adapter.schema_for(strategies.tables())?,
            None => adapter.current_schema()?,
        })
    }

    /// Returns the server's changes newer than `since`.
    pub fn handle_fetch_changes(
        &self,
        session: &SessionToken,
        since: Revision,
        strategies: SyncStrategies,
    ) -> ServerResult<ChangeSet> {
        let problems = strategies.problems();
        if !problems.is_empty() {
            return Err(ServerError::InvalidRequest(problems.join("; ")));
        }

        let mut adapter = self.context.open_adapter()?;
        prepare(adapter.as_mut(), &strategies)?;
        let settings = self.context.settings_for(strategies.clone());
        let tracker = ChangeTracker::new(&settings);
        let enumerator = ChangeEnumerator::new(&settings.strategies);
        // One transaction, so the set matches the revision it is stamped with.
        let changes = run_in_transaction(adapter.as_mut(), settings.max_commit_attempts, |a| {
            if settings.detect_changes {
                tracker.detect_in(a, Role::Server)?;
            }
            enumerator.server_changes(&*a, since)
        })?;
        self.context.register_session(session, strategies);

        debug!(%session, since, revision = changes.revision(), count = changes.len(), "served changes");
        Ok(changes)
    }

    /// Applies a client's change set reconciled against `basis`.
    pub fn handle_apply_changes(
        &self,
        session: &SessionToken,
        basis: Revision,
        changes: ChangeSet,
    ) -> ServerResult<Revision> {
        let strategies = self
            .context
            .session(session)
            .ok_or_else(|| ServerError::UnknownSession(session.clone()))?;
        let max = self.context.config.max_apply_batch;
        if changes.len() > max {
            return Err(ServerError::BatchTooLarge {
                size: changes.len(),
                max,
            });
        }

        let mut adapter = self.context.open_adapter()?;
        let settings = self.context.settings_for(strategies);
        let revision = ChangeApplier::new(&settings).apply_remote_set(adapter.as_mut(), &changes, basis)?;

        info!(%session, basis, revision, count = changes.len(), "accepted changes");
        Ok(revision)
    }
}

/// Ensures server metadata for the participating tables.
fn prepare(adapter: &mut dyn StorageAdapter, strategies: &SyncStrategies) -> ServerResult<()> {
    adapter.ensure_metadata_schema(Role::Server)?;
    for table in strategies.tables() {
        adapter.ensure_metadata_table(table)?;
    }
    Ok(())
}
