//! Synchronization agent state machine.

use crate::config::AgentConfig;
use crate::error::{SyncError, SyncResult};
use crate::observer::{SyncEvent, SyncObserver};
use crate::transport::SyncTransport;
use rowsync_core::{
    run_in_transaction, ChangeApplier, ChangeEnumerator, ChangeTracker, ConflictDecider, ConflictEngine,
    ConflictReport, CoreError, Reconciliation, SyncSettings,
};
use rowsync_protocol::{
    Action, ReconciledChangeSets, RequestBody, Revision, Role, Schema, SyncRequest, SyncResponse,
};
use rowsync_storage::{AdapterConfig, AdapterRegistry, StorageAdapter};
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The state of a [`SyncAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Validating settings and preparing local metadata.
    Init,
    /// Enumerating local changes and fetching the server's.
    FetchRemote,
    /// Reconciling the two change sets.
    Resolve,
    /// Submitting the server's apply set.
    ApplyRemote,
    /// Applying the local apply set.
    ApplyLocal,
    /// The last run completed.
    Done,
    /// The last run failed.
    Aborted,
}

impl AgentState {
    /// Returns true if a run is in progress.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != AgentState::Init
    }

    /// Returns true for `Done` and `Aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Done | AgentState::Aborted)
    }
}

/// Result of one successful synchronization run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Attempts needed, including stale ones.
    pub attempts: u32,
    /// Changes accepted by the server.
    pub sent: usize,
    /// Changes applied locally.
    pub received: usize,
    /// Conflicts and how they were settled.
    pub conflicts: ConflictReport,
    /// The client's anchor after the run.
    pub revision: Revision,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Cumulative statistics of an agent.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that completed.
    pub runs_completed: u64,
    /// Runs that aborted.
    pub runs_failed: u64,
    /// Attempts restarted after a staleness rejection.
    pub stale_retries: u64,
    /// Changes sent to the server.
    pub changes_sent: u64,
    /// Changes applied locally.
    pub changes_received: u64,
    /// Conflicts settled.
    pub conflicts: u64,
    /// Completion time of the last successful run.
    pub last_sync_time: Option<Instant>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

/// Drives synchronization of a local store with a server.
///
/// A run walks `Init → FetchRemote → Resolve → ApplyRemote → ApplyLocal →
/// Done`. A staleness rejection in `ApplyRemote` discards the attempt and
/// restarts at `FetchRemote`; any other failure ends in `Aborted`.
pub struct SyncAgent<T: SyncTransport> {
    config: AgentConfig,
    settings: SyncSettings,
    adapter: Box<dyn StorageAdapter>,
    transport: T,
    decider: Option<Box<dyn ConflictDecider>>,
    observer: Option<Box<dyn SyncObserver>>,
    state: AgentState,
    stats: SyncStats,
    full_resync_pending: bool,
}

impl<T: SyncTransport> fmt::Debug for SyncAgent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncAgent")
            .field("session", &self.config.session)
            .field("backend", &self.adapter.backend())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: SyncTransport> SyncAgent<T> {
    /// Creates an agent over a local adapter and a transport.
    pub fn new(
        config: AgentConfig,
        settings: SyncSettings,
        adapter: Box<dyn StorageAdapter>,
        transport: T,
    ) -> Self {
        let full_resync_pending = config.force_full_resync;
        Self {
            config,
            settings,
            adapter,
            transport,
            decider: None,
            observer: None,
            state: AgentState::Init,
            stats: SyncStats::default(),
            full_resync_pending,
        }
    }

    /// Creates an agent whose local adapter comes from `registry`.
    ///
    /// The adapter uses the metadata suffix from `settings`.
    ///
    /// # Errors
    ///
    /// Fails with a context creation error if the settings are invalid or
    /// the backend cannot be opened.
    pub fn open(
        config: AgentConfig,
        settings: SyncSettings,
        registry: &AdapterRegistry,
        adapter_config: &AdapterConfig,
        transport: T,
    ) -> SyncResult<Self> {
        settings.validate()?;
        let adapter_config = adapter_config
            .clone()
            .with_metadata_suffix(settings.metadata_suffix.clone());
        let adapter = registry
            .open(&adapter_config)
            .map_err(|e| CoreError::ContextCreation(e.to_string()))?;
        Ok(Self::new(config, settings, adapter, transport))
    }

    /// Sets the decider for interactive conflicts.
    #[must_use]
    pub fn with_decider(mut self, decider: impl ConflictDecider + 'static) -> Self {
        self.decider = Some(Box::new(decider));
        self
    }

    /// Sets the progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: impl SyncObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.clone()
    }

    /// Returns the settings.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Returns the local adapter.
    pub fn adapter(&self) -> &dyn StorageAdapter {
        self.adapter.as_ref()
    }

    /// Returns the local adapter mutably.
    pub fn adapter_mut(&mut self) -> &mut dyn StorageAdapter {
        self.adapter.as_mut()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs one synchronization.
    pub fn sync(&mut self) -> SyncResult<SyncOutcome> {
        self.transition(AgentState::Init);
        match self.run() {
            Ok(outcome) => {
                self.full_resync_pending = false;
                self.transition(AgentState::Done);
                {
                    let stats = &mut self.stats;
                    stats.runs_completed += 1;
                    stats.changes_sent += outcome.sent as u64;
                    stats.changes_received += outcome.received as u64;
                    stats.conflicts += outcome.conflicts.len() as u64;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }
                info!(
                    attempts = outcome.attempts,
                    sent = outcome.sent,
                    received = outcome.received,
                    conflicts = outcome.conflicts.len(),
                    revision = outcome.revision,
                    "synchronization finished"
                );
                self.notify(&SyncEvent::Finished(outcome.clone()));
                Ok(outcome)
            }
            Err(e) => {
                self.transition(AgentState::Aborted);
                self.stats.runs_failed += 1;
                self.stats.last_error = Some(e.to_string());
                warn!(kind = %e.kind(), error = %e, "synchronization aborted");
                Err(e)
            }
        }
    }

    /// Runs one synchronization on a background thread.
    ///
    /// The agent is handed back together with the result.
    pub fn spawn(mut self) -> JoinHandle<(Self, SyncResult<SyncOutcome>)>
    where
        T: 'static,
    {
        thread::spawn(move || {
            let result = self.sync();
            (self, result)
        })
    }

    fn run(&mut self) -> SyncResult<SyncOutcome> {
        let started = Instant::now();
        let mut prepared = false;
        let mut attempt = 0;
        let mut transient = 0;

        loop {
            attempt += 1;
            let result = if prepared {
                self.attempt(attempt)
            } else {
                match self.init() {
                    Ok(()) => {
                        prepared = true;
                        self.attempt(attempt)
                    }
                    Err(e) => Err(e),
                }
            };

            let error = match result {
                Ok(mut outcome) => {
                    outcome.duration = started.elapsed();
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if !self.config.retry.allows_another(attempt) {
                warn!(attempt, "retries exhausted");
                return Err(error);
            }
            if error.is_stale() {
                self.stats.stale_retries += 1;
                self.notify(&SyncEvent::StaleRetry { attempt });
                info!(attempt, error = %error, "stale attempt, fetching again");
            } else {
                transient += 1;
                if transient > self.config.retry.max_transient_failures {
                    return Err(error);
                }
                warn!(attempt, error = %error, "transient failure, retrying");
            }
            thread::sleep(self.config.retry.delay_for_retry(attempt));
        }
    }

    /// Validates settings on both sides, reconciles schemas and prepares
    /// local metadata.
    fn init(&mut self) -> SyncResult<()> {
        self.settings.validate()?;

        let strategies = self.settings.strategies.clone();
        match self.request(RequestBody::ValidateSettings { strategies })? {
            SyncResponse::Validation { report } if report.is_valid() => {}
            SyncResponse::Validation { report } => {
                return Err(SyncError::Configuration(format!(
                    "server rejected settings: {}",
                    report.problems.join("; ")
                )))
            }
            _ => return Err(unexpected(Action::ValidateSettings)),
        }

        let remote = match self.request(RequestBody::FetchSchema)? {
            SyncResponse::Schema { schema } => schema,
            _ => return Err(unexpected(Action::FetchSchema)),
        };
        self.reconcile_schema(&remote)?;

        self.adapter.ensure_metadata_schema(Role::Client)?;
        for table in self.settings.tables() {
            self.adapter.ensure_metadata_table(table)?;
        }

        if self.full_resync_pending {
            let marked = ChangeTracker::new(&self.settings).mark_all_dirty(&mut *self.adapter)?;
            info!(marked, "full resynchronization requested");
        }
        Ok(())
    }

    fn reconcile_schema(&mut self, remote: &Schema) -> SyncResult<()> {
        let tables = || self.settings.tables().iter().map(String::as_str);
        if !self.adapter.has_schema()? {
            let adopted = remote.subset(tables());
            info!(tables = adopted.tables().count(), "adopting server schema");
            self.adapter.apply_schema(&adopted)?;
            return Ok(());
        }
        let local = self.adapter.schema_for(self.settings.tables())?;
        let differences = local.differences(remote, tables());
        if differences.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Configuration(format!(
                "schema mismatch: {}",
                differences.join("; ")
            )))
        }
    }

    fn attempt(&mut self, attempt: u32) -> SyncResult<SyncOutcome> {
        self.transition(AgentState::FetchRemote);
        self.notify(&SyncEvent::FetchStarted { attempt });

        let local = {
            let settings = &self.settings;
            let tracker = ChangeTracker::new(settings);
            let enumerator = ChangeEnumerator::new(&settings.strategies);
            run_in_transaction(&mut *self.adapter, settings.max_commit_attempts, |a| {
                if settings.detect_changes {
                    tracker.detect_in(a, Role::Client)?;
                }
                enumerator.client_changes(&*a)
            })?
        };
        let since = if self.full_resync_pending {
            0
        } else {
            local.revision()
        };
        let remote = match self.request(RequestBody::FetchChanges {
            since,
            strategies: self.settings.strategies.clone(),
        })? {
            SyncResponse::Changes { changes } => changes,
            _ => return Err(unexpected(Action::FetchChanges)),
        };
        debug!(local = local.len(), remote = remote.len(), since, "fetched change sets");

        self.transition(AgentState::Resolve);
        let Reconciliation {
            change_sets,
            report,
            settled,
        } = {
            let engine = ConflictEngine::new(&self.settings.strategies, self.settings.fingerprinter());
            let engine = match &self.decider {
                Some(decider) => engine.with_decider(&**decider),
                None => engine,
            };
            engine.reconcile(&local, &remote)
        };
        for conflict in &report.conflicts {
            self.notify(&SyncEvent::ConflictDetected {
                table: conflict.table.clone(),
                key: conflict.primary_key.clone(),
            });
        }
        let ReconciledChangeSets {
            to_server,
            to_client,
        } = change_sets;

        self.transition(AgentState::ApplyRemote);
        self.notify(&SyncEvent::Applying {
            to_server: to_server.len(),
            to_client: to_client.len(),
        });
        let sent = to_server.len();
        let anchor = if to_server.is_empty() {
            remote.revision()
        } else {
            match self.request(RequestBody::ApplyChanges {
                basis: remote.revision(),
                changes: to_server,
            })? {
                SyncResponse::Applied { revision } => revision,
                _ => return Err(unexpected(Action::ApplyChanges)),
            }
        };

        self.transition(AgentState::ApplyLocal);
        let revision = ChangeApplier::new(&self.settings).apply_local_set(
            &mut *self.adapter,
            &to_client,
            &settled,
            anchor,
        )?;

        Ok(SyncOutcome {
            attempts: attempt,
            sent,
            received: to_client.len(),
            conflicts: report,
            revision,
            duration: Duration::ZERO,
        })
    }

    fn request(&self, body: RequestBody) -> SyncResult<SyncResponse> {
        let request = SyncRequest::new(self.config.session.clone(), body);
        match self.transport.exchange(&request)? {
            SyncResponse::Error { error } => Err(SyncError::from_remote(error)),
            response => Ok(response),
        }
    }

    fn transition(&mut self, next: AgentState) {
        debug!(from = ?self.state, to = ?next, "agent state");
        self.state = next;
    }

    fn notify(&self, event: &SyncEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(event);
        }
    }
}

fn unexpected(action: Action) -> SyncError {
    SyncError::UnexpectedResponse { action }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::MockTransport;
    use parking_lot::Mutex;
    use rowsync_protocol::{
        row_from, Change, ChangeSet, ColumnDef, ColumnType, ErrorBody, MetadataEntry,
        SyncStrategies, TableSchema, ValidationReport, Value,
    };
    use rowsync_storage::{MemoryAdapter, MemoryStore};
    use std::sync::Arc;

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

    fn server_change(id: i64, name: &str, revision: Revision) -> Change {
        Change::upsert(
            MetadataEntry::live("categories", id, revision, "00"),
            row_from([("id", Value::from(id)), ("name", Value::from(name))]),
        )
    }

    fn handshake(transport: &MockTransport) {
        transport.push_response(SyncResponse::Validation {
            report: ValidationReport::default(),
        });
        transport.push_response(SyncResponse::Schema { schema: schema() });
    }

    fn agent(store: &MemoryStore, transport: Arc<MockTransport>) -> SyncAgent<Arc<MockTransport>> {
        SyncAgent::new(
            AgentConfig::new(),
            SyncSettings::new(SyncStrategies::new(["categories"])),
            Box::new(store.adapter()),
            transport,
        )
    }

    #[test]
    fn first_run_adopts_schema_and_downloads() {
        let transport = Arc::new(MockTransport::new());
        handshake(&transport);
        transport.push_response(SyncResponse::Changes {
            changes: ChangeSet::new(
                2,
                vec![server_change(1, "Beverages", 1), server_change(2, "Condiments", 2)],
            ),
        });

        let store = MemoryStore::new();
        let mut agent = agent(&store, transport.clone());
        assert_eq!(agent.state(), AgentState::Init);

        let outcome = agent.sync().unwrap();
        assert_eq!(agent.state(), AgentState::Done);
        assert_eq!(outcome.attempts, 1);
        assert_eq!((outcome.sent, outcome.received), (0, 2));
        assert_eq!(outcome.revision, 2);
        assert_eq!(store.rows("categories").len(), 2);
        assert_eq!(agent.adapter().last_revision().unwrap(), 2);

        let actions: Vec<_> = transport.requests().iter().map(|r| r.action()).collect();
        assert_eq!(
            actions,
            [Action::ValidateSettings, Action::FetchSchema, Action::FetchChanges]
        );
        assert_eq!(agent.stats().runs_completed, 1);
    }

    #[test]
    fn stale_rejection_restarts_from_fetch() {
        let store = MemoryStore::new();
        let mut local = MemoryAdapter::with_store(store.clone());
        local.apply_schema(&schema()).unwrap();
        store
            .insert_row("categories", row_from([("id", Value::from(7)), ("name", Value::from("Grains"))]))
            .unwrap();

        let transport = Arc::new(MockTransport::new());
        handshake(&transport);
        transport.push_response(SyncResponse::Changes {
            changes: ChangeSet::empty(0),
        });
        transport.push_response(SyncResponse::Error {
            error: ErrorBody::stale(0, 1),
        });
        transport.push_response(SyncResponse::Changes {
            changes: ChangeSet::new(1, vec![server_change(8, "Dairy", 1)]),
        });
        transport.push_response(SyncResponse::Applied { revision: 2 });

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut agent = agent(&store, transport.clone())
            .with_observer(move |e: &SyncEvent| sink.lock().push(e.clone()));

        let outcome = agent.sync().unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!((outcome.sent, outcome.received), (1, 1));
        assert_eq!(outcome.revision, 2);
        assert_eq!(store.rows("categories").len(), 2);
        assert_eq!(agent.stats().stale_retries, 1);
        assert!(events.lock().contains(&SyncEvent::StaleRetry { attempt: 1 }));
        assert!(matches!(events.lock().last(), Some(SyncEvent::Finished(_))));

        let requests = transport.requests();
        let RequestBody::ApplyChanges { basis, changes } = &requests[5].body else {
            panic!("expected apply-changes, got {:?}", requests[5].action());
        };
        assert_eq!(*basis, 1);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn attempt_cap_surfaces_staleness() {
        let store = MemoryStore::new();
        let mut local = MemoryAdapter::with_store(store.clone());
        local.apply_schema(&schema()).unwrap();
        store
            .insert_row("categories", row_from([("id", Value::from(1)), ("name", Value::from("x"))]))
            .unwrap();

        let transport = Arc::new(MockTransport::new());
        handshake(&transport);
        transport.push_response(SyncResponse::Changes {
            changes: ChangeSet::empty(0),
        });
        transport.push_response(SyncResponse::Error {
            error: ErrorBody::stale(0, 1),
        });

        let mut agent = SyncAgent::new(
            AgentConfig::new().with_retry(RetryConfig::new(1)),
            SyncSettings::new(SyncStrategies::new(["categories"])),
            Box::new(store.adapter()),
            transport,
        );
        let err = agent.sync().unwrap_err();
        assert!(err.is_stale());
        assert_eq!(agent.state(), AgentState::Aborted);
        assert_eq!(agent.stats().runs_failed, 1);
    }

    #[test]
    fn schema_mismatch_is_configuration_error() {
        let store = MemoryStore::new();
        let mut local = MemoryAdapter::with_store(store.clone());
        local
            .apply_schema(&Schema::new().with_table(TableSchema::new(
                "categories",
                "id",
                vec![ColumnDef::new("id", ColumnType::Integer)],
            )))
            .unwrap();

        let transport = Arc::new(MockTransport::new());
        handshake(&transport);
        let mut agent = agent(&store, transport);
        let err = agent.sync().unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert_eq!(agent.state(), AgentState::Aborted);
    }

    #[test]
    fn rejected_settings_abort() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(SyncResponse::Validation {
            report: ValidationReport {
                problems: vec!["unknown table categories".into()],
            },
        });
        let mut agent = agent(&MemoryStore::new(), transport);
        let err = agent.sync().unwrap_err();
        assert!(err.to_string().contains("unknown table"));
    }

    #[test]
    fn transient_failures_are_bounded() {
        let transport = Arc::new(MockTransport::new());
        for _ in 0..3 {
            transport.push_error(SyncError::transport_retryable("connection reset"));
        }
        let mut agent = SyncAgent::new(
            AgentConfig::new().with_retry(RetryConfig::default().with_max_transient_failures(2)),
            SyncSettings::new(SyncStrategies::new(["categories"])),
            Box::new(MemoryAdapter::new()),
            transport.clone(),
        );
        let err = agent.sync().unwrap_err();
        assert!(matches!(err, SyncError::Transport { .. }));
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn unknown_backend_is_context_error() {
        let err = SyncAgent::open(
            AgentConfig::new(),
            SyncSettings::new(SyncStrategies::new(["categories"])),
            &AdapterRegistry::with_defaults(),
            &AdapterConfig::default().with_backend("oracle"),
            MockTransport::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), rowsync_protocol::ErrorKind::ContextCreation);
    }

    #[test]
    fn spawn_hands_agent_back() {
        let transport = Arc::new(MockTransport::new());
        handshake(&transport);
        transport.push_response(SyncResponse::Changes {
            changes: ChangeSet::empty(0),
        });
        let handle = agent(&MemoryStore::new(), transport).spawn();
        let (agent, result) = handle.join().unwrap();
        assert!(result.is_ok());
        assert_eq!(agent.state(), AgentState::Done);
    }
}
