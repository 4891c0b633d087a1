//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use rowsync_protocol::{
    ErrorKind, JsonCodec, RequestBody, Revision, SyncRequest, SyncResponse,
};
use rowsync_storage::{AdapterConfig, AdapterFactory, AdapterRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// The sync server.
///
/// Answers the four sync actions against one database. Each request opens
/// its own adapter through the factory, so concurrent requests never share
/// a transaction.
///
/// # Example
///
/// ```
/// use rowsync_server::{ServerConfig, SyncServer};
/// use rowsync_storage::{AdapterConfig, AdapterRegistry};
///
/// let registry = AdapterRegistry::with_defaults();
/// let server = SyncServer::from_registry(
///     ServerConfig::default(),
///     &registry,
///     &AdapterConfig::default(),
/// )
/// .unwrap();
///
/// // Expose `handle_post` behind `POST /sync/{action}`.
/// assert_eq!(server.session_count(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("context", &self.context)
            .finish()
    }
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig, factory: AdapterFactory) -> Self {
        let context = Arc::new(HandlerContext::new(config, factory));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Creates a sync server whose adapters come from a registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured backend is not registered.
    pub fn from_registry(
        config: ServerConfig,
        registry: &AdapterRegistry,
        adapter: &AdapterConfig,
    ) -> ServerResult<Self> {
        let factory = registry.resolve(adapter)?;
        Ok(Self::new(config, factory))
    }

    /// Handles a request.
    ///
    /// Failures are turned into [`SyncResponse::Error`]; staleness carries
    /// the 409 status.
    pub fn handle(&self, request: SyncRequest) -> SyncResponse {
        let action = request.action();
        let session = request.session;
        let result = match request.body {
            RequestBody::ValidateSettings { strategies } => self
                .handler
                .handle_validate_settings(&session, strategies)
                .map(|report| SyncResponse::Validation { report }),
            RequestBody::FetchSchema => self
                .handler
                .handle_fetch_schema(&session)
                .map(|schema| SyncResponse::Schema { schema }),
            RequestBody::FetchChanges { since, strategies } => self
                .handler
                .handle_fetch_changes(&session, since, strategies)
                .map(|changes| SyncResponse::Changes { changes }),
            RequestBody::ApplyChanges { basis, changes } => self
                .handler
                .handle_apply_changes(&session, basis, changes)
                .map(|revision| SyncResponse::Applied { revision }),
        };

        result.unwrap_or_else(|e| {
            if e.is_server_error() {
                error!(%session, %action, error = %e, "request failed");
            } else {
                warn!(%session, %action, error = %e, "request rejected");
            }
            SyncResponse::Error { error: e.to_body() }
        })
    }

    /// Handles a JSON-encoded request and returns the JSON response.
    pub fn handle_json(&self, body: &[u8]) -> Vec<u8> {
        let response = match SyncRequest::decode(body) {
            Ok(request) => self.handle(request),
            Err(e) => {
                debug!(error = %e, "undecodable request");
                SyncResponse::Error {
                    error: ServerError::from(e).to_body(),
                }
            }
        };
        encode_response(&response)
    }

    /// Handles `POST {path}` with a JSON body.
    ///
    /// The path must end in `/sync/{action}` and name the same action as
    /// the body.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let Some((_, segment)) = path.rsplit_once("/sync/") else {
            return Err(format!("no sync endpoint at {path}"));
        };
        let request = match SyncRequest::decode(body) {
            Ok(request) => request,
            Err(_) => return Ok(self.handle_json(body)),
        };
        if request.action().as_str() != segment {
            let response = SyncResponse::error(
                ErrorKind::InvalidRequest,
                format!("endpoint {segment} does not accept {}", request.action()),
            );
            return Ok(encode_response(&response));
        }
        Ok(encode_response(&self.handle(request)))
    }

    /// Returns the number of open sessions.
    pub fn session_count(&self) -> usize {
        self.context.session_count()
    }

    /// Drops sessions idle for longer than `idle`.
    pub fn expire_sessions(&self, idle: Duration) -> usize {
        self.context.expire_sessions(idle)
    }

    /// Returns the server database's current revision.
    pub fn revision(&self) -> ServerResult<Revision> {
        let adapter = self.context.open_adapter()?;
        Ok(adapter.last_revision()?)
    }
}

fn encode_response(response: &SyncResponse) -> Vec<u8> {
    response.encode().unwrap_or_else(|e| {
        error!(error = %e, "response encoding failed");
        SyncResponse::error(ErrorKind::Serialization, e.to_string())
            .encode()
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{
        row_from, ChangeSet, ColumnDef, ColumnType, Schema, SessionToken, SyncStrategies,
        TableSchema, Value,
    };
    use rowsync_storage::{MemoryStore, StorageAdapter};

    fn create_server() -> (MemoryStore, SyncServer) {
        let store = MemoryStore::new();
        store
            .adapter()
            .apply_schema(&Schema::new().with_table(TableSchema::new(
                "categories",
                "id",
                vec![
                    ColumnDef::new("id", ColumnType::Integer),
                    ColumnDef::new("name", ColumnType::Text),
                ],
            )))
            .unwrap();
        let factory_store = store.clone();
        let factory: AdapterFactory = Arc::new(
            move || -> rowsync_storage::AdapterResult<Box<dyn StorageAdapter>> {
                Ok(Box::new(factory_store.adapter()))
            },
        );
        (store, SyncServer::new(ServerConfig::default(), factory))
    }

    fn request(body: RequestBody) -> SyncRequest {
        SyncRequest::new(SessionToken::new("s1"), body)
    }

    #[test]
    fn server_lifecycle() {
        let (_, server) = create_server();
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.revision().unwrap(), 0);
    }

    #[test]
    fn full_sync_flow() {
        let (store, server) = create_server();
        store
            .insert_row(
                "categories",
                row_from([("id", Value::from(1)), ("name", Value::from("Beverages"))]),
            )
            .unwrap();
        let strategies = SyncStrategies::new(["categories"]);

        // 1. Validate
        let response = server.handle(request(RequestBody::ValidateSettings {
            strategies: strategies.clone(),
        }));
        assert!(matches!(response, SyncResponse::Validation { report } if report.is_valid()));

        // 2. Schema
        let response = server.handle(request(RequestBody::FetchSchema));
        let SyncResponse::Schema { schema } = response else {
            panic!("expected schema, got {response:?}");
        };
        assert!(schema.table("categories").is_some());

        // 3. Fetch
        let response = server.handle(request(RequestBody::FetchChanges {
            since: 0,
            strategies,
        }));
        let SyncResponse::Changes { changes } = response else {
            panic!("expected changes, got {response:?}");
        };
        assert_eq!(changes.len(), 1);

        // 4. Apply nothing
        let response = server.handle(request(RequestBody::ApplyChanges {
            basis: changes.revision(),
            changes: ChangeSet::empty(changes.revision()),
        }));
        assert_eq!(response, SyncResponse::Applied { revision: 1 });
    }

    #[test]
    fn garbage_json_is_a_serialization_error() {
        let (_, server) = create_server();
        let bytes = server.handle_json(b"{not json");
        let response = SyncResponse::decode(&bytes).unwrap();
        let SyncResponse::Error { error } = response else {
            panic!("expected error");
        };
        assert_eq!(error.kind, ErrorKind::Serialization);
    }

    #[test]
    fn post_path_must_match_action() {
        let (_, server) = create_server();
        let body = request(RequestBody::FetchSchema).encode().unwrap();

        let ok = server.handle_post("/sync/fetch-schema", &body).unwrap();
        assert!(matches!(
            SyncResponse::decode(&ok).unwrap(),
            SyncResponse::Schema { .. }
        ));

        let mismatch = server.handle_post("/sync/fetch-changes", &body).unwrap();
        assert!(SyncResponse::decode(&mismatch).unwrap().is_error());

        assert!(server.handle_post("/other", &body).is_err());
    }
}
