//! In-process wiring between agents and a server.

use crate::fixtures::TestParty;
use rowsync_core::SyncSettings;
use rowsync_engine::{AgentConfig, HttpTransport, LoopbackClient, LoopbackServer, SyncAgent};
use rowsync_protocol::SessionToken;
use rowsync_server::{ServerConfig, SyncServer};
use std::sync::Arc;

/// Base URL used by loopback transports.
pub const LOOPBACK_URL: &str = "http://rowsync.test";

/// Transport that posts JSON straight into a [`SyncServer`].
pub type LoopbackTransport = HttpTransport<LoopbackClient<ServerLoopback>>;

/// Exposes a shared [`SyncServer`] as a loopback endpoint.
#[derive(Debug, Clone)]
pub struct ServerLoopback(pub Arc<SyncServer>);

impl LoopbackServer for ServerLoopback {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

/// Creates a transport into `server`.
pub fn loopback_transport(server: &Arc<SyncServer>) -> LoopbackTransport {
    HttpTransport::new(
        LOOPBACK_URL,
        LoopbackClient::new(ServerLoopback(Arc::clone(server))),
    )
}

/// Starts a server over `party` with default configuration.
pub fn serve(party: &TestParty) -> Arc<SyncServer> {
    serve_with(party, ServerConfig::default())
}

/// Starts a server over `party`.
pub fn serve_with(party: &TestParty, config: ServerConfig) -> Arc<SyncServer> {
    Arc::new(SyncServer::new(config, party.factory()))
}

/// Creates an agent syncing `client` with `server`.
pub fn client_agent(
    name: &str,
    client: &TestParty,
    server: &Arc<SyncServer>,
    settings: SyncSettings,
) -> SyncAgent<LoopbackTransport> {
    let config = AgentConfig::new().with_session(SessionToken::new(name));
    SyncAgent::new(config, settings, client.open(), loopback_transport(server))
}
