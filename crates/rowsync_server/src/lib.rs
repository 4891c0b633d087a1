//! # RowSync Server
//!
//! Server side of the RowSync protocol.
//!
//! This crate provides:
//! - [`SyncServer`], answering `validate-settings`, `fetch-schema`,
//!   `fetch-changes` and `apply-changes`
//! - Per-session strategy bookkeeping in [`HandlerContext`]
//! - Staleness rejection of change sets computed against an old revision
//!
//! # Architecture
//!
//! The server owns no data of its own. Every request opens an adapter
//! through an [`AdapterFactory`](rowsync_storage::AdapterFactory) and runs
//! the shared core components against it:
//! - change detection picks up writes made by the server's applications
//! - the enumerator answers fetches
//! - the applier accepts client changes inside one transaction
//!
//! # Protocol
//!
//! A client synchronizes in four steps:
//! 1. Validate its strategies, which opens a session
//! 2. Fetch the schema of the participating tables
//! 3. Fetch changes since its anchor
//! 4. Apply its reconciled changes against the revision it fetched
//!
//! If another client committed between steps 3 and 4, step 4 is rejected
//! with status 409 and the client starts over from step 3.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
