//! # RowSync Testkit
//!
//! Test utilities for RowSync.
//!
//! This crate provides:
//! - Memory and temporary-file SQLite parties ([`TestParty`])
//! - In-process wiring of agents to a [`SyncServer`](rowsync_server::SyncServer)
//! - A fault-injecting adapter for commit retry paths
//! - Property-based generators for application edits
//!
//! ## Usage
//!
//! ```rust
//! use rowsync_core::SyncSettings;
//! use rowsync_protocol::SyncStrategies;
//! use rowsync_testkit::prelude::*;
//!
//! let server_party = scenarios::seeded_server(2);
//! let server = serve(&server_party);
//! let client = TestParty::memory();
//! let settings = SyncSettings::new(SyncStrategies::new(["categories"]));
//!
//! let mut agent = client_agent("device-1", &client, &server, settings);
//! agent.sync().unwrap();
//! assert_eq!(client.rows("categories"), server_party.rows("categories"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod loopback;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::loopback::*;
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
pub use loopback::*;
