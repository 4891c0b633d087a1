//! # RowSync Storage
//!
//! Storage adapter contract and implementations for RowSync.
//!
//! An adapter hides one backend behind revision and metadata semantics:
//! a transaction-scoped revision counter, one metadata table per
//! participating table, and typed error translation.
//!
//! ## Design Principles
//!
//! - Mutations only happen inside a caller-managed transaction
//! - Revision assignment is serialized by the backend's isolation, not by
//!   an in-process lock
//! - Bulk reads are lazy, finite, single-pass iterators
//!
//! ## Available Adapters
//!
//! - [`MemoryAdapter`] - Optimistic in-memory backend for tests
//! - [`SqliteAdapter`] - SQLite backend via `rusqlite`
//!
//! ## Example
//!
//! ```rust
//! use rowsync_protocol::Role;
//! use rowsync_storage::{MemoryAdapter, StorageAdapter};
//!
//! let mut adapter = MemoryAdapter::new();
//! adapter.ensure_metadata_schema(Role::Server).unwrap();
//! adapter.begin().unwrap();
//! let rev = adapter.next_revision().unwrap();
//! adapter.commit().unwrap();
//! assert_eq!(adapter.last_revision().unwrap(), rev);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod adapter;
mod config;
mod error;
mod memory;
mod registry;
mod sqlite;

pub use adapter::{ChangeStream, IsolationLevel, RowStream, StorageAdapter};
pub use config::{AdapterConfig, DEFAULT_METADATA_SUFFIX};
pub use error::{AdapterError, AdapterResult};
pub use memory::{MemoryAdapter, MemoryStore};
pub use registry::{AdapterFactory, AdapterRegistry, FactoryBuilder};
pub use sqlite::SqliteAdapter;
