//! CLI command implementations.

pub mod init;
pub mod schema;
pub mod status;
pub mod sync;

use rowsync_storage::{AdapterConfig, AdapterRegistry, StorageAdapter};
use std::path::Path;

/// Opens the SQLite database at `path`.
pub fn open(path: &Path) -> Result<Box<dyn StorageAdapter>, Box<dyn std::error::Error>> {
    Ok(AdapterRegistry::with_defaults().open(&AdapterConfig::sqlite(path))?)
}
