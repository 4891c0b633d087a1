//! Adapter configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default suffix appended to a table name to form its metadata table.
pub const DEFAULT_METADATA_SUFFIX: &str = "_sync";

/// Configuration used to construct an adapter through the registry.
///
/// # Example
///
/// ```rust
/// use rowsync_storage::AdapterConfig;
///
/// let config = AdapterConfig::sqlite("client.db").with_metadata_suffix("_meta");
/// assert_eq!(config.backend, "sqlite");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Backend identifier resolved by [`crate::AdapterRegistry`].
    pub backend: String,
    /// Database location. `None` means an in-memory database.
    pub location: Option<PathBuf>,
    /// Suffix appended to table names for metadata tables.
    pub metadata_suffix: String,
    /// How long a backend waits on a locked database before giving up.
    pub busy_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            location: None,
            metadata_suffix: DEFAULT_METADATA_SUFFIX.to_string(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl AdapterConfig {
    /// Creates a configuration for the in-memory backend.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Creates a configuration for a SQLite database file.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: "sqlite".to_string(),
            location: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the backend identifier.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Sets the database location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the metadata table suffix.
    #[must_use]
    pub fn with_metadata_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.metadata_suffix = suffix.into();
        self
    }

    /// Sets the busy timeout.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}
