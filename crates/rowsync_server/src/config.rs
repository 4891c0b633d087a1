//! Server configuration.

use rowsync_core::HashAlgorithm;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest change set accepted by one apply request.
    pub max_apply_batch: usize,
    /// How often a commit failing with a retryable adapter error is tried.
    pub max_commit_attempts: u32,
    /// Fingerprint algorithm for rows written by the server.
    pub hash_algorithm: HashAlgorithm,
    /// Scan tables for application writes before answering.
    pub detect_changes: bool,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_apply_batch: 10_000,
            max_commit_attempts: 3,
            hash_algorithm: HashAlgorithm::default(),
            detect_changes: true,
        }
    }

    /// Sets the maximum apply batch size.
    #[must_use]
    pub fn with_max_apply_batch(mut self, size: usize) -> Self {
        self.max_apply_batch = size;
        self
    }

    /// Sets the commit attempt limit.
    #[must_use]
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts;
        self
    }

    /// Sets the fingerprint algorithm.
    #[must_use]
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Enables or disables change detection.
    #[must_use]
    pub fn with_detect_changes(mut self, detect: bool) -> Self {
        self.detect_changes = detect;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_apply_batch, 10_000);
        assert_eq!(config.max_commit_attempts, 3);
        assert!(config.detect_changes);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_apply_batch(50)
            .with_max_commit_attempts(5)
            .with_hash_algorithm(HashAlgorithm::Sha512)
            .with_detect_changes(false);

        assert_eq!(config.max_apply_batch, 50);
        assert_eq!(config.max_commit_attempts, 5);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha512);
        assert!(!config.detect_changes);
    }
}
