//! Synchronization settings.

use crate::error::{CoreError, CoreResult};
use crate::fingerprint::{Fingerprinter, HashAlgorithm};
use rowsync_protocol::{ConflictPolicy, SyncDirection, SyncStrategies, TableSyncStrategy};
use rowsync_storage::DEFAULT_METADATA_SUFFIX;
use std::collections::BTreeMap;

/// Settings shared by every component of one synchronization context.
///
/// Built once, passed by reference; nothing here is global.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Participating tables and their strategies.
    pub strategies: SyncStrategies,
    /// Suffix of metadata tables.
    pub metadata_suffix: String,
    /// Fingerprint algorithm.
    pub hash_algorithm: HashAlgorithm,
    /// Scan tables for application writes before enumerating.
    pub detect_changes: bool,
    /// How often a commit failing with a retryable adapter error is tried.
    pub max_commit_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            strategies: SyncStrategies::default(),
            metadata_suffix: DEFAULT_METADATA_SUFFIX.to_string(),
            hash_algorithm: HashAlgorithm::default(),
            detect_changes: true,
            max_commit_attempts: 3,
        }
    }
}

impl SyncSettings {
    /// Creates settings for the given strategies.
    pub fn new(strategies: SyncStrategies) -> Self {
        Self {
            strategies,
            ..Self::default()
        }
    }

    /// Builds settings from recognized `key = value` options.
    ///
    /// | Key | Value |
    /// |-----|-------|
    /// | `tables` | comma-separated table names |
    /// | `direction` | default direction |
    /// | `conflict_policy` | default policy |
    /// | `table.<name>.direction` | per-table direction |
    /// | `table.<name>.conflict_policy` | per-table policy |
    /// | `metadata_suffix` | metadata table suffix |
    /// | `hash_algorithm` | `sha256`, `sha384` or `sha512` |
    /// | `detect_changes` | `true` or `false` |
    /// | `max_commit_attempts` | positive integer |
    ///
    /// # Errors
    ///
    /// Unknown keys and unparsable values are configuration errors.
    pub fn from_options<I, K, V>(options: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        let mut tables: Vec<String> = Vec::new();
        let mut default = TableSyncStrategy::default();
        let mut overrides: BTreeMap<String, (Option<SyncDirection>, Option<ConflictPolicy>)> =
            BTreeMap::new();

        for (key, value) in options {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            match key {
                "tables" => {
                    tables.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(String::from),
                    );
                }
                "direction" => default.direction = parse_direction(value)?,
                "conflict_policy" => default.conflict_policy = parse_policy(value)?,
                "metadata_suffix" => settings.metadata_suffix = value.to_string(),
                "hash_algorithm" => settings.hash_algorithm = value.parse()?,
                "detect_changes" => {
                    settings.detect_changes = value
                        .parse()
                        .map_err(|_| CoreError::config(format!("detect_changes: {value}")))?;
                }
                "max_commit_attempts" => {
                    settings.max_commit_attempts = value
                        .parse()
                        .map_err(|_| CoreError::config(format!("max_commit_attempts: {value}")))?;
                }
                other => {
                    let Some((table, field)) = other
                        .strip_prefix("table.")
                        .and_then(|rest| rest.rsplit_once('.'))
                    else {
                        return Err(CoreError::config(format!("unknown option: {other}")));
                    };
                    let entry = overrides.entry(table.to_string()).or_default();
                    match field {
                        "direction" => entry.0 = Some(parse_direction(value)?),
                        "conflict_policy" => entry.1 = Some(parse_policy(value)?),
                        _ => return Err(CoreError::config(format!("unknown option: {other}"))),
                    }
                }
            }
        }

        let mut strategies = SyncStrategies::new(tables).with_default(default);
        for (table, (direction, policy)) in overrides {
            let strategy = TableSyncStrategy::new(
                direction.unwrap_or(default.direction),
                policy.unwrap_or(default.conflict_policy),
            );
            strategies = strategies.with_table(table, strategy);
        }
        settings.strategies = strategies;
        settings.validate()?;
        Ok(settings)
    }

    /// Sets the strategies.
    #[must_use]
    pub fn with_strategies(mut self, strategies: SyncStrategies) -> Self {
        self.strategies = strategies;
        self
    }

    /// Sets the metadata suffix.
    #[must_use]
    pub fn with_metadata_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.metadata_suffix = suffix.into();
        self
    }

    /// Sets the hash algorithm.
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

    /// Sets the commit attempt limit.
    #[must_use]
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts;
        self
    }

    /// Returns the participating tables.
    pub fn tables(&self) -> &[String] {
        self.strategies.tables()
    }

    /// Returns a fingerprinter for the configured algorithm.
    pub fn fingerprinter(&self) -> Fingerprinter {
        Fingerprinter::new(self.hash_algorithm)
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] listing every problem found.
    pub fn validate(&self) -> CoreResult<()> {
        let mut problems = self.strategies.problems();
        if self.metadata_suffix.is_empty() {
            problems.push("metadata suffix must not be empty".to_string());
        }
        if self.max_commit_attempts == 0 {
            problems.push("max_commit_attempts must be at least 1".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Configuration(problems.join("; ")))
        }
    }
}

fn parse_direction(value: &str) -> CoreResult<SyncDirection> {
    value.parse().map_err(CoreError::Configuration)
}

fn parse_policy(value: &str) -> CoreResult<ConflictPolicy> {
    value.parse().map_err(CoreError::Configuration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.metadata_suffix, "_sync");
        assert_eq!(settings.hash_algorithm, HashAlgorithm::Sha256);
        assert!(settings.detect_changes);
        assert_eq!(settings.max_commit_attempts, 3);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn builder_pattern() {
        let settings = SyncSettings::new(SyncStrategies::new(["categories"]))
            .with_hash_algorithm(HashAlgorithm::Sha512)
            .with_detect_changes(false)
            .with_max_commit_attempts(5);
        assert!(settings.validate().is_ok());
        assert_eq!(settings.tables(), ["categories".to_string()]);
        assert_eq!(settings.fingerprinter().algorithm(), HashAlgorithm::Sha512);
    }

    #[test]
    fn invalid_values_rejected() {
        let settings = SyncSettings::new(SyncStrategies::new(["t"]))
            .with_metadata_suffix("")
            .with_max_commit_attempts(0);
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, CoreError::Configuration(ref m) if m.contains("suffix")));
    }

    #[test]
    fn from_options() {
        let settings = SyncSettings::from_options([
            ("tables", "categories, products"),
            ("table.products.direction", "server-to-client"),
            ("conflict_policy", "client-wins"),
            ("hash_algorithm", "sha384"),
            ("detect_changes", "false"),
        ])
        .unwrap();
        assert_eq!(settings.tables().len(), 2);
        assert_eq!(
            settings.strategies.for_table("categories").conflict_policy,
            ConflictPolicy::ClientWins
        );
        let products = settings.strategies.for_table("products");
        assert_eq!(products.direction, SyncDirection::ServerToClient);
        assert_eq!(products.conflict_policy, ConflictPolicy::ClientWins);
        assert_eq!(settings.hash_algorithm, HashAlgorithm::Sha384);
        assert!(!settings.detect_changes);
    }

    #[test]
    fn from_options_rejects_unknown() {
        assert!(SyncSettings::from_options([("tables", "a"), ("colour", "blue")]).is_err());
        assert!(SyncSettings::from_options([("tables", "a"), ("direction", "up-ish")]).is_err());
        assert!(SyncSettings::from_options([("tables", "a"), ("table.a.size", "1")]).is_err());
        assert!(SyncSettings::from_options(Vec::<(String, String)>::new()).is_err());
    }
}
