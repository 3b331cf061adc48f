//! Configuration for sync runs.

use serde::Deserialize;

/// What a run does when one scope's fetch, transform, or load fails.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScopeFailurePolicy {
    /// Stop launching scopes and skip cleanup.
    #[default]
    Abort,
    /// Record the failure and continue with the remaining scopes.
    Skip,
}

/// Orchestrator settings.
///
/// Loaded from the `tidemark.toml` `[sync]` section or
/// `TIDEMARK__SYNC__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Rows per store statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Scopes processed at the same time within one run.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_scopes: usize,

    #[serde(default)]
    pub failure_policy: ScopeFailurePolicy,

    /// Run cleanup over the successfully loaded scopes even when others
    /// failed. Only honored with the `skip` policy.
    #[serde(default)]
    pub cleanup_on_partial: bool,

    /// Extra attempts for a load or cleanup call that failed in the store.
    #[serde(default)]
    pub load_retries: u32,

    /// Directory for the sync-run journal.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: String,
}

fn default_batch_size() -> usize {
    tidemark_graph::DEFAULT_BATCH_SIZE
}

fn default_max_concurrent() -> usize {
    1
}

fn default_journal_dir() -> String {
    "./journal".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_scopes: default_max_concurrent(),
            failure_policy: ScopeFailurePolicy::default(),
            cleanup_on_partial: false,
            load_retries: 0,
            journal_dir: default_journal_dir(),
        }
    }
}

/// Inputs of the EC2 module.
///
/// Loaded from the `[ec2]` section or `TIDEMARK__EC2__` environment
/// variables; command-line flags override it.
#[derive(Debug, Clone, Deserialize)]
pub struct Ec2Settings {
    #[serde(default)]
    pub account_id: String,

    #[serde(default)]
    pub regions: Vec<String>,

    /// Directory holding `{region}.json` snapshots.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
}

fn default_snapshot_dir() -> String {
    "./snapshots".to_string()
}

impl Default for Ec2Settings {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            regions: Vec::new(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SyncSettings::default();
        assert_eq!(settings.batch_size, 1000);
        assert_eq!(settings.max_concurrent_scopes, 1);
        assert_eq!(settings.failure_policy, ScopeFailurePolicy::Abort);
        assert!(!settings.cleanup_on_partial);
        assert_eq!(settings.load_retries, 0);
        assert_eq!(settings.journal_dir, "./journal");
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let settings: SyncSettings =
            serde_json::from_value(serde_json::json!({"failure_policy": "skip", "load_retries": 2}))
                .unwrap();
        assert_eq!(settings.failure_policy, ScopeFailurePolicy::Skip);
        assert_eq!(settings.load_retries, 2);
        assert_eq!(settings.batch_size, 1000);
    }

    #[test]
    fn test_ec2_settings_default_snapshot_dir() {
        assert_eq!(Ec2Settings::default().snapshot_dir, "./snapshots");
        let settings: Ec2Settings =
            serde_json::from_value(serde_json::json!({"account_id": "111", "regions": ["us-east-1"]}))
                .unwrap();
        assert_eq!(settings.snapshot_dir, "./snapshots");
        assert_eq!(settings.regions, vec!["us-east-1".to_string()]);
    }
}
