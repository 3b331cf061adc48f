//! Tidemark Journal: tamper-evident record of sync runs.
//!
//! Every orchestrator run produces a [`SyncRun`]: which module ran, over
//! which scopes, with which sync tag, how each scope's load went and what
//! each cleanup pass deleted. Runs are content-hashed with BLAKE3 when
//! finalized and stored as JSON files organized by date.

pub mod hash;
pub mod recorder;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use recorder::RunRecorder;
pub use store::{FileJournalStore, JournalError, JournalQuery, JournalStore};

// ── Core Types ───────────────────────────────────────────────────

/// Unique identifier for a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How one scope's fetch/transform/load went.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
    Loaded,
    Failed,
    /// Never attempted because the run aborted first.
    Skipped,
}

/// Outcome of one scope within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeOutcome {
    /// Scope identity, e.g. `123456789012/us-east-1`.
    pub scope: String,
    pub status: ScopeStatus,
    /// Records loaded across every schema of the module.
    pub records: usize,
    pub nodes_written: usize,
    /// Relationship targets that could not be found.
    pub unresolved: usize,
    /// Load attempts, including retries.
    pub attempts: u32,
    /// Stage and message of the failure, if any.
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ScopeOutcome {
    pub fn loaded(
        scope: impl Into<String>,
        records: usize,
        nodes_written: usize,
        unresolved: usize,
        attempts: u32,
    ) -> Self {
        Self {
            scope: scope.into(),
            status: ScopeStatus::Loaded,
            records,
            nodes_written,
            unresolved,
            attempts,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(scope: impl Into<String>, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            status: ScopeStatus::Failed,
            attempts,
            error: Some(error.into()),
            ..Self::loaded(scope, 0, 0, 0, attempts)
        }
    }

    pub fn skipped(scope: impl Into<String>) -> Self {
        Self {
            status: ScopeStatus::Skipped,
            ..Self::loaded(scope, 0, 0, 0, 0)
        }
    }
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupOutcome {
    pub scope: String,
    pub label: String,
    pub nodes_deleted: usize,
    pub rels_deleted: usize,
    pub error: Option<String>,
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every scope loaded and every cleanup ran.
    Completed,
    /// Some scopes failed; cleanup ran only where allowed.
    Partial,
    /// The run stopped on a failure and skipped cleanup.
    Aborted,
}

/// The complete record of one module sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRun {
    pub id: RunId,
    /// Resource module name, e.g. `ec2`.
    pub module: String,
    /// Scopes the run intended to process.
    pub scopes: Vec<String>,
    pub update_tag: i64,
    pub outcomes: Vec<ScopeOutcome>,
    pub cleanups: Vec<CleanupOutcome>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// BLAKE3 content hash (hex), set on finalization.
    pub content_hash: Option<String>,
}

impl SyncRun {
    /// Compute the BLAKE3 hash of the run's content.
    /// The hash covers all fields except `content_hash` itself.
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        hash::compute_run_hash(self)
    }

    /// Verify that the stored content_hash matches a freshly computed hash.
    pub fn verify_integrity(&self) -> bool {
        match (&self.content_hash, self.compute_hash()) {
            (Some(stored), Ok(computed)) => *stored == computed,
            _ => false,
        }
    }

    /// Whether the run loaded or cleaned the given scope identity.
    pub fn covers(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope) || self.cleanups.iter().any(|c| c.scope == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_load_and_cleanup_scopes() {
        let mut recorder = RunRecorder::new("ec2", 7, vec!["111/us-east-1".to_string()]);
        recorder.record_scope(ScopeOutcome::loaded("111/us-east-1", 1, 1, 0, 1));
        recorder.record_cleanup("111", "EC2SecurityGroup", 0, 0, None);
        let run = recorder.finalize().unwrap();

        assert!(run.covers("111/us-east-1"));
        assert!(run.covers("111"));
        assert!(!run.covers("111/eu-west-1"));
    }
}
