//! Incremental recorder for a sync run.
//!
//! ```no_run
//! # use tidemark_journal::{RunRecorder, ScopeOutcome};
//! let mut recorder = RunRecorder::new("ec2", 1_700_000_000, vec!["acct/us-east-1".into()]);
//! recorder.record_scope(ScopeOutcome::loaded("acct/us-east-1", 12, 12, 0, 1));
//! recorder.record_cleanup("acct/us-east-1", "EC2SecurityGroup", 2, 3, None);
//! let run = recorder.finalize().unwrap();
//! assert!(run.content_hash.is_some());
//! ```

use chrono::Utc;

use crate::{CleanupOutcome, RunId, RunStatus, ScopeOutcome, ScopeStatus, SyncRun};

/// Builds a [`SyncRun`] while the orchestrator works through it.
pub struct RunRecorder {
    run: SyncRun,
    aborted: bool,
}

impl RunRecorder {
    /// Start recording a run of `module` over `scopes`.
    pub fn new(module: &str, update_tag: i64, scopes: Vec<String>) -> Self {
        Self {
            run: SyncRun {
                id: RunId::new(),
                module: module.to_string(),
                scopes,
                update_tag,
                outcomes: Vec::new(),
                cleanups: Vec::new(),
                status: RunStatus::Completed,
                started_at: Utc::now(),
                completed_at: None,
                content_hash: None,
            },
            aborted: false,
        }
    }

    /// The run ID (available before finalization).
    pub fn id(&self) -> RunId {
        self.run.id
    }

    pub fn record_scope(&mut self, outcome: ScopeOutcome) {
        self.run.outcomes.push(outcome);
    }

    pub fn record_cleanup(
        &mut self,
        scope: &str,
        label: &str,
        nodes_deleted: usize,
        rels_deleted: usize,
        error: Option<String>,
    ) {
        self.run.cleanups.push(CleanupOutcome {
            scope: scope.to_string(),
            label: label.to_string(),
            nodes_deleted,
            rels_deleted,
            error,
        });
    }

    /// Mark the run as stopped before cleanup.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Derive the run status, stamp completion, and compute the content hash.
    pub fn finalize(mut self) -> Result<SyncRun, serde_json::Error> {
        let failed = self
            .run
            .outcomes
            .iter()
            .any(|o| o.status != ScopeStatus::Loaded)
            || self.run.cleanups.iter().any(|c| c.error.is_some());
        self.run.status = if self.aborted {
            RunStatus::Aborted
        } else if failed {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
        self.run.completed_at = Some(Utc::now());
        self.run.content_hash = Some(self.run.compute_hash()?);
        Ok(self.run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_run_completes() {
        let mut recorder = RunRecorder::new("ec2", 3, vec!["a".into()]);
        recorder.record_scope(ScopeOutcome::loaded("a", 4, 4, 0, 1));
        recorder.record_cleanup("a", "EC2SecurityGroup", 1, 0, None);
        let run = recorder.finalize().unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.outcomes.len(), 1);
        assert!(run.completed_at.is_some());
        assert!(run.verify_integrity());
    }

    #[test]
    fn failed_scope_makes_run_partial() {
        let mut recorder = RunRecorder::new("ec2", 3, vec!["a".into(), "b".into()]);
        recorder.record_scope(ScopeOutcome::loaded("a", 4, 4, 0, 1));
        recorder.record_scope(ScopeOutcome::failed("b", 2, "fetch: timeout"));
        let run = recorder.finalize().unwrap();
        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(run.outcomes[1].error.as_deref(), Some("fetch: timeout"));
    }

    #[test]
    fn abort_wins_over_partial() {
        let mut recorder = RunRecorder::new("ec2", 3, vec!["a".into(), "b".into()]);
        recorder.record_scope(ScopeOutcome::failed("a", 1, "load"));
        recorder.record_scope(ScopeOutcome::skipped("b"));
        recorder.abort();
        assert_eq!(recorder.finalize().unwrap().status, RunStatus::Aborted);
    }
}
