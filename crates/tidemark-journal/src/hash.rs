//! BLAKE3 content hashing for tamper evidence.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{CleanupOutcome, RunId, RunStatus, ScopeOutcome, SyncRun};

/// Hashable view of a SyncRun (excludes content_hash).
#[derive(Serialize)]
struct HashableRun<'a> {
    id: &'a RunId,
    module: &'a str,
    scopes: &'a [String],
    update_tag: i64,
    outcomes: &'a [ScopeOutcome],
    cleanups: &'a [CleanupOutcome],
    status: RunStatus,
    started_at: &'a DateTime<Utc>,
    completed_at: &'a Option<DateTime<Utc>>,
}

/// Serialize every field except `content_hash` to JSON and hash the bytes.
/// Returns the hex-encoded hash.
pub fn compute_run_hash(run: &SyncRun) -> Result<String, serde_json::Error> {
    let hashable = HashableRun {
        id: &run.id,
        module: &run.module,
        scopes: &run.scopes,
        update_tag: run.update_tag,
        outcomes: &run.outcomes,
        cleanups: &run.cleanups,
        status: run.status,
        started_at: &run.started_at,
        completed_at: &run.completed_at,
    };

    let json = serde_json::to_vec(&hashable)?;
    Ok(blake3::hash(&json).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunRecorder;

    #[test]
    fn hash_ignores_stored_hash_and_tracks_content() {
        let mut run = RunRecorder::new("ec2", 7, vec!["a".into()]).finalize().unwrap();
        let original = compute_run_hash(&run).unwrap();

        run.content_hash = Some("anything".into());
        assert_eq!(compute_run_hash(&run).unwrap(), original);

        run.update_tag = 8;
        assert_ne!(compute_run_hash(&run).unwrap(), original);
    }
}
