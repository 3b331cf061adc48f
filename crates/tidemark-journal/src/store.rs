//! Journal storage: trait + file-backed implementation.
//!
//! Runs are stored as pretty JSON files organized by start date and run ID.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::{RunId, SyncRun};

/// Errors that can occur during journal storage operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Sync run not found: {0}")]
    NotFound(RunId),

    #[error("Integrity check failed for sync run {0}: stored hash does not match content")]
    IntegrityViolation(RunId),

    #[error("Sync run has no content hash (not finalized)")]
    NotFinalized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Query parameters for listing runs.
#[derive(Debug, Default)]
pub struct JournalQuery {
    pub module: Option<String>,
    /// Only runs that loaded or cleaned this scope identity.
    pub scope: Option<String>,
    /// Only include runs started at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include runs started at or before this time.
    pub to: Option<DateTime<Utc>>,
}

/// Trait for journal persistence backends.
pub trait JournalStore: Send + Sync {
    /// Store a finalized run. Returns an error if the run has no content hash.
    fn save(&self, run: &SyncRun) -> Result<(), JournalError>;

    /// Retrieve a run by ID, verifying integrity.
    fn get(&self, id: RunId) -> Result<SyncRun, JournalError>;

    /// List intact runs matching the query, ordered by started_at descending.
    fn list(&self, query: &JournalQuery) -> Result<Vec<SyncRun>, JournalError>;

    /// Highest sync tag recorded for a module, optionally narrowed to a scope.
    fn latest_tag(&self, module: &str, scope: Option<&str>) -> Result<Option<i64>, JournalError> {
        let query = JournalQuery {
            module: Some(module.to_string()),
            scope: scope.map(str::to_string),
            ..Default::default()
        };
        Ok(self.list(&query)?.iter().map(|run| run.update_tag).max())
    }
}

/// Journal kept as one pretty-printed JSON file per run, partitioned by the
/// run's start date:
///
/// ```text
/// {root}/2024/01/15/{run_id}.json
/// ```
pub struct FileJournalStore {
    root: PathBuf,
}

impl FileJournalStore {
    /// Open a journal at `root`, creating the directory when missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let store = Self { root: root.into() };
        fs::create_dir_all(&store.root)?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run: &SyncRun) -> PathBuf {
        self.root
            .join(run.started_at.format("%Y/%m/%d").to_string())
            .join(format!("{}.json", run.id))
    }

    /// Every `.json` file under the root, depth-first.
    fn entries(&self) -> Result<Vec<PathBuf>, JournalError> {
        let mut pending = vec![self.root.clone()];
        let mut files = Vec::new();
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)?.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    fn read_run(path: &Path) -> Result<SyncRun, JournalError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

impl JournalStore for FileJournalStore {
    fn save(&self, run: &SyncRun) -> Result<(), JournalError> {
        if run.content_hash.is_none() {
            return Err(JournalError::NotFinalized);
        }

        let path = self.run_path(run);
        if let Some(day_dir) = path.parent() {
            fs::create_dir_all(day_dir)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(run)?)?;

        tracing::debug!(
            run_id = %run.id,
            module = %run.module,
            update_tag = run.update_tag,
            path = %path.display(),
            "Sync run written to journal"
        );
        Ok(())
    }

    fn get(&self, id: RunId) -> Result<SyncRun, JournalError> {
        let wanted = format!("{id}.json");
        let path = self
            .entries()?
            .into_iter()
            .find(|p| p.file_name().is_some_and(|name| name == wanted.as_str()))
            .ok_or(JournalError::NotFound(id))?;

        let run = Self::read_run(&path)?;
        if run.verify_integrity() {
            Ok(run)
        } else {
            Err(JournalError::IntegrityViolation(id))
        }
    }

    fn list(&self, query: &JournalQuery) -> Result<Vec<SyncRun>, JournalError> {
        let mut runs = Vec::new();
        for path in self.entries()? {
            let run = match Self::read_run(&path) {
                Ok(run) => run,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable journal entry");
                    continue;
                }
            };
            if !run.verify_integrity() {
                tracing::warn!(run_id = %run.id, path = %path.display(), "Skipping tampered journal entry");
                continue;
            }
            if matches_query(&run, query) {
                runs.push(run);
            }
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }
}

fn matches_query(run: &SyncRun, query: &JournalQuery) -> bool {
    if let Some(module) = &query.module {
        if &run.module != module {
            return false;
        }
    }
    if let Some(scope) = &query.scope {
        if !run.covers(scope) {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if &run.started_at < from {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if &run.started_at > to {
            return false;
        }
    }
    true
}
