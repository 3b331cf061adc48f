//! Journal helpers for sync runs.

use std::collections::BTreeSet;
use std::sync::Arc;

use tidemark_journal::{FileJournalStore, JournalError, JournalStore};

use crate::module::{ResourceModule, Scope};

/// Open the file journal, or run without one when the directory is unusable.
pub fn open(journal_dir: &str) -> Option<Arc<dyn JournalStore>> {
    match FileJournalStore::new(journal_dir) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!(journal_dir, error = %e, "Failed to initialize journal; runs will not be recorded");
            None
        }
    }
}

/// Bump `proposed` past every tag already journaled for the module's load
/// and cleanup scopes, so a run's tag is strictly greater than any earlier
/// run's over the same scope.
pub fn monotonic_tag(
    journal: &dyn JournalStore,
    module: &dyn ResourceModule,
    scopes: &[Scope],
    proposed: i64,
) -> Result<i64, JournalError> {
    let name = module.name();
    let mut ids: BTreeSet<String> = scopes.iter().map(|s| s.id.clone()).collect();
    ids.extend(module.cleanup_scopes(scopes).into_iter().map(|s| s.id));

    let mut latest: Option<i64> = None;
    for id in &ids {
        if let Some(tag) = journal.latest_tag(name, Some(id))? {
            latest = Some(latest.map_or(tag, |l| l.max(tag)));
        }
    }

    match latest {
        Some(last) if proposed <= last => {
            tracing::info!(module = name, proposed, last, "Sync tag bumped past the last journaled run");
            Ok(last + 1)
        }
        _ => Ok(proposed),
    }
}
