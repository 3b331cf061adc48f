//! Sync orchestration: fetch, transform and load every scope, then clean up.
//!
//! Scopes run as tokio tasks bounded by a semaphore of
//! `max_concurrent_scopes` permits. Every task is joined before the first
//! cleanup call, so cleanup never races a load of the same run.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use tidemark_core::SyncContext;
use tidemark_graph::{cleanup_batched, load_batched, CleanupReport, GraphError, GraphStore, LoadReport};
use tidemark_journal::{JournalStore, RunId, RunRecorder, RunStatus, ScopeOutcome, ScopeStatus};

use crate::config::{ScopeFailurePolicy, SyncSettings};
use crate::error::{Result, Stage, SyncError};
use crate::module::{ResourceModule, Scope};
use crate::scope_lock::ScopeLocks;

/// How one scope went.
#[derive(Debug)]
pub struct ScopeReport {
    pub scope: String,
    pub status: ScopeStatus,
    /// One report per schema, in load order, for the schemas that loaded.
    pub loads: Vec<LoadReport>,
    /// Highest number of attempts any single store call needed.
    pub attempts: u32,
    pub error: Option<SyncError>,
}

impl ScopeReport {
    fn new(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            status: ScopeStatus::Skipped,
            loads: Vec::new(),
            attempts: 0,
            error: None,
        }
    }

    fn failed(scope: &str, error: SyncError) -> Self {
        Self {
            status: ScopeStatus::Failed,
            error: Some(error),
            ..Self::new(scope)
        }
    }

    pub fn records(&self) -> usize {
        self.loads.iter().map(|l| l.records).sum()
    }

    pub fn nodes_written(&self) -> usize {
        self.loads.iter().map(|l| l.nodes_written).sum()
    }

    pub fn unresolved(&self) -> usize {
        self.loads.iter().map(LoadReport::unresolved).sum()
    }

    fn to_outcome(&self) -> ScopeOutcome {
        match (self.status, &self.error) {
            (ScopeStatus::Loaded, _) => ScopeOutcome::loaded(
                &self.scope,
                self.records(),
                self.nodes_written(),
                self.unresolved(),
                self.attempts,
            ),
            (ScopeStatus::Failed, Some(e)) => {
                ScopeOutcome::failed(&self.scope, self.attempts, e.to_string())
            }
            (ScopeStatus::Failed, None) => {
                ScopeOutcome::failed(&self.scope, self.attempts, "unknown failure")
            }
            (ScopeStatus::Skipped, _) => ScopeOutcome::skipped(&self.scope),
        }
    }
}

/// One cleanup call of a run.
#[derive(Debug)]
pub struct CleanupEntry {
    pub scope: String,
    pub label: String,
    pub outcome: std::result::Result<CleanupReport, SyncError>,
}

/// Everything a module sync did.
#[derive(Debug)]
pub struct SyncReport {
    pub module: String,
    pub update_tag: i64,
    pub status: RunStatus,
    pub scopes: Vec<ScopeReport>,
    pub cleanups: Vec<CleanupEntry>,
    /// Cleanup was withheld because scopes failed.
    pub cleanup_skipped: bool,
    /// Journal entry, when one was written.
    pub run_id: Option<RunId>,
}

impl SyncReport {
    pub fn scope(&self, id: &str) -> Option<&ScopeReport> {
        self.scopes.iter().find(|s| s.scope == id)
    }

    /// Every failure of the run, scopes first.
    pub fn failures(&self) -> impl Iterator<Item = &SyncError> {
        self.scopes
            .iter()
            .filter_map(|s| s.error.as_ref())
            .chain(self.cleanups.iter().filter_map(|c| c.outcome.as_ref().err()))
    }

    pub fn nodes_deleted(&self) -> usize {
        self.cleanups
            .iter()
            .filter_map(|c| c.outcome.as_ref().ok())
            .map(|r| r.nodes_deleted)
            .sum()
    }
}

/// Drives resource modules against one graph store.
pub struct Orchestrator {
    store: Arc<dyn GraphStore>,
    settings: SyncSettings,
    locks: ScopeLocks,
    journal: Option<Arc<dyn JournalStore>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn GraphStore>, settings: SyncSettings) -> Self {
        Self {
            store,
            settings,
            locks: ScopeLocks::new(),
            journal: None,
        }
    }

    /// Record every run in the given journal.
    pub fn with_journal(mut self, journal: Arc<dyn JournalStore>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Share a lock registry with other orchestrators in this process.
    pub fn with_locks(mut self, locks: ScopeLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Sync `module` over `scopes` with the run's context.
    ///
    /// Scope failures never surface as `Err`: they are logged, journaled and
    /// reported in the returned [`SyncReport`]. `Err` is reserved for a
    /// module whose schemas fail validation.
    pub async fn sync(
        &self,
        module: Arc<dyn ResourceModule>,
        scopes: &[Scope],
        ctx: &SyncContext,
    ) -> Result<SyncReport> {
        let name = module.name().to_string();
        for schema in module.schemas() {
            schema.validate().map_err(|source| SyncError::InvalidModule {
                module: name.clone(),
                source,
            })?;
        }

        let _guard = self.locks.acquire(lock_keys(module.as_ref(), scopes)).await;

        let update_tag = ctx.update_tag();
        tracing::info!(
            module = %name,
            update_tag,
            scopes = scopes.len(),
            max_concurrent = self.settings.max_concurrent_scopes,
            "Sync started"
        );

        let mut recorder = RunRecorder::new(
            &name,
            update_tag,
            scopes.iter().map(|s| s.id.clone()).collect(),
        );

        // Barrier: every scope has finished (or is known-failed) past this point.
        let scope_reports = self.load_scopes(&module, scopes, ctx).await;
        for report in &scope_reports {
            recorder.record_scope(report.to_outcome());
        }

        let any_failed = scope_reports
            .iter()
            .any(|r| r.status != ScopeStatus::Loaded);
        let policy = self.settings.failure_policy;
        let aborted = any_failed && policy == ScopeFailurePolicy::Abort;
        let run_cleanup = !any_failed
            || (policy == ScopeFailurePolicy::Skip && self.settings.cleanup_on_partial);

        let mut cleanups = Vec::new();
        if run_cleanup {
            let (loaded, unloaded): (Vec<Scope>, Vec<Scope>) =
                scopes.iter().cloned().partition(|s| {
                    scope_reports
                        .iter()
                        .any(|r| r.scope == s.id && r.status == ScopeStatus::Loaded)
                });
            // A cleanup scope that also covers an unloaded scope would delete
            // that scope's current data along with the stale nodes.
            let withheld: BTreeSet<String> = unloaded
                .iter()
                .flat_map(|s| module.cleanup_scopes(std::slice::from_ref(s)))
                .map(|s| s.id)
                .collect();
            cleanups = self
                .cleanup_scopes(module.as_ref(), &loaded, &withheld, ctx)
                .await;
            for entry in &cleanups {
                match &entry.outcome {
                    Ok(r) => recorder.record_cleanup(
                        &entry.scope,
                        &entry.label,
                        r.nodes_deleted,
                        r.rels_deleted,
                        None,
                    ),
                    Err(e) => recorder.record_cleanup(
                        &entry.scope,
                        &entry.label,
                        0,
                        0,
                        Some(e.to_string()),
                    ),
                }
            }
        } else {
            tracing::warn!(
                module = %name,
                update_tag,
                policy = ?policy,
                "Skipping cleanup: not every scope loaded"
            );
        }
        if aborted {
            recorder.abort();
        }

        let cleanup_failed = cleanups.iter().any(|c| c.outcome.is_err());
        let status = if aborted {
            RunStatus::Aborted
        } else if any_failed || cleanup_failed {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        let run_id = self.journal_run(recorder);
        let report = SyncReport {
            module: name,
            update_tag,
            status,
            scopes: scope_reports,
            cleanups,
            cleanup_skipped: !run_cleanup,
            run_id,
        };

        tracing::info!(
            module = %report.module,
            update_tag,
            status = ?report.status,
            failures = report.failures().count(),
            nodes_deleted = report.nodes_deleted(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Launch one task per scope, at most `max_concurrent_scopes` at a time,
    /// and join them all.
    async fn load_scopes(
        &self,
        module: &Arc<dyn ResourceModule>,
        scopes: &[Scope],
        ctx: &SyncContext,
    ) -> Vec<ScopeReport> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_scopes.max(1)));
        let halted = Arc::new(AtomicBool::new(false));
        let abort_on_failure = self.settings.failure_policy == ScopeFailurePolicy::Abort;
        let mut handles = Vec::with_capacity(scopes.len());

        for scope in scopes {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    handles.push((scope.id.clone(), None));
                    continue;
                }
            };
            if halted.load(Ordering::SeqCst) {
                tracing::info!(scope = %scope.id, "Run aborted; scope not started");
                handles.push((scope.id.clone(), None));
                continue;
            }

            let store = self.store.clone();
            let module = module.clone();
            let settings = self.settings.clone();
            let scope_ctx = scope.context(ctx);
            let scope = scope.clone();
            let halted = halted.clone();
            let id = scope.id.clone();

            let handle = tokio::spawn(async move {
                let report = run_scope(store.as_ref(), module.as_ref(), &scope, &scope_ctx, &settings).await;
                if report.error.is_some() && abort_on_failure {
                    halted.store(true, Ordering::SeqCst);
                }
                drop(permit);
                report
            });
            handles.push((id, Some(handle)));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (scope, handle) in handles {
            let report = match handle {
                Some(handle) => match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::error!(scope = %scope, error = %e, "Scope task panicked");
                        ScopeReport::failed(
                            &scope,
                            SyncError::Task {
                                scope: scope.clone(),
                                reason: e.to_string(),
                            },
                        )
                    }
                },
                None => ScopeReport::new(&scope),
            };
            reports.push(report);
        }
        reports
    }

    /// Clean up every cleanup scope in the module's order, except those in
    /// `withheld`. A failed call stops the remaining schemas of that scope.
    async fn cleanup_scopes(
        &self,
        module: &dyn ResourceModule,
        loaded: &[Scope],
        withheld: &BTreeSet<String>,
        ctx: &SyncContext,
    ) -> Vec<CleanupEntry> {
        let mut entries = Vec::new();
        let store = self.store.as_ref();
        let batch_size = self.settings.batch_size;

        for scope in module.cleanup_scopes(loaded) {
            if withheld.contains(&scope.id) {
                tracing::warn!(
                    module = module.name(),
                    scope = %scope.id,
                    "Cleanup withheld: scope also covers a scope that did not load"
                );
                continue;
            }
            let scope_ctx = scope.context(ctx);
            for schema in module.cleanup_order() {
                let mut attempts = 0;
                let outcome = with_retries(self.settings.load_retries, &mut attempts, || {
                    cleanup_batched(store, schema, &scope_ctx, batch_size)
                })
                .await
                .map_err(|source| SyncError::Store {
                    stage: Stage::Cleanup,
                    scope: scope.id.clone(),
                    label: schema.label.clone(),
                    source,
                });

                let failed = outcome.is_err();
                if let Err(e) = &outcome {
                    tracing::error!(
                        scope = %scope.id,
                        label = %schema.label,
                        error = %e,
                        "Cleanup failed; remaining schemas of this scope are left for the next run"
                    );
                }
                entries.push(CleanupEntry {
                    scope: scope.id.clone(),
                    label: schema.label.clone(),
                    outcome,
                });
                if failed {
                    break;
                }
            }
        }
        entries
    }

    fn journal_run(&self, recorder: RunRecorder) -> Option<RunId> {
        let journal = self.journal.as_ref()?;
        let run = match recorder.finalize() {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to finalize sync run record");
                return None;
            }
        };
        match journal.save(&run) {
            Ok(()) => {
                tracing::info!(run_id = %run.id, "Sync run journaled");
                Some(run.id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to journal sync run");
                None
            }
        }
    }
}

/// Fetch, transform and load one scope.
async fn run_scope(
    store: &dyn GraphStore,
    module: &dyn ResourceModule,
    scope: &Scope,
    ctx: &SyncContext,
    settings: &SyncSettings,
) -> ScopeReport {
    let mut report = ScopeReport::new(&scope.id);
    match load_scope(store, module, scope, ctx, settings, &mut report).await {
        Ok(()) => {
            report.status = ScopeStatus::Loaded;
            tracing::info!(
                module = module.name(),
                scope = %scope.id,
                records = report.records(),
                nodes = report.nodes_written(),
                unresolved = report.unresolved(),
                "Scope loaded"
            );
        }
        Err(e) => {
            tracing::error!(
                module = module.name(),
                scope = %scope.id,
                stage = ?e.stage(),
                error = %e,
                "Scope failed"
            );
            report.status = ScopeStatus::Failed;
            report.error = Some(e);
        }
    }
    report
}

async fn load_scope(
    store: &dyn GraphStore,
    module: &dyn ResourceModule,
    scope: &Scope,
    ctx: &SyncContext,
    settings: &SyncSettings,
    report: &mut ScopeReport,
) -> Result<()> {
    let raw = module
        .fetch(scope)
        .await
        .map_err(|source| SyncError::Collaborator {
            stage: Stage::Fetch,
            scope: scope.id.clone(),
            source,
        })?;
    tracing::debug!(scope = %scope.id, documents = raw.len(), "Fetched");

    let transformed = module
        .transform(scope, raw)
        .map_err(|source| SyncError::Collaborator {
            stage: Stage::Transform,
            scope: scope.id.clone(),
            source,
        })?;

    for schema in module.schemas() {
        let records = transformed.records(&schema.label);
        let load = with_retries(settings.load_retries, &mut report.attempts, || {
            load_batched(store, schema, records, ctx, settings.batch_size)
        })
        .await
        .map_err(|source| SyncError::Store {
            stage: Stage::Load,
            scope: scope.id.clone(),
            label: schema.label.clone(),
            source,
        })?;
        report.loads.push(load);
    }
    Ok(())
}

/// Lock keys for a run: every load and cleanup scope identity. Keys carry no
/// module name, so modules sharing a cleanup boundary serialize.
fn lock_keys(module: &dyn ResourceModule, scopes: &[Scope]) -> BTreeSet<String> {
    scopes
        .iter()
        .chain(module.cleanup_scopes(scopes).iter())
        .map(|s| s.id.clone())
        .collect()
}

/// Re-run a store call that failed in the store, up to `retries` extra times.
/// Loads are idempotent and cleanups are re-entrant, so a wholesale retry is safe.
async fn with_retries<T, F, Fut>(
    retries: u32,
    attempts: &mut u32,
    mut call: F,
) -> std::result::Result<T, GraphError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, GraphError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        *attempts = (*attempts).max(attempt);
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transaction_failure() && attempt <= retries => {
                tracing::warn!(attempt, retries, error = %e, "Store call failed; retrying");
            }
            Err(e) => return Err(e),
        }
    }
}
