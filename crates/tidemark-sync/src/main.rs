//! CLI entry point for tidemark-sync.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use tidemark_core::config::load_section;
use tidemark_core::SyncContext;
use tidemark_graph::{GraphClient, GraphConfig, GraphStore, MemoryGraph};
use tidemark_journal::RunStatus;

use tidemark_sync::config::{Ec2Settings, ScopeFailurePolicy, SyncSettings};
use tidemark_sync::modules::ec2::Ec2Module;
use tidemark_sync::snapshot::SnapshotDir;
use tidemark_sync::{journal, Orchestrator, ResourceModule};

#[derive(Parser)]
#[command(name = "tidemark-sync")]
#[command(about = "Sync EC2 security group snapshots into the Tidemark inventory graph")]
struct Cli {
    /// AWS account id (otherwise read from config).
    #[arg(short, long)]
    account: Option<String>,

    /// Region to sync; repeat for several (otherwise read from config).
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Directory holding `{region}.json` snapshots.
    #[arg(long)]
    snapshot_dir: Option<String>,

    /// Sync tag to use instead of the current epoch seconds.
    #[arg(long)]
    update_tag: Option<i64>,

    /// Continue past failed scopes instead of aborting the run.
    #[arg(long)]
    skip_failed: bool,

    /// Load into an in-memory graph instead of Neo4j.
    #[arg(long)]
    dry_run: bool,

    /// Config file prefix (default: tidemark).
    #[arg(short, long, default_value = "tidemark")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut settings: SyncSettings = load_section(&cli.config, "sync")?;
    if cli.skip_failed {
        settings.failure_policy = ScopeFailurePolicy::Skip;
    }
    let ec2: Ec2Settings = load_section(&cli.config, "ec2")?;

    let account = cli.account.clone().unwrap_or(ec2.account_id);
    if account.is_empty() {
        anyhow::bail!("Account id required: set --account or ec2.account_id in config");
    }
    let regions = if cli.regions.is_empty() {
        ec2.regions
    } else {
        cli.regions.clone()
    };
    if regions.is_empty() {
        anyhow::bail!("At least one region required: set --region or ec2.regions in config");
    }
    let snapshot_dir = cli.snapshot_dir.clone().unwrap_or(ec2.snapshot_dir);

    let store: Arc<dyn GraphStore> = if cli.dry_run {
        tracing::info!("Dry run: loading into an in-memory graph");
        Arc::new(MemoryGraph::new())
    } else {
        let graph_config: GraphConfig = load_section(&cli.config, "neo4j")?;
        Arc::new(GraphClient::connect(&graph_config).await?)
    };

    let module: Arc<dyn ResourceModule> = Arc::new(Ec2Module::new(SnapshotDir::new(&snapshot_dir)));
    let scopes = Ec2Module::scopes(&account, &regions);

    let journal = journal::open(&settings.journal_dir);
    let proposed = cli
        .update_tag
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let update_tag = match &journal {
        Some(j) => journal::monotonic_tag(j.as_ref(), module.as_ref(), &scopes, proposed)?,
        None => proposed,
    };

    let mut orchestrator = Orchestrator::new(store, settings);
    if let Some(j) = journal {
        orchestrator = orchestrator.with_journal(j);
    }

    let report = orchestrator
        .sync(module, &scopes, &SyncContext::new(update_tag))
        .await?;

    for scope in &report.scopes {
        tracing::info!(
            scope = %scope.scope,
            status = ?scope.status,
            records = scope.records(),
            nodes = scope.nodes_written(),
            unresolved = scope.unresolved(),
            "Scope summary"
        );
    }
    for failure in report.failures() {
        tracing::error!(error = %failure, "Sync failure");
    }

    match report.status {
        RunStatus::Completed => Ok(()),
        status => anyhow::bail!(
            "Sync of {} finished {:?} with {} failure(s)",
            report.module,
            status,
            report.failures().count()
        ),
    }
}
