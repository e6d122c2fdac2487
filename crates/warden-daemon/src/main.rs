use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use warden_coordination::{CoordinationStore, SqliteLeaseElection, SqliteStore};
use warden_core::config::WardenConfig;
use warden_scheduler::{leader::peek_status, schedule, CommandJob, JobExecutor, JobLeader};

mod report;

#[derive(Parser)]
#[command(name = "warden", version, about = "Cluster-wide recurring job runner")]
struct Cli {
    /// Path to warden.toml (falls back to WARDEN_CONFIG, then ~/.warden/warden.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Join the election for every configured job and run them as leader (default).
    Run,
    /// Print the last persisted status record of a job.
    Status { job: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "warden=info,warden_scheduler=info,warden_coordination=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit --config > WARDEN_CONFIG env > ~/.warden/warden.toml
    let config_path = cli.config.or_else(|| std::env::var("WARDEN_CONFIG").ok());
    // a missing file yields defaults; a malformed or invalid one is fatal
    let config = WardenConfig::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("config load failed [{}]: {}", e.code(), e))?;

    config.store.ensure_parent_dir()?;
    info!(path = %config.store.path, "opening coordination store");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Status { job } => {
            let store = SqliteStore::open(&config.store.path)?;
            let status = peek_status(&store, &job).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report::status_json(&job, status.as_ref()))?
            );
            Ok(())
        }
    }
}

async fn run(config: WardenConfig) -> anyhow::Result<()> {
    if config.jobs.is_empty() {
        warn!("no jobs configured, nothing to do");
        return Ok(());
    }

    let store: Arc<dyn CoordinationStore> = Arc::new(SqliteStore::open(&config.store.path)?);
    // one engine for every job; the registry is keyed by job name
    let executor = Arc::new(JobExecutor::from_config(&config.executor));

    let mut leaders = Vec::with_capacity(config.jobs.len());
    for job in &config.jobs {
        let election = SqliteLeaseElection::open(&config.store.path, &config.node.id, &config.election)?;
        let leader = JobLeader::new(
            Arc::new(CommandJob::new(&job.name, &job.command)),
            schedule::from_spec(&job.schedule),
            Arc::clone(&executor),
            Arc::clone(&store),
            Arc::new(election),
        );
        leader.start().await?;
        info!(job = %job.name, schedule = ?job.schedule, "joined job election");
        leaders.push(leader);
    }

    info!(node = %config.node.id, jobs = leaders.len(), "warden running");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    for leader in &leaders {
        leader.stop().await;
    }
    executor.shutdown();
    info!("warden stopped");
    Ok(())
}
