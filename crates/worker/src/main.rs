use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_domain::config::{Config, ConfigSeverity};
use relay_domain::run::RunJob;
use relay_kv::{Kv, KvService};
use relay_llm::LlmProvider;
use relay_store::{PgPersistence, RunPersistence, Store};
use relay_tools::ToolRegistry;
use relay_worker::cli::{Cli, Command};
use relay_worker::{JobQueue, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Arc::new(relay_worker::cli::load_config(cli.config.as_ref())?);
    validate(&config)?;

    match cli.command {
        None => run_worker(config, None).await,
        Some(Command::Run { dry_run }) => run_worker(config, dry_run).await,
        Some(Command::Enqueue {
            thread_id,
            project_id,
            run_id,
            account_id,
            agent_id,
            model,
        }) => {
            let kv: Arc<dyn Kv> = Arc::new(KvService::connect(&config.kv)?);
            let queue = JobQueue::new(kv, config.worker.queue_key.clone());
            let job = RunJob {
                run_id: run_id.unwrap_or_else(uuid::Uuid::new_v4),
                thread_id,
                instance_id: String::new(),
                project_id,
                model_name: model,
                agent_id,
                account_id,
                request_id: None,
            };
            queue.enqueue(&job).await?;
            println!("enqueued run {}", job.run_id);
            Ok(())
        }
        Some(Command::Stop { run_id }) => {
            let kv: Arc<dyn Kv> = Arc::new(KvService::connect(&config.kv)?);
            let store = Arc::new(Store::connect(&config.store).await?);
            let persistence: Arc<dyn RunPersistence> = Arc::new(PgPersistence::new(store));
            let known = relay_worker::run_control::stop_run(&kv, &persistence, run_id).await?;
            println!(
                "stop published for {run_id}{}",
                if known { "" } else { " (run not found in db)" }
            );
            Ok(())
        }
        Some(Command::Version) => {
            println!("relay-worker {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_worker(
    config: Arc<Config>,
    dry_run: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let provider = resolve_provider(dry_run)?;
    let registry = Arc::new(ToolRegistry::new());

    let worker = Worker::build(config, provider, registry).await?;
    worker.run_loop().await;
    Ok(())
}

/// The binary ships only the scripted dry-run provider; production
/// deployments embed the worker as a library and link their adapters.
fn resolve_provider(
    dry_run: Option<std::path::PathBuf>,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let Some(path) = dry_run else {
        anyhow::bail!(
            "no LLM provider linked: pass --dry-run <scripts.json> for local replay, \
             or embed relay-worker as a library with a provider adapter"
        );
    };
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    let scripts: Vec<Vec<relay_domain::stream::LlmChunk>> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok(Arc::new(relay_llm::scripted::ScriptedProvider::new(scripts)))
}

fn validate(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relay_worker=debug")),
        )
        .json()
        .init();
}
