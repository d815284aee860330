//! Command-line interface and configuration loading.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use relay_domain::config::Config;

#[derive(Parser)]
#[command(name = "relay-worker", about = "relay run-execution worker")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Consume run jobs (the default).
    Run {
        /// Replay canned LLM responses from a JSON script file instead of
        /// a real provider (local development).
        #[arg(long)]
        dry_run: Option<PathBuf>,
    },
    /// Enqueue a run job.
    Enqueue {
        #[arg(long)]
        thread_id: uuid::Uuid,
        #[arg(long)]
        project_id: uuid::Uuid,
        #[arg(long)]
        run_id: Option<uuid::Uuid>,
        #[arg(long)]
        account_id: Option<uuid::Uuid>,
        #[arg(long)]
        agent_id: Option<uuid::Uuid>,
        #[arg(long, default_value = "gpt-5-mini")]
        model: String,
    },
    /// Publish a STOP for a run and mark it stopped.
    Stop {
        run_id: uuid::Uuid,
    },
    Version,
}

/// Load the config file (defaults apply when absent) and fold in the
/// connection-URL environment overrides.
pub fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let mut config: Config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
            toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
        }
        None => Config::default(),
    };

    if let Ok(url) = std::env::var("REDIS_URL") {
        config.kv.url = url;
    }
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.store.primary_url = url;
    }
    if let Ok(url) = std::env::var("DATABASE_REPLICA_URL") {
        config.store.replica_url = Some(url);
    }
    if let Ok(id) = std::env::var("RELAY_INSTANCE_ID") {
        config.worker.instance_id = Some(id);
    }

    Ok(config)
}
