//! Worker construction and the job consumption loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use relay_cache::{static_agent, CacheLayer};
use relay_domain::agent::AgentConfig;
use relay_domain::config::Config;
use relay_kv::{Kv, KvService};
use relay_llm::{LlmExecutor, LlmProvider, ModelResolver};
use relay_runtime::prompt::{DefaultPromptBuilder, PromptBuilder};
use relay_runtime::sinks::Sinks;
use relay_runtime::{Lifecycle, Ownership, WriteBuffer};
use relay_store::{PgPersistence, RunPersistence, Store};
use relay_tools::ToolRegistry;

use crate::broker::JobQueue;
use crate::sinks::BrokerSinks;

/// Fully-wired worker state, shared by every run the process hosts.
pub struct Worker {
    pub config: Arc<Config>,
    pub instance_id: String,
    pub kv: Arc<dyn Kv>,
    pub persistence: Arc<dyn RunPersistence>,
    pub cache: CacheLayer,
    pub buffer: Arc<WriteBuffer>,
    pub ownership: Ownership,
    pub lifecycle: Lifecycle,
    pub executor: Arc<LlmExecutor>,
    pub registry: Arc<ToolRegistry>,
    pub resolver: ModelResolver,
    pub sinks: Arc<dyn Sinks>,
    pub prompt_builder: Arc<dyn PromptBuilder>,
    pub queue: JobQueue,
}

impl Worker {
    /// Production boot: Redis + Postgres backends.
    pub async fn build(
        config: Arc<Config>,
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
    ) -> anyhow::Result<Arc<Worker>> {
        let kv: Arc<dyn Kv> = Arc::new(KvService::connect(&config.kv)?);
        let store = Arc::new(Store::connect(&config.store).await?);
        let persistence: Arc<dyn RunPersistence> = Arc::new(PgPersistence::new(store));
        Ok(Self::assemble(config, kv, persistence, provider, registry))
    }

    /// Boot against explicit backends (tests, local development).
    pub fn build_with_backends(
        config: Arc<Config>,
        kv: Arc<dyn Kv>,
        persistence: Arc<dyn RunPersistence>,
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
    ) -> Arc<Worker> {
        Self::assemble(config, kv, persistence, provider, registry)
    }

    fn assemble(
        config: Arc<Config>,
        kv: Arc<dyn Kv>,
        persistence: Arc<dyn RunPersistence>,
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
    ) -> Arc<Worker> {
        let instance_id = config
            .worker
            .instance_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()[..8].to_string());

        // Static default-agent template, loaded once per process.
        static_agent::install(AgentConfig::default_template());

        // Warm the tool discovery path so the first run pays nothing.
        let warmed = registry.get_available_functions().len();
        info!(instance_id = %instance_id, tools = warmed, "worker initialized");

        let cache = CacheLayer::new(kv.clone());
        let buffer = Arc::new(WriteBuffer::new(persistence.clone()));
        let ownership = Ownership::new(
            kv.clone(),
            persistence.clone(),
            Duration::from_secs(config.run.lock_ttl_secs),
            Duration::from_secs(config.run.heartbeat_secs),
        );
        let lifecycle = Lifecycle::new();
        let sinks: Arc<dyn Sinks> = Arc::new(BrokerSinks::new(kv.clone(), persistence.clone()));
        let prompt_builder: Arc<dyn PromptBuilder> = Arc::new(DefaultPromptBuilder::new(
            persistence.clone(),
            Some(cache.clone()),
        ));
        let queue = JobQueue::new(kv.clone(), config.worker.queue_key.clone());
        let resolver = ModelResolver::new(config.llm.model_aliases.clone());

        Arc::new(Worker {
            config,
            instance_id,
            kv,
            persistence,
            cache,
            buffer,
            ownership,
            lifecycle,
            executor: Arc::new(LlmExecutor::new(provider)),
            registry,
            resolver,
            sinks,
            prompt_builder,
            queue,
        })
    }

    /// Consume jobs until shutdown; drains in-flight runs within the
    /// grace window.
    pub async fn run_loop(self: &Arc<Self>) {
        let _signal_watcher = self.lifecycle.spawn_signal_watcher();
        let _flusher = self
            .buffer
            .spawn_flusher(Duration::from_secs(self.config.run.flush_interval_secs));

        let dequeue_timeout = Duration::from_secs(self.config.worker.dequeue_timeout_secs);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!(queue = %self.config.worker.queue_key, "worker consuming jobs");
        while !self.lifecycle.is_shutting_down() {
            // Reap finished runs without blocking.
            while in_flight.try_join_next().is_some() {}

            match self.queue.dequeue(dequeue_timeout).await {
                Ok(Some(job)) => {
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        crate::driver::run_agent(&worker, job).await;
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "job dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        // Grace window for in-flight runs.
        let grace = Duration::from_secs(self.config.worker.shutdown_grace_secs);
        info!(grace_secs = grace.as_secs(), "draining in-flight runs");
        let drain = async {
            while in_flight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("grace window elapsed with runs still in flight");
            in_flight.abort_all();
        }
        self.buffer.flush_all().await;
        info!("worker stopped");
    }
}
