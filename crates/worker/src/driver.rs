//! The per-job driver: claims the run, wires the coordinator to the
//! live stream, and finalizes status, cleanup and sinks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use relay_cache::InvalidationSet;
use relay_domain::agent::AgentConfig;
use relay_domain::event::RunEvent;
use relay_domain::run::{ControlSignal, RunJob, RunKeys, RunStatus};
use relay_kv::Kv;
use relay_runtime::coordinator::{Coordinator, CoordinatorDeps, RunContext, RunOutcome};
use relay_runtime::idempotency::StepIdempotency;
use relay_runtime::{CancelToken, ClaimOutcome};

use crate::bootstrap::Worker;
use crate::control;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Finished(RunStatus),
    /// Another live instance owns the run (at-most-once in effect).
    Skipped,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event pump
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fans each semantic event out to pub/sub and the stream.
///
/// Writes are fire-and-forget tasks; when more than `max_pending` are in
/// flight, streaming pauses until the backlog halves. Persistence keeps
/// flowing through the write buffer regardless — live subscribers lose
/// low-priority deltas, late joiners replay from the database.
struct EventPump {
    kv: Arc<dyn Kv>,
    keys: RunKeys,
    maxlen: usize,
    max_pending: usize,
    stream_ttl: Duration,
    pending: Vec<JoinHandle<()>>,
    streaming_enabled: bool,
    total: u64,
}

impl EventPump {
    fn new(kv: Arc<dyn Kv>, keys: RunKeys, maxlen: usize, max_pending: usize, stream_ttl: Duration) -> Self {
        Self {
            kv,
            keys,
            maxlen,
            max_pending,
            stream_ttl,
            pending: Vec::new(),
            streaming_enabled: true,
            total: 0,
        }
    }

    async fn forward(&mut self, event: &RunEvent) {
        if self.streaming_enabled && self.kv.is_healthy() {
            let payload = event.to_wire().to_string();

            let kv = self.kv.clone();
            let channel = self.keys.pubsub.clone();
            let publish_payload = payload.clone();
            self.pending.push(tokio::spawn(async move {
                if let Err(e) = kv.publish(&channel, &publish_payload).await {
                    debug!(error = %e, "event publish failed");
                }
            }));

            let kv = self.kv.clone();
            let stream_key = self.keys.stream.clone();
            let maxlen = self.maxlen;
            self.pending.push(tokio::spawn(async move {
                if let Err(e) = kv
                    .xadd(&stream_key, &[("data", payload.as_str())], maxlen)
                    .await
                {
                    debug!(error = %e, "stream append failed");
                }
            }));
        }

        self.total += 1;
        if self.total % 50 == 0 {
            self.pending.retain(|handle| !handle.is_finished());

            if self.streaming_enabled && self.pending.len() > self.max_pending {
                warn!(
                    pending = self.pending.len(),
                    stream = %self.keys.stream,
                    "redis backpressure, pausing streaming writes"
                );
                self.streaming_enabled = false;
            } else if !self.streaming_enabled && self.pending.len() < self.max_pending / 2 {
                info!(stream = %self.keys.stream, "redis backpressure cleared, resuming");
                self.streaming_enabled = true;
            }

            if self.streaming_enabled {
                let kv = self.kv.clone();
                let stream_key = self.keys.stream.clone();
                let ttl = self.stream_ttl;
                self.pending.push(tokio::spawn(async move {
                    let _ = kv.expire(&stream_key, ttl).await;
                }));
            }
        }
    }

    /// Wait for outstanding writes, bounded by `drain_timeout`.
    async fn finish(self, drain_timeout: Duration) {
        let drain = futures_util::future::join_all(self.pending);
        if tokio::time::timeout(drain_timeout, drain).await.is_err() {
            warn!(stream = %self.keys.stream, "timed out waiting for pending redis writes");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one run job end to end. Never panics outward; every exit path
/// finalizes status, cleanup and sinks.
pub async fn run_agent(worker: &Worker, job: RunJob) -> DriverOutcome {
    let run_id = job.run_id;
    let job = RunJob {
        instance_id: worker.instance_id.clone(),
        model_name: worker.resolver.resolve(&job.model_name).to_string(),
        ..job
    };

    // ── Claim ────────────────────────────────────────────────────────
    match worker.ownership.claim(run_id, &worker.instance_id).await {
        Ok(ClaimOutcome::Claimed) => {}
        Ok(ClaimOutcome::AlreadyClaimed) => {
            info!(%run_id, "skipped: lock not acquired");
            return DriverOutcome::Skipped;
        }
        Err(e) => {
            error!(%run_id, error = %e, "claim failed, leaving job for a sibling");
            return DriverOutcome::Skipped;
        }
    }

    info!(%run_id, thread_id = %job.thread_id, model = %job.model_name, "driving run");

    let keys = RunKeys::for_run(run_id, &worker.instance_id);
    worker.cache.set_stream_handle(run_id, &keys.stream).await;
    if !worker.kv.is_healthy() {
        warn!(%run_id, "kv unhealthy at start; live streaming may be degraded");
    }

    let agent = load_agent_config(worker, job.agent_id).await;

    // ── Control channels ─────────────────────────────────────────────
    let cancel = CancelToken::new();
    let subscribe = tokio::time::timeout(
        Duration::from_secs(5),
        worker
            .kv
            .subscribe(&[keys.instance_control.clone(), keys.global_control.clone()]),
    )
    .await;
    let supervisor = match subscribe {
        Ok(Ok(subscription)) => Some(control::spawn_supervisor(
            subscription,
            keys.clone(),
            cancel.clone(),
        )),
        Ok(Err(e)) => {
            warn!(%run_id, error = %e, "control subscription failed; stop signals disabled");
            None
        }
        Err(_) => {
            warn!(%run_id, "control subscription timed out; stop signals disabled");
            None
        }
    };
    let heartbeat = worker
        .ownership
        .spawn_heartbeat(run_id, worker.instance_id.clone());

    // ── Coordinator ──────────────────────────────────────────────────
    let deps = CoordinatorDeps {
        executor: worker.executor.clone(),
        registry: worker.registry.clone(),
        persistence: worker.persistence.clone(),
        buffer: worker.buffer.clone(),
        prompt_builder: worker.prompt_builder.clone(),
        idempotency: StepIdempotency::new(
            worker.kv.clone(),
            Duration::from_secs(worker.config.run.step_idempotency_ttl_secs),
        ),
        lifecycle: worker.lifecycle.clone(),
        run_config: worker.config.run.clone(),
        pricing: worker.config.llm.pricing.clone(),
        temperature: worker.config.llm.temperature,
        max_tokens: worker.config.llm.max_tokens,
        native_tool_calling: worker.config.llm.native_tool_calling,
        xml_tool_calling: worker.config.llm.xml_tool_calling,
    };
    let ctx = RunContext {
        job: job.clone(),
        agent: agent.clone(),
        cancel: cancel.clone(),
    };
    let (tx, mut rx) = mpsc::channel::<RunEvent>(256);
    let coordinator_task = tokio::spawn(Coordinator::new(deps).run(ctx, tx));

    let mut pump = EventPump::new(
        worker.kv.clone(),
        keys.clone(),
        worker.config.stream.maxlen,
        worker.config.stream.max_pending_ops,
        Duration::from_secs(worker.config.stream.ttl_secs),
    );
    while let Some(event) = rx.recv().await {
        pump.forward(&event).await;
    }

    let outcome = match coordinator_task.await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            error!(%run_id, error = %join_error, "coordinator task died");
            RunOutcome {
                status: RunStatus::Failed,
                error: Some(format!("coordinator task died: {join_error}")),
                complete_tool_called: false,
                steps: 0,
            }
        }
    };

    // A STOP from a control channel composes the stop source into the
    // recorded error.
    let stop_reason = supervisor
        .as_ref()
        .and_then(|(_, reason)| reason.lock().clone());
    let error_message = match (&outcome.status, &stop_reason) {
        (RunStatus::Stopped, Some(source)) => Some(format!("Stopped by {source}")),
        _ => outcome.error.clone(),
    };

    pump.finish(Duration::from_secs(worker.config.run.drain_timeout_secs))
        .await;

    // ── Terminal status & signalling ─────────────────────────────────
    if let Err(e) = worker
        .persistence
        .update_run_status(run_id, outcome.status, error_message.as_deref())
        .await
    {
        error!(%run_id, error = %e, "failed to record terminal run status");
    }

    let signal = ControlSignal::for_final_status(outcome.status);
    if let Err(e) = worker.kv.publish(&keys.global_control, signal.as_str()).await {
        warn!(%run_id, signal = signal.as_str(), error = %e, "terminal control signal failed");
    }

    // ── Cleanup ──────────────────────────────────────────────────────
    if let Some((handle, _)) = supervisor {
        handle.abort();
    }
    heartbeat.abort();
    worker.buffer.unregister(run_id);
    worker
        .ownership
        .release(
            run_id,
            &worker.instance_id,
            Duration::from_secs(worker.config.stream.ttl_secs),
        )
        .await;

    // ── Cache invalidation & sinks ───────────────────────────────────
    let mut invalidations = InvalidationSet::for_thread(job.thread_id).merge(
        InvalidationSet::for_run(run_id),
    );
    if let Some(account_id) = job.account_id {
        invalidations = invalidations.merge(InvalidationSet::for_account(account_id));
    }
    worker.cache.invalidate(&invalidations).await;

    fire_sinks(worker, &job, &agent, &outcome, error_message.as_deref()).await;

    info!(%run_id, status = outcome.status.as_str(), steps = outcome.steps, "run finalized");
    DriverOutcome::Finished(outcome.status)
}

// ── Helpers ────────────────────────────────────────────────────────

/// Resolve the agent configuration: cache for custom agents, the static
/// template otherwise. Failures fall back to the template — a run with
/// the default prompt beats no run.
async fn load_agent_config(worker: &Worker, agent_id: Option<Uuid>) -> AgentConfig {
    let Some(agent_id) = agent_id else {
        return relay_cache::static_agent::get();
    };
    let mut config = match worker.cache.agent_config(agent_id, None).await {
        Some(config) => config,
        None => {
            warn!(%agent_id, "agent config not cached; using default template");
            let mut config = relay_cache::static_agent::get();
            config.agent_id = Some(agent_id);
            config
        }
    };
    // The MCP/tool bundle is cached separately so bundle edits don't
    // invalidate the whole config entry.
    if let Some(bundle) = worker.cache.agent_mcps(agent_id).await {
        config.tool_bundle = bundle;
    }
    config
}

async fn fire_sinks(
    worker: &Worker,
    job: &RunJob,
    agent: &AgentConfig,
    outcome: &RunOutcome,
    error_message: Option<&str>,
) {
    let task_name = match worker.persistence.thread_info(job.thread_id).await {
        Ok(Some(info)) => info.name.unwrap_or_else(|| "Task".to_string()),
        _ => "Task".to_string(),
    };

    match outcome.status {
        RunStatus::Completed => {
            if let Some(account_id) = job.account_id {
                let message_ids = worker
                    .persistence
                    .message_ids(job.thread_id)
                    .await
                    .unwrap_or_default();
                if !message_ids.is_empty() {
                    worker
                        .sinks
                        .extract_memories(job.thread_id, account_id, message_ids)
                        .await;
                }
                if outcome.complete_tool_called {
                    worker
                        .sinks
                        .notify_completion(
                            account_id,
                            job.thread_id,
                            task_name.clone(),
                            Some(agent.name.clone()),
                        )
                        .await;
                } else {
                    debug!(run_id = %job.run_id, "completed without complete tool; no notification");
                }
            }
            worker.sinks.categorize_project(job.project_id).await;
        }
        RunStatus::Failed => {
            if let Some(account_id) = job.account_id {
                worker
                    .sinks
                    .notify_failure(
                        account_id,
                        job.thread_id,
                        task_name,
                        error_message.unwrap_or("run failed").to_string(),
                    )
                    .await;
            }
        }
        _ => {}
    }
}
