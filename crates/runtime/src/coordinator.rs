//! The per-run coordinator: drives the LLM/tool loop, enforces caps,
//! applies per-step idempotency, reserves credits, and decides
//! auto-continue vs termination.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_domain::agent::AgentConfig;
use relay_domain::chat::ChatMessage;
use relay_domain::config::{ModelPricing, RunConfig};
use relay_domain::error::ErrorCode;
use relay_domain::event::{EventPayload, RunEvent};
use relay_domain::run::{RunJob, RunStatus};
use relay_llm::{LlmExecutor, ToolChoice};
use relay_store::RunPersistence;
use relay_tools::{Invoker, Terminators, ToolRegistry, ToolSnapshot};

use crate::cancel::CancelToken;
use crate::flush::WriteBuffer;
use crate::idempotency::StepIdempotency;
use crate::lifecycle::Lifecycle;
use crate::processor::{Emitter, Processor, StepSummary};
use crate::prompt::PromptBuilder;
use crate::state::RunState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs & outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the driver resolves before handing a run to the
/// coordinator. Ownership is already claimed at this point.
pub struct RunContext {
    pub job: RunJob,
    pub agent: AgentConfig,
    pub cancel: CancelToken,
}

pub struct CoordinatorDeps {
    pub executor: Arc<LlmExecutor>,
    pub registry: Arc<ToolRegistry>,
    pub persistence: Arc<dyn RunPersistence>,
    pub buffer: Arc<WriteBuffer>,
    pub prompt_builder: Arc<dyn PromptBuilder>,
    pub idempotency: StepIdempotency,
    pub lifecycle: Lifecycle,
    pub run_config: RunConfig,
    pub pricing: HashMap<String, ModelPricing>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub native_tool_calling: bool,
    pub xml_tool_calling: bool,
}

/// How the run ended, as reported to the driver.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub error: Option<String>,
    pub complete_tool_called: bool,
    pub steps: u32,
}

enum StepAction {
    Done(StepSummary),
    InsufficientCredits,
    Fatal(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Coordinator {
    deps: CoordinatorDeps,
}

impl Coordinator {
    pub fn new(deps: CoordinatorDeps) -> Self {
        Self { deps }
    }

    /// Drive the run to a terminal state, emitting events on `tx`.
    pub async fn run(self, ctx: RunContext, tx: mpsc::Sender<RunEvent>) -> RunOutcome {
        let job = &ctx.job;
        let mut emitter = Emitter::new(tx, job.thread_id);

        if self.deps.lifecycle.is_shutting_down() {
            emitter
                .emit(EventPayload::Error {
                    message: "Server shutting down".into(),
                    code: Some(ErrorCode::Shutdown),
                })
                .await;
            return RunOutcome {
                status: RunStatus::Failed,
                error: Some("Server shutting down".into()),
                complete_tool_called: false,
                steps: 0,
            };
        }

        emitter
            .emit(EventPayload::Lifecycle {
                status: "initializing".into(),
                message: "Setting up".into(),
                progress: Some(10),
            })
            .await;

        // ── Build run state ──────────────────────────────────────────
        let prompt = match self.deps.prompt_builder.build(job.thread_id, &ctx.agent).await {
            Ok(prompt) => prompt,
            Err(e) => {
                let message = truncate(&e.to_string(), 200);
                emitter
                    .emit(EventPayload::Error {
                        message: message.clone(),
                        code: Some(ErrorCode::PipelineError),
                    })
                    .await;
                emitter
                    .emit(EventPayload::Lifecycle {
                        status: "failed".into(),
                        message: message.clone(),
                        progress: None,
                    })
                    .await;
                return RunOutcome {
                    status: RunStatus::Failed,
                    error: Some(message),
                    complete_tool_called: false,
                    steps: 0,
                };
            }
        };

        let snapshot = self.deps.registry.get_available_functions();
        let schemas = snapshot.schemas();
        let mut state = RunState::new(
            job.run_id,
            job.thread_id,
            job.account_id,
            job.model_name.clone(),
            prompt.system_prompt,
            schemas,
            prompt.context_messages,
            self.deps.buffer.clone(),
        );
        let invoker = Invoker::new(Duration::from_secs(self.deps.run_config.tool_timeout_secs));
        let terminators = Terminators::new(self.deps.run_config.terminator_tools.iter().cloned());

        emitter
            .emit(EventPayload::Lifecycle {
                status: "ready".into(),
                message: "Ready".into(),
                progress: Some(100),
            })
            .await;
        info!(run_id = %job.run_id, thread_id = %job.thread_id, model = %state.model_name, "run started");

        // ── Turn loop ────────────────────────────────────────────────
        let max_steps = self.deps.run_config.max_steps;
        let max_auto_continues = self.deps.run_config.max_auto_continues;
        let mut auto_continue_count: u32 = 0;
        let mut error: Option<String> = None;
        let mut complete_tool_called = false;

        while state.should_continue(max_steps) {
            // Fresh thread_run_id per turn and per auto-continue so the
            // frontend never merges turns into one message.
            emitter.new_turn();
            let step = state.next_step();

            if ctx.cancel.is_cancelled() {
                state.cancel();
                break;
            }

            if self
                .deps
                .idempotency
                .already_done(job.run_id, step, "llm")
                .await
            {
                debug!(run_id = %job.run_id, step, "step already executed, skipping");
                continue;
            }

            emitter
                .emit(EventPayload::Lifecycle {
                    status: "thinking".into(),
                    message: "Thinking".into(),
                    progress: None,
                })
                .await;

            let can_retry = auto_continue_count < max_auto_continues;
            let action = self
                .step_once(&mut state, &mut emitter, &ctx.cancel, &invoker, &snapshot, &terminators, can_retry)
                .await;

            if let Err(e) = self.deps.idempotency.mark(job.run_id, step, "llm").await {
                warn!(run_id = %job.run_id, step, error = %e, "failed to mark step idempotency");
            }

            let summary = match action {
                StepAction::Done(summary) => summary,
                StepAction::InsufficientCredits => {
                    state.terminate("insufficient_credits");
                    error = Some("Insufficient credits".into());
                    break;
                }
                StepAction::Fatal(message) => {
                    state.terminate(format!("error: {}", truncate(&message, 100)));
                    error = Some(truncate(&message, 200));
                    break;
                }
            };

            if summary.cancelled {
                state.cancel();
                break;
            }
            if let Some(tool) = &summary.terminating_tool {
                complete_tool_called = tool == "complete";
                break;
            }
            if !state.is_active() {
                break;
            }
            if summary.auto_continue() {
                auto_continue_count += 1;
                debug!(run_id = %job.run_id, auto_continue_count, "auto-continue");
                if auto_continue_count >= max_auto_continues {
                    state.terminate("max_auto_continues");
                    break;
                }
                continue;
            }

            state.complete();
            break;
        }

        if state.is_active() {
            if state.step() >= max_steps {
                state.terminate("max_auto_continues");
            } else {
                state.complete();
            }
        }

        // Pre-status flush: the terminal rows must be durable before
        // subscribers react to the final status.
        if let Err(e) = state.flush().await {
            warn!(run_id = %job.run_id, error = %e, "pre-status flush failed");
        }

        // ── Final status ─────────────────────────────────────────────
        let reason = state.termination_reason().unwrap_or("completed").to_string();
        let status = final_status(&reason);
        let message = match reason.as_str() {
            "cancelled" => "Cancelled".to_string(),
            "completed" => "completed".to_string(),
            other => other.to_string(),
        };
        emitter
            .emit(EventPayload::Lifecycle {
                status: status.as_str().to_string(),
                message,
                progress: None,
            })
            .await;

        info!(
            run_id = %job.run_id,
            steps = state.step(),
            status = status.as_str(),
            reason = %reason,
            "run finished"
        );

        RunOutcome {
            status,
            error: error.or_else(|| (status == RunStatus::Stopped).then(|| reason.clone())),
            complete_tool_called,
            steps: state.step(),
        }
    }

    // ── One step ─────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn step_once(
        &self,
        state: &mut RunState,
        emitter: &mut Emitter,
        cancel: &CancelToken,
        invoker: &Invoker,
        snapshot: &ToolSnapshot,
        terminators: &Terminators,
        can_retry: bool,
    ) -> StepAction {
        // Prepared messages: cached system prompt + context window.
        let mut prepared = vec![ChatMessage::system(&state.system_prompt)];
        prepared.extend(state.get_messages());

        // Estimate and reserve cost before the call.
        let prompt_tokens = LlmExecutor::estimate_prompt_tokens(&prepared).await;
        let pricing = self.deps.pricing.get(&state.model_name);
        let cost = state.estimate_cost(pricing, prompt_tokens, 1000);
        let cents = relay_store::credits::dollars_to_cents(cost);
        match state.deduct_credits(self.deps.persistence.as_ref(), cents).await {
            Ok(true) => {}
            Ok(false) => {
                emitter
                    .emit(EventPayload::Error {
                        message: "Insufficient credits".into(),
                        code: Some(ErrorCode::InsufficientCredits),
                    })
                    .await;
                return StepAction::InsufficientCredits;
            }
            Err(e) => {
                return self
                    .fatal_step(emitter, format!("credit reservation failed: {e}"))
                    .await
            }
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let stream = match self
                .deps
                .executor
                .execute(
                    prepared.clone(),
                    &state.model_name,
                    self.deps.temperature,
                    self.deps.max_tokens,
                    state.tool_schemas.clone(),
                    ToolChoice::Auto,
                    self.deps.native_tool_calling,
                    self.deps.xml_tool_calling,
                )
                .await
            {
                Ok(stream) => stream,
                Err(e) if attempts == 1 && can_retry => {
                    warn!(error = %e, "llm call failed, retrying step once");
                    continue;
                }
                Err(e) => return self.fatal_step(emitter, e.to_string()).await,
            };

            let mut processor = Processor {
                state: &mut *state,
                emitter: &mut *emitter,
                invoker,
                snapshot,
                terminators,
                cancel,
            };
            let summary = processor.process(stream).await;
            drop(processor);

            if let Some(provider_error) = &summary.provider_error {
                if attempts == 1 && can_retry && summary.tools_executed == 0 {
                    warn!(error = %provider_error, "provider error mid-stream, retrying step once");
                    state.reset_step();
                    continue;
                }
                return StepAction::Fatal(provider_error.clone());
            }
            return StepAction::Done(summary);
        }
    }

    /// Surface an unhandled step failure as a typed error event, then
    /// hand the fatal up. (Provider errors already produced their in-band
    /// error event in the processor.)
    async fn fatal_step(&self, emitter: &mut Emitter, message: String) -> StepAction {
        emitter
            .emit(EventPayload::Error {
                message: truncate(&message, 200),
                code: Some(ErrorCode::PipelineError),
            })
            .await;
        StepAction::Fatal(message)
    }
}

/// Terminal status from the termination reason.
fn final_status(reason: &str) -> RunStatus {
    match reason {
        "completed" => RunStatus::Completed,
        "insufficient_credits" => RunStatus::Failed,
        r if r.starts_with("error") => RunStatus::Failed,
        // cancelled, max_auto_continues, and anything else orderly.
        _ => RunStatus::Stopped,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_status_mapping() {
        assert_eq!(final_status("completed"), RunStatus::Completed);
        assert_eq!(final_status("cancelled"), RunStatus::Stopped);
        assert_eq!(final_status("max_auto_continues"), RunStatus::Stopped);
        assert_eq!(final_status("insufficient_credits"), RunStatus::Failed);
        assert_eq!(final_status("error: boom"), RunStatus::Failed);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello");
        let s = "h\u{00e9}llo";
        assert_eq!(truncate(s, 2), "h");
    }
}
