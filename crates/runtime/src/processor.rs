//! The response processor: consumes one LLM chunk stream and emits the
//! semantic event sequence for the turn.
//!
//! ```text
//! llm_response_start
//!   (content | tool_call_chunk)*
//!   (assistant_complete  tool_started  tool_result  tool_completed)*
//!   finish(reason, tools_executed)
//! llm_response_end
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use relay_domain::event::{EventPayload, RunEvent, ToolCallArgsDelta};
use relay_domain::stream::{BoxStream, FinishReason, LlmChunk};
use relay_domain::tool::ToolCall;
use relay_domain::Result;
use relay_tools::{Invoker, Terminators, ToolSnapshot};

use crate::cancel::CancelToken;
use crate::state::RunState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Emitter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sequence-numbered event sender.
///
/// One per run; `new_turn()` rotates `thread_run_id` so consumers never
/// merge turns (including auto-continue iterations) into one message.
pub struct Emitter {
    tx: mpsc::Sender<RunEvent>,
    sequence: u64,
    thread_id: Uuid,
    thread_run_id: Uuid,
    turn_started_at: DateTime<Utc>,
}

impl Emitter {
    pub fn new(tx: mpsc::Sender<RunEvent>, thread_id: Uuid) -> Self {
        Self {
            tx,
            sequence: 0,
            thread_id,
            thread_run_id: Uuid::new_v4(),
            turn_started_at: Utc::now(),
        }
    }

    pub fn thread_run_id(&self) -> Uuid {
        self.thread_run_id
    }

    /// Start a new turn: fresh `thread_run_id`, fresh stream timestamp.
    pub fn new_turn(&mut self) -> Uuid {
        self.thread_run_id = Uuid::new_v4();
        self.turn_started_at = Utc::now();
        self.thread_run_id
    }

    pub async fn emit(&mut self, payload: EventPayload) {
        self.send(payload, Utc::now()).await;
    }

    /// Emit with the turn's stream-start timestamp (transcript-shaped
    /// events of one turn share it).
    pub async fn emit_at_turn_start(&mut self, payload: EventPayload) {
        self.send(payload, self.turn_started_at).await;
    }

    async fn send(&mut self, payload: EventPayload, created_at: DateTime<Utc>) {
        let event = RunEvent {
            sequence: self.sequence,
            thread_id: self.thread_id,
            thread_run_id: self.thread_run_id,
            created_at,
            payload,
        };
        self.sequence += 1;
        // A dropped receiver means the driver is gone; the coordinator
        // notices via its own exit paths.
        let _ = self.tx.send(event).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What one streamed step amounted to, for the auto-continue decision.
#[derive(Debug, Default)]
pub struct StepSummary {
    pub finish_reason: Option<FinishReason>,
    /// A reserved terminator tool succeeded; the run is complete.
    pub terminating_tool: Option<String>,
    pub cancelled: bool,
    pub provider_error: Option<String>,
    pub tools_executed: usize,
}

impl StepSummary {
    pub fn auto_continue(&self) -> bool {
        !self.cancelled
            && self.terminating_tool.is_none()
            && self.provider_error.is_none()
            && self
                .finish_reason
                .as_ref()
                .is_some_and(FinishReason::auto_continues)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembly buffer for one streaming tool call.
#[derive(Default, Clone)]
struct ToolCallBuffer {
    id: String,
    name: String,
    arguments: String,
}

pub struct Processor<'a> {
    pub state: &'a mut RunState,
    pub emitter: &'a mut Emitter,
    pub invoker: &'a Invoker,
    pub snapshot: &'a ToolSnapshot,
    pub terminators: &'a Terminators,
    pub cancel: &'a CancelToken,
}

impl Processor<'_> {
    /// Consume one chunk stream, mutate state, emit the turn's events.
    pub async fn process(&mut self, mut chunks: BoxStream<'static, Result<LlmChunk>>) -> StepSummary {
        let mut summary = StepSummary::default();
        let mut buffers: BTreeMap<usize, ToolCallBuffer> = BTreeMap::new();
        let mut sent_lengths: HashMap<usize, usize> = HashMap::new();
        let mut response_ended = false;

        self.emitter
            .emit_at_turn_start(EventPayload::LlmResponseStart)
            .await;

        while let Some(chunk) = chunks.next().await {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    summary.provider_error = Some(e.to_string());
                    break;
                }
            };

            match chunk {
                LlmChunk::FirstToken => {
                    debug!(run_id = %self.state.run_id, "first token received");
                }
                LlmChunk::ContentDelta { text } => {
                    self.state.append_content(&text);
                    self.emitter
                        .emit_at_turn_start(EventPayload::ContentDelta { content: text })
                        .await;
                }
                LlmChunk::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments_fragment,
                } => {
                    let buffer = buffers.entry(index).or_default();
                    if let Some(id) = id {
                        buffer.id = id;
                    }
                    if let Some(name) = name {
                        buffer.name = name;
                    }
                    if let Some(fragment) = arguments_fragment {
                        buffer.arguments.push_str(&fragment);
                    }
                    self.emit_tool_call_chunk(&buffers, &mut sent_lengths).await;
                }
                LlmChunk::ProviderError {
                    message,
                    error_code,
                } => {
                    let message = match error_code {
                        Some(code) => format!("{message} ({code})"),
                        None => message,
                    };
                    self.emitter
                        .emit(EventPayload::Error {
                            message: message.clone(),
                            code: None,
                        })
                        .await;
                    summary.provider_error = Some(message);
                    break;
                }
                LlmChunk::Finish { reason } => {
                    let reason = reason.normalize();
                    self.handle_finish(reason, &mut buffers, &mut summary).await;
                    response_ended = true;
                    break;
                }
            }
        }

        // Close the stream promptly so the provider connection is freed.
        drop(chunks);

        // Stream ended without a finish marker: salvage accumulated text
        // as a completed assistant message.
        if !response_ended
            && !summary.cancelled
            && summary.provider_error.is_none()
            && !self.state.accumulated_content().is_empty()
            && self.state.is_active()
        {
            let thread_run_id = self.emitter.thread_run_id();
            let content = self.state.accumulated_content().to_string();
            let message_id = self.state.finalize_assistant_message(&[], thread_run_id);
            self.emitter
                .emit_at_turn_start(EventPayload::AssistantComplete {
                    message_id,
                    content,
                    tool_calls: Vec::new(),
                })
                .await;
        }

        if !response_ended {
            self.emitter.emit(EventPayload::LlmResponseEnd).await;
        }

        summary
    }

    // ── Finish handling ──────────────────────────────────────────────

    async fn handle_finish(
        &mut self,
        reason: FinishReason,
        buffers: &mut BTreeMap<usize, ToolCallBuffer>,
        summary: &mut StepSummary,
    ) {
        match reason {
            FinishReason::ToolCalls => {
                let tool_calls: Vec<ToolCall> = buffers
                    .values()
                    .map(|b| ToolCall {
                        id: b.id.clone(),
                        name: b.name.clone(),
                        arguments: b.arguments.clone(),
                    })
                    .collect();
                buffers.clear();
                for tc in &tool_calls {
                    self.state.queue_tool_call(tc.clone());
                }

                let thread_run_id = self.emitter.thread_run_id();
                let content = self.state.accumulated_content().to_string();
                let message_id = self
                    .state
                    .finalize_assistant_message(&tool_calls, thread_run_id);
                self.emitter
                    .emit_at_turn_start(EventPayload::AssistantComplete {
                        message_id,
                        content,
                        tool_calls: tool_calls.clone(),
                    })
                    .await;

                self.execute_tools(message_id, summary).await;
                if summary.terminating_tool.is_some() || summary.cancelled {
                    return;
                }

                self.emitter
                    .emit(EventPayload::Finish {
                        reason: FinishReason::ToolCalls,
                        tools_executed: true,
                    })
                    .await;
                self.emitter.emit(EventPayload::LlmResponseEnd).await;
                summary.finish_reason = Some(FinishReason::ToolCalls);
            }
            // AgentTerminated never arrives from a provider; a stream that
            // claims it is treated as a plain stop.
            reason => {
                let reason = match reason {
                    FinishReason::Stop | FinishReason::EndTurn | FinishReason::Length => reason,
                    _ => FinishReason::Stop,
                };
                let thread_run_id = self.emitter.thread_run_id();
                let content = self.state.accumulated_content().to_string();
                let message_id = self.state.finalize_assistant_message(&[], thread_run_id);
                self.emitter
                    .emit_at_turn_start(EventPayload::AssistantComplete {
                        message_id,
                        content,
                        tool_calls: Vec::new(),
                    })
                    .await;
                self.emitter
                    .emit(EventPayload::Finish {
                        reason: reason.clone(),
                        tools_executed: false,
                    })
                    .await;
                self.emitter.emit(EventPayload::LlmResponseEnd).await;
                summary.finish_reason = Some(reason);
            }
        }
    }

    // ── Tool execution ───────────────────────────────────────────────

    async fn execute_tools(&mut self, assistant_message_id: Uuid, summary: &mut StepSummary) {
        let pending = self.state.take_pending_tools();
        debug!(
            run_id = %self.state.run_id,
            count = pending.len(),
            "executing queued tools"
        );

        for (tool_index, tc) in pending.into_iter().enumerate() {
            // STOP lets the in-flight tool finish but starts no new one.
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                return;
            }

            self.emitter
                .emit_at_turn_start(EventPayload::ToolStarted {
                    tool_call_id: tc.id.clone(),
                    function_name: tc.name.clone(),
                    tool_index,
                })
                .await;

            let result = self
                .invoker
                .invoke(self.snapshot, &tc.id, &tc.name, &tc.arguments)
                .await;
            summary.tools_executed += 1;

            let thread_run_id = self.emitter.thread_run_id();
            let message_id = self.state.record_tool_result(
                &result,
                Some(assistant_message_id),
                thread_run_id,
                tool_index,
            );
            self.emitter
                .emit_at_turn_start(EventPayload::ToolResultMsg {
                    message_id,
                    result: result.clone(),
                    tool_index,
                    assistant_message_id: Some(assistant_message_id),
                })
                .await;

            let terminating = result.success && self.terminators.is_terminator(&tc.name);
            self.emitter
                .emit_at_turn_start(EventPayload::ToolCompleted {
                    tool_call_id: tc.id.clone(),
                    function_name: tc.name.clone(),
                    tool_index,
                    success: result.success,
                    terminating,
                })
                .await;

            if terminating {
                self.state.complete();
                self.emitter
                    .emit(EventPayload::Finish {
                        reason: FinishReason::AgentTerminated,
                        tools_executed: true,
                    })
                    .await;
                self.emitter.emit(EventPayload::LlmResponseEnd).await;
                summary.finish_reason = Some(FinishReason::AgentTerminated);
                summary.terminating_tool = Some(tc.name);
                return;
            }
        }
    }

    /// Emit the newly-appended argument suffixes for buffers with a known
    /// function name.
    async fn emit_tool_call_chunk(
        &mut self,
        buffers: &BTreeMap<usize, ToolCallBuffer>,
        sent_lengths: &mut HashMap<usize, usize>,
    ) {
        let mut deltas = Vec::new();
        for (&index, buffer) in buffers {
            if buffer.name.is_empty() {
                continue;
            }
            let sent = sent_lengths.get(&index).copied().unwrap_or(0);
            if buffer.arguments.len() > sent {
                deltas.push(ToolCallArgsDelta {
                    tool_call_id: if buffer.id.is_empty() {
                        format!("streaming_tool_{index}")
                    } else {
                        buffer.id.clone()
                    },
                    function_name: buffer.name.clone(),
                    arguments_delta: buffer.arguments[sent..].to_string(),
                    index,
                });
                sent_lengths.insert(index, buffer.arguments.len());
            }
        }
        if !deltas.is_empty() {
            self.emitter
                .emit_at_turn_start(EventPayload::ToolCallChunk { deltas })
                .await;
        }
    }
}

