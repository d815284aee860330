//! Per-run in-memory working state.
//!
//! Owned by exactly one coordinator task; nothing else mutates it. All
//! durable writes go through the write buffer as typed message rows.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use relay_domain::chat::{ChatMessage, Role};
use relay_domain::config::ModelPricing;
use relay_domain::message::{MessageType, NewMessage};
use relay_domain::tool::{ToolCall, ToolDefinition, ToolResult};
use relay_domain::Result;
use relay_store::RunPersistence;

use crate::flush::WriteBuffer;

pub struct RunState {
    pub run_id: Uuid,
    pub thread_id: Uuid,
    pub account_id: Option<Uuid>,
    pub model_name: String,
    pub system_prompt: String,
    pub tool_schemas: Vec<ToolDefinition>,

    step: u32,
    accumulated_content: String,
    pending_tool_calls: Vec<ToolCall>,
    tool_results: Vec<ToolResult>,
    context_messages: Vec<Value>,
    terminated: bool,
    termination_reason: Option<String>,
    credit_reservation_id: Option<Uuid>,

    buffer: Arc<WriteBuffer>,
}

impl RunState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: Uuid,
        thread_id: Uuid,
        account_id: Option<Uuid>,
        model_name: String,
        system_prompt: String,
        tool_schemas: Vec<ToolDefinition>,
        context_messages: Vec<Value>,
        buffer: Arc<WriteBuffer>,
    ) -> Self {
        buffer.register(run_id);
        Self {
            run_id,
            thread_id,
            account_id,
            model_name,
            system_prompt,
            tool_schemas,
            step: 0,
            accumulated_content: String::new(),
            pending_tool_calls: Vec::new(),
            tool_results: Vec::new(),
            context_messages,
            terminated: false,
            termination_reason: None,
            credit_reservation_id: None,
            buffer,
        }
    }

    // ── Step bookkeeping ─────────────────────────────────────────────

    pub fn next_step(&mut self) -> u32 {
        self.step += 1;
        self.step
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn should_continue(&self, max_steps: u32) -> bool {
        !self.terminated && self.step < max_steps
    }

    pub fn is_active(&self) -> bool {
        !self.terminated
    }

    // ── Content & tool accumulation ──────────────────────────────────

    pub fn append_content(&mut self, delta: &str) {
        self.accumulated_content.push_str(delta);
    }

    pub fn accumulated_content(&self) -> &str {
        &self.accumulated_content
    }

    /// Drop partial output from a failed attempt before a step retry.
    pub fn reset_step(&mut self) {
        self.accumulated_content.clear();
        self.pending_tool_calls.clear();
    }

    pub fn queue_tool_call(&mut self, tool_call: ToolCall) {
        self.pending_tool_calls.push(tool_call);
    }

    pub fn take_pending_tools(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending_tool_calls)
    }

    pub fn tool_results(&self) -> &[ToolResult] {
        &self.tool_results
    }

    // ── Durable message construction ─────────────────────────────────

    /// Finalize the turn's assistant message: allocate its id, queue the
    /// durable row, fold it into the context, reset the accumulator.
    pub fn finalize_assistant_message(
        &mut self,
        tool_calls: &[ToolCall],
        thread_run_id: Uuid,
    ) -> Uuid {
        let content = std::mem::take(&mut self.accumulated_content);
        let mut doc = json!({"role": "assistant", "content": content});
        if !tool_calls.is_empty() {
            doc["tool_calls"] = serde_json::to_value(tool_calls).unwrap_or(Value::Null);
        }

        let mut metadata = json!({
            "stream_status": "complete",
            "thread_run_id": thread_run_id.to_string(),
        });
        if !tool_calls.is_empty() {
            metadata["tool_calls"] = Value::Array(
                tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "tool_call_id": tc.id,
                            "function_name": tc.name,
                            "arguments": tc.arguments,
                            "source": "native",
                        })
                    })
                    .collect(),
            );
        }

        let message = NewMessage::new(
            self.thread_id,
            MessageType::Assistant,
            true,
            doc.clone(),
            metadata,
        );
        let message_id = message.message_id;
        self.buffer.push(self.run_id, message);
        self.context_messages.push(doc);
        message_id
    }

    /// Record one tool result: queue the durable row, fold it into the
    /// context, reset the accumulator for the next turn. Returns the
    /// message id used by the matching stream event.
    pub fn record_tool_result(
        &mut self,
        result: &ToolResult,
        assistant_message_id: Option<Uuid>,
        thread_run_id: Uuid,
        tool_index: usize,
    ) -> Uuid {
        let doc = json!({
            "role": "tool",
            "tool_call_id": result.tool_call_id,
            "name": result.tool_name,
            "content": result.output_text(),
        });

        let mut metadata = json!({
            "tool_call_id": result.tool_call_id,
            "function_name": result.tool_name,
            "tool_index": tool_index,
            "result": {
                "success": result.success,
                "output": result.output_text(),
                "error": result.error,
            },
            "thread_run_id": thread_run_id.to_string(),
            "return_format": "native",
        });
        if let Some(amid) = assistant_message_id {
            metadata["assistant_message_id"] = json!(amid.to_string());
        }

        let message = NewMessage::new(self.thread_id, MessageType::Tool, true, doc.clone(), metadata);
        let message_id = message.message_id;
        self.buffer.push(self.run_id, message);
        self.context_messages.push(doc);
        self.tool_results.push(result.clone());
        self.accumulated_content.clear();
        message_id
    }

    // ── Credits ──────────────────────────────────────────────────────

    pub fn estimate_cost(
        &self,
        pricing: Option<&ModelPricing>,
        prompt_tokens: u64,
        completion_guess: u64,
    ) -> f64 {
        pricing
            .map(|p| p.estimate_cost(prompt_tokens, completion_guess))
            .unwrap_or(0.0)
    }

    /// Reserve credits for the step. `false` means insufficient balance
    /// (fatal). Runs without an account, and zero-cost steps, pass.
    pub async fn deduct_credits(
        &mut self,
        persistence: &dyn RunPersistence,
        amount_cents: i64,
    ) -> Result<bool> {
        let Some(account_id) = self.account_id else {
            return Ok(true);
        };
        if amount_cents == 0 {
            return Ok(true);
        }
        match persistence.reserve_credits(account_id, amount_cents).await? {
            Some(reservation_id) => {
                self.credit_reservation_id = Some(reservation_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn credit_reservation_id(&self) -> Option<Uuid> {
        self.credit_reservation_id
    }

    // ── Termination ──────────────────────────────────────────────────

    pub fn complete(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.termination_reason = Some("completed".to_string());
        }
    }

    pub fn terminate(&mut self, reason: impl Into<String>) {
        if !self.terminated {
            self.terminated = true;
            self.termination_reason = Some(reason.into());
        }
    }

    pub fn cancel(&mut self) {
        self.terminate("cancelled");
    }

    pub fn termination_reason(&self) -> Option<&str> {
        self.termination_reason.as_deref()
    }

    // ── Prompt assembly ──────────────────────────────────────────────

    /// The context window as chat messages (system prompt excluded).
    pub fn get_messages(&self) -> Vec<ChatMessage> {
        self.context_messages
            .iter()
            .filter_map(value_to_chat)
            .collect()
    }

    /// Drain remaining rows to the store.
    pub async fn flush(&self) -> Result<()> {
        self.buffer.flush_run(self.run_id).await
    }
}

/// Convert a stored content document into a prompt message.
fn value_to_chat(doc: &Value) -> Option<ChatMessage> {
    let role = match doc.get("role")?.as_str()? {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => return None,
    };
    let content = match doc.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let tool_calls = doc
        .get("tool_calls")
        .and_then(|v| serde_json::from_value::<Vec<ToolCall>>(v.clone()).ok())
        .unwrap_or_default();
    let tool_call_id = doc
        .get("tool_call_id")
        .and_then(|v| v.as_str())
        .map(str::to_owned);

    Some(ChatMessage {
        role,
        content,
        tool_calls,
        tool_call_id,
        cache_control: false,
    })
}
