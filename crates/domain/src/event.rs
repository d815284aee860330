//! Typed run events and their wire envelope.
//!
//! Internally every event is a tagged variant; the JSON shape consumed by
//! stream/pub-sub subscribers (where `content` and `metadata` are
//! JSON-stringified inner documents) is produced only at the edge by
//! [`RunEvent::to_wire`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::stream::FinishReason;
use crate::tool::{ToolCall, ToolResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status discriminator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `status_type` values carried by `status` events.
///
/// `TerminatingToolCompleted` is no longer emitted but stays in the
/// vocabulary so readers still parse streams written by older workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    ToolStarted,
    ToolCompleted,
    ToolFailed,
    TerminatingToolCompleted,
    Finish,
    #[serde(untagged)]
    Other(String),
}

impl StatusType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ToolStarted => "tool_started",
            Self::ToolCompleted => "tool_completed",
            Self::ToolFailed => "tool_failed",
            Self::TerminatingToolCompleted => "terminating_tool_completed",
            Self::Finish => "finish",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "tool_started" => Self::ToolStarted,
            "tool_completed" => Self::ToolCompleted,
            "tool_failed" => Self::ToolFailed,
            "terminating_tool_completed" => Self::TerminatingToolCompleted,
            "finish" => Self::Finish,
            other => Self::Other(other.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload variants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The newly-appended argument suffix for one streaming tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallArgsDelta {
    pub tool_call_id: String,
    pub function_name: String,
    pub arguments_delta: String,
    pub index: usize,
}

/// Semantic event payloads produced by the response processor and the
/// coordinator.
#[derive(Debug, Clone)]
pub enum EventPayload {
    LlmResponseStart,
    LlmResponseEnd,

    /// Incremental assistant text (live stream only, never persisted).
    ContentDelta { content: String },

    /// Newly-appended tool-call argument suffixes.
    ToolCallChunk { deltas: Vec<ToolCallArgsDelta> },

    /// The finalized assistant message for this turn.
    AssistantComplete {
        message_id: Uuid,
        content: String,
        tool_calls: Vec<ToolCall>,
    },

    ToolStarted {
        tool_call_id: String,
        function_name: String,
        tool_index: usize,
    },

    /// A persisted tool-result message.
    ToolResultMsg {
        message_id: Uuid,
        result: ToolResult,
        tool_index: usize,
        assistant_message_id: Option<Uuid>,
    },

    ToolCompleted {
        tool_call_id: String,
        function_name: String,
        tool_index: usize,
        success: bool,
        /// Set when the tool is a reserved terminator and succeeded.
        terminating: bool,
    },

    Finish {
        reason: FinishReason,
        tools_executed: bool,
    },

    /// Free-form lifecycle status (prep stages, thinking, terminal status).
    Lifecycle {
        status: String,
        message: String,
        progress: Option<u8>,
    },

    Error {
        message: String,
        code: Option<ErrorCode>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One semantic event of a run.
///
/// `sequence` is strictly monotonic per run, starting at 0.
/// `thread_run_id` is regenerated for every turn and every auto-continue
/// iteration so consumers never merge turns into a single message.
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub sequence: u64,
    pub thread_id: Uuid,
    pub thread_run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl RunEvent {
    /// Whether this payload reports a successful terminator-tool finish.
    pub fn terminating_tool(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::ToolCompleted {
                function_name,
                terminating: true,
                success: true,
                ..
            } => Some(function_name),
            _ => None,
        }
    }

    /// Whether this is a terminal lifecycle status (`completed`, `failed`,
    /// `stopped`, `error`).
    pub fn terminal_status(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Lifecycle { status, .. }
                if matches!(status.as_str(), "completed" | "failed" | "stopped" | "error") =>
            {
                Some(status)
            }
            _ => None,
        }
    }

    /// Serialize to the wire envelope.
    ///
    /// `content` and `metadata` are JSON-stringified inner documents, as
    /// subscribers expect; timestamps are ISO-8601 UTC.
    pub fn to_wire(&self) -> Value {
        let ts = self.created_at.to_rfc3339();
        let trid = self.thread_run_id.to_string();

        match &self.payload {
            EventPayload::LlmResponseStart => json!({
                "type": "llm_response_start",
                "sequence": self.sequence,
                "thread_run_id": trid,
                "timestamp": ts,
            }),
            EventPayload::LlmResponseEnd => json!({
                "type": "llm_response_end",
                "sequence": self.sequence,
                "thread_run_id": trid,
                "timestamp": ts,
            }),
            EventPayload::ContentDelta { content } => self.envelope(
                "assistant",
                None,
                true,
                json!({"role": "assistant", "content": content}),
                json!({"stream_status": "chunk", "thread_run_id": trid}),
            ),
            EventPayload::ToolCallChunk { deltas } => self.envelope(
                "assistant",
                None,
                true,
                json!({"role": "assistant", "content": ""}),
                json!({
                    "stream_status": "tool_call_chunk",
                    "tool_calls": deltas,
                    "thread_run_id": trid,
                }),
            ),
            EventPayload::AssistantComplete {
                message_id,
                content,
                tool_calls,
            } => {
                let mut inner = json!({"role": "assistant", "content": content});
                let mut metadata = json!({
                    "stream_status": "complete",
                    "thread_run_id": trid,
                });
                if !tool_calls.is_empty() {
                    inner["tool_calls"] = serde_json::to_value(tool_calls).unwrap_or(Value::Null);
                    let unified: Vec<Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "tool_call_id": tc.id,
                                "function_name": tc.name,
                                "arguments": tc.arguments,
                                "source": "native",
                            })
                        })
                        .collect();
                    metadata["tool_calls"] = Value::Array(unified);
                }
                self.envelope("assistant", Some(*message_id), true, inner, metadata)
            }
            EventPayload::ToolStarted {
                tool_call_id,
                function_name,
                tool_index,
            } => self.envelope(
                "status",
                None,
                false,
                json!({
                    "status_type": StatusType::ToolStarted.as_str(),
                    "tool_call_id": tool_call_id,
                    "function_name": function_name,
                    "tool_index": tool_index,
                }),
                json!({"thread_run_id": trid}),
            ),
            EventPayload::ToolResultMsg {
                message_id,
                result,
                tool_index,
                assistant_message_id,
            } => {
                let mut metadata = json!({
                    "tool_call_id": result.tool_call_id,
                    "function_name": result.tool_name,
                    "tool_index": tool_index,
                    "result": {
                        "success": result.success,
                        "output": result.output_text(),
                        "error": result.error,
                    },
                    "thread_run_id": trid,
                    "return_format": "native",
                });
                if let Some(amid) = assistant_message_id {
                    metadata["assistant_message_id"] = json!(amid.to_string());
                }
                self.envelope(
                    "tool",
                    Some(*message_id),
                    true,
                    json!({
                        "role": "tool",
                        "tool_call_id": result.tool_call_id,
                        "name": result.tool_name,
                        "content": result.output_text(),
                    }),
                    metadata,
                )
            }
            EventPayload::ToolCompleted {
                tool_call_id,
                function_name,
                tool_index,
                success,
                terminating,
            } => {
                let status_type = if *success {
                    StatusType::ToolCompleted
                } else {
                    StatusType::ToolFailed
                };
                let mut content = json!({
                    "status_type": status_type.as_str(),
                    "tool_call_id": tool_call_id,
                    "function_name": function_name,
                    "tool_index": tool_index,
                });
                let mut metadata = json!({"thread_run_id": trid});
                if *terminating {
                    content["finish_reason"] = json!(FinishReason::AgentTerminated.as_str());
                    metadata["agent_should_terminate"] = json!(true);
                }
                self.envelope("status", None, false, content, metadata)
            }
            EventPayload::Finish {
                reason,
                tools_executed,
            } => {
                let mut content = json!({
                    "status_type": StatusType::Finish.as_str(),
                    "finish_reason": reason.as_str(),
                });
                if *tools_executed {
                    content["tools_executed"] = json!(true);
                }
                self.envelope("status", None, false, content, json!({"thread_run_id": trid}))
            }
            EventPayload::Lifecycle {
                status,
                message,
                progress,
            } => {
                let mut out = json!({
                    "type": "status",
                    "sequence": self.sequence,
                    "thread_run_id": trid,
                    "status": status,
                    "message": message,
                    "created_at": ts,
                });
                if let Some(p) = progress {
                    out["progress"] = json!(p);
                }
                out
            }
            EventPayload::Error { message, code } => {
                let mut out = json!({
                    "type": "error",
                    "sequence": self.sequence,
                    "thread_run_id": trid,
                    "error": message,
                    "created_at": ts,
                });
                if let Some(code) = code {
                    out["error_code"] = json!(code.as_str());
                }
                out
            }
        }
    }

    /// Build the stringified-document envelope shared by transcript-shaped
    /// events.
    fn envelope(
        &self,
        kind: &str,
        message_id: Option<Uuid>,
        is_llm_message: bool,
        content: Value,
        metadata: Value,
    ) -> Value {
        let ts = self.created_at.to_rfc3339();
        json!({
            "sequence": self.sequence,
            "message_id": message_id.map(|id| id.to_string()),
            "thread_id": self.thread_id.to_string(),
            "type": kind,
            "is_llm_message": is_llm_message,
            "content": stringify(&content),
            "metadata": stringify(&metadata),
            "created_at": ts,
            "updated_at": ts,
        })
    }
}

fn stringify(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Read the `status_type` of a wire-format status event.
pub fn wire_status_type(event: &Value) -> Option<StatusType> {
    if event.get("type")?.as_str()? != "status" {
        return None;
    }
    let content = event.get("content")?;
    let doc: Value = match content {
        Value::String(s) => serde_json::from_str(s).ok()?,
        other => other.clone(),
    };
    Some(StatusType::parse(doc.get("status_type")?.as_str()?))
}
