//! Normalized LLM chunk stream (provider-agnostic).

use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    ToolCalls,
    Stop,
    EndTurn,
    Length,
    AgentTerminated,
    #[serde(untagged)]
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ToolCalls => "tool_calls",
            Self::Stop => "stop",
            Self::EndTurn => "end_turn",
            Self::Length => "length",
            Self::AgentTerminated => "agent_terminated",
            Self::Other(s) => s.as_str(),
        }
    }

    /// The coordinator auto-continues on `tool_calls` (queued tools run
    /// first) and on `length` (truncated output).
    pub fn auto_continues(&self) -> bool {
        matches!(self, Self::ToolCalls | Self::Length)
    }

    /// Unknown reasons are treated as a plain stop.
    pub fn normalize(self) -> Self {
        match self {
            Self::Other(_) => Self::Stop,
            other => other,
        }
    }
}

/// Events yielded by a provider's chunk stream after normalization.
///
/// Terminal provider failures arrive in-band as `ProviderError` so the
/// consumer can surface them as `error` events instead of tearing the
/// stream down.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmChunk {
    /// Incremental assistant text.
    ContentDelta { text: String },

    /// Incremental tool-call assembly data for the call at `index`.
    ToolCallDelta {
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments_fragment: Option<String>,
    },

    /// Time-to-first-token marker, surfaced for latency accounting only.
    FirstToken,

    /// The model stopped generating.
    Finish { reason: FinishReason },

    /// Terminal provider failure, surfaced in-band.
    ProviderError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
}
