//! Thread and message vocabulary.
//!
//! Messages are append-only in the hot path; compression may rewrite
//! `metadata.compressed_content` and mark predecessors omitted, but the
//! run core never updates a message row in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Pending,
    Initializing,
    Ready,
    Error,
}

/// Message row discriminator.
///
/// Only `user`, `assistant` and `tool` rows participate in the LLM
/// context (`is_llm_message = true`); the rest are transcript markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    Tool,
    Status,
    LlmResponseStart,
    LlmResponseEnd,
    BrowserState,
    TaskList,
    #[serde(untagged)]
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Status => "status",
            Self::LlmResponseStart => "llm_response_start",
            Self::LlmResponseEnd => "llm_response_end",
            Self::BrowserState => "browser_state",
            Self::TaskList => "task_list",
            Self::Other(s) => s.as_str(),
        }
    }
}

/// A message produced during a run, queued for persistence.
///
/// `content` and `metadata` are the typed inner documents; they are
/// JSON-stringified only at the storage/stream edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub message_id: Uuid,
    pub thread_id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub is_llm_message: bool,
    pub content: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(
        thread_id: Uuid,
        message_type: MessageType,
        is_llm_message: bool,
        content: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            thread_id,
            message_type,
            is_llm_message,
            content,
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serde_known_and_custom() {
        let t: MessageType = serde_json::from_str("\"llm_response_start\"").unwrap();
        assert_eq!(t, MessageType::LlmResponseStart);

        let custom: MessageType = serde_json::from_str("\"image_context\"").unwrap();
        assert_eq!(custom, MessageType::Other("image_context".into()));
        assert_eq!(custom.as_str(), "image_context");
    }

    #[test]
    fn new_message_allocates_fresh_id() {
        let thread_id = Uuid::new_v4();
        let a = NewMessage::new(
            thread_id,
            MessageType::Assistant,
            true,
            serde_json::json!({"role": "assistant", "content": "hi"}),
            serde_json::json!({}),
        );
        let b = NewMessage::new(
            thread_id,
            MessageType::Assistant,
            true,
            serde_json::json!({"role": "assistant", "content": "hi"}),
            serde_json::json!({}),
        );
        assert_ne!(a.message_id, b.message_id);
    }
}
