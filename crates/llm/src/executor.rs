//! The streaming executor in front of a provider.
//!
//! Applies the cache-control marker to the system prompt, estimates
//! prompt tokens before the call, and guarantees the chunk stream is
//! drained promptly when the caller's cancellation flag fires.

use std::sync::Arc;

use tracing::debug;

use relay_domain::chat::{ChatMessage, Role};
use relay_domain::stream::{BoxStream, LlmChunk};
use relay_domain::tool::ToolDefinition;
use relay_domain::Result;

use crate::tokens;
use crate::traits::{LlmProvider, LlmRequest, ToolChoice};

/// Payloads above this size get token-counted off the event loop.
const OFFLOAD_THRESHOLD_CHARS: usize = 64 * 1024;

pub struct LlmExecutor {
    provider: Arc<dyn LlmProvider>,
}

impl LlmExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    /// Mark the system prompt for provider-side prompt caching.
    pub fn apply_cache_control(messages: &mut [ChatMessage]) {
        if let Some(system) = messages.iter_mut().find(|m| m.role == Role::System) {
            system.cache_control = true;
        }
    }

    /// Best-effort prompt token estimate; large payloads are counted on a
    /// blocking thread.
    pub async fn estimate_prompt_tokens(messages: &[ChatMessage]) -> u64 {
        let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        if total_chars < OFFLOAD_THRESHOLD_CHARS {
            return tokens::estimate_messages(messages);
        }
        let owned = messages.to_vec();
        tokio::task::spawn_blocking(move || tokens::estimate_messages(&owned))
            .await
            .unwrap_or_else(|_| tokens::estimate_messages(&[]))
    }

    /// Start one streaming step.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        mut prepared_messages: Vec<ChatMessage>,
        model: &str,
        temperature: f32,
        max_tokens: Option<u32>,
        tool_schemas: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
        native_tool_calling: bool,
        xml_tool_calling: bool,
    ) -> Result<BoxStream<'static, Result<LlmChunk>>> {
        Self::apply_cache_control(&mut prepared_messages);

        let request = LlmRequest {
            messages: prepared_messages,
            model: model.to_string(),
            temperature,
            max_tokens,
            tools: tool_schemas,
            tool_choice,
            native_tool_calling,
            xml_tool_calling,
        };
        debug!(
            provider = self.provider.provider_id(),
            model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting llm stream"
        );
        self.provider.chat_stream(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    use crate::scripted::ScriptedProvider;
    use relay_domain::stream::FinishReason;

    #[test]
    fn cache_control_marks_system_only() {
        let mut messages = vec![
            ChatMessage::system("core prompt"),
            ChatMessage::user("hi"),
        ];
        LlmExecutor::apply_cache_control(&mut messages);
        assert!(messages[0].cache_control);
        assert!(!messages[1].cache_control);
    }

    #[test]
    fn cache_control_no_system_is_noop() {
        let mut messages = vec![ChatMessage::user("hi")];
        LlmExecutor::apply_cache_control(&mut messages);
        assert!(!messages[0].cache_control);
    }

    #[tokio::test]
    async fn estimate_small_and_large_paths_agree() {
        let small = vec![ChatMessage::user("hello world")];
        let direct = tokens::estimate_messages(&small);
        assert_eq!(LlmExecutor::estimate_prompt_tokens(&small).await, direct);

        let large = vec![ChatMessage::user("x".repeat(OFFLOAD_THRESHOLD_CHARS + 1))];
        let expected = tokens::estimate_messages(&large);
        assert_eq!(LlmExecutor::estimate_prompt_tokens(&large).await, expected);
    }

    #[tokio::test]
    async fn execute_streams_scripted_chunks() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            LlmChunk::ContentDelta { text: "hi".into() },
            LlmChunk::Finish {
                reason: FinishReason::Stop,
            },
        ]]));
        let executor = LlmExecutor::new(provider.clone());

        let mut stream = executor
            .execute(
                vec![ChatMessage::system("s"), ChatMessage::user("u")],
                "gpt-5-mini",
                0.0,
                None,
                Vec::new(),
                ToolChoice::Auto,
                true,
                false,
            )
            .await
            .unwrap();

        let mut texts = Vec::new();
        while let Some(chunk) = stream.next().await {
            if let LlmChunk::ContentDelta { text } = chunk.unwrap() {
                texts.push(text);
            }
        }
        assert_eq!(texts, vec!["hi"]);

        // The provider saw the cache-control marker.
        let seen = provider.requests();
        assert!(seen[0].messages[0].cache_control);
    }
}
