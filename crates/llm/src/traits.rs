//! The provider seam: a streaming chat RPC.

use relay_domain::chat::ChatMessage;
use relay_domain::stream::{BoxStream, LlmChunk};
use relay_domain::tool::ToolDefinition;
use relay_domain::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
}

impl ToolChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::None => "none",
            Self::Required => "required",
        }
    }
}

/// A provider-agnostic streaming chat request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    /// Expose tools via the provider's native function-calling interface.
    pub native_tool_calling: bool,
    /// Also accept XML-style tool calls in text (legacy models); adapters
    /// that support it normalize matches into `ToolCallDelta` chunks.
    pub xml_tool_calling: bool,
}

/// Trait every LLM adapter implements.
///
/// Adapters translate between our normalized chunk stream and each
/// provider's wire format. Terminal provider failures are surfaced
/// in-band as [`LlmChunk::ProviderError`] where possible so the consumer
/// can emit a typed `error` event.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat_stream(&self, req: &LlmRequest) -> Result<BoxStream<'static, Result<LlmChunk>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
