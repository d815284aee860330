//! Prompt assembly.
//!
//! One canonical builder: the system prompt comes from the agent config
//! (plus cached KB/user context when present) and the context window is
//! the thread's LLM-visible transcript. Prompt *content* beyond this is a
//! pluggable producer concern, not the run core's.

use std::sync::Arc;

use uuid::Uuid;

use relay_cache::CacheLayer;
use relay_domain::agent::AgentConfig;
use relay_domain::Result;
use relay_store::RunPersistence;

#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub system_prompt: String,
    pub context_messages: Vec<serde_json::Value>,
}

#[async_trait::async_trait]
pub trait PromptBuilder: Send + Sync {
    async fn build(&self, thread_id: Uuid, agent: &AgentConfig) -> Result<PreparedPrompt>;
}

pub struct DefaultPromptBuilder {
    persistence: Arc<dyn RunPersistence>,
    cache: Option<CacheLayer>,
}

impl DefaultPromptBuilder {
    pub fn new(persistence: Arc<dyn RunPersistence>, cache: Option<CacheLayer>) -> Self {
        Self { persistence, cache }
    }

    async fn load_history(&self, thread_id: Uuid) -> Result<Vec<serde_json::Value>> {
        if let Some(cache) = &self.cache {
            if let Some(history) = cache.message_history(thread_id).await {
                return Ok(history);
            }
        }
        let history = self.persistence.llm_messages(thread_id).await?;
        if let Some(cache) = &self.cache {
            cache.set_message_history(thread_id, &history).await;
        }
        Ok(history)
    }
}

#[async_trait::async_trait]
impl PromptBuilder for DefaultPromptBuilder {
    async fn build(&self, thread_id: Uuid, agent: &AgentConfig) -> Result<PreparedPrompt> {
        let mut system_prompt = agent.system_prompt.clone();

        if let (Some(cache), Some(agent_id)) = (&self.cache, agent.agent_id) {
            if let Some(kb) = cache.kb_context(agent_id).await {
                if !kb.is_empty() {
                    system_prompt.push_str("\n\n# Knowledge base\n");
                    system_prompt.push_str(&kb);
                }
            }
        }

        Ok(PreparedPrompt {
            system_prompt,
            context_messages: self.load_history(thread_id).await?,
        })
    }
}
