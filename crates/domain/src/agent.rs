//! Agent configuration as consumed by the run core.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The resolved configuration a run executes under.
///
/// Custom agents come from the `agents` table via the cache layer; the
/// platform default is a static template loaded once per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: Option<Uuid>,
    pub name: String,
    pub system_prompt: String,
    /// Model override; the job's model wins when both are set.
    #[serde(default)]
    pub model: Option<String>,
    /// Tool/MCP bundle in its stored form; the registry interprets it.
    #[serde(default)]
    pub tool_bundle: serde_json::Value,
    /// Whether this is the platform default template.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub centrally_managed: bool,
}

impl AgentConfig {
    /// The built-in template used when a run carries no agent id.
    pub fn default_template() -> Self {
        Self {
            agent_id: None,
            name: "default".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            model: None,
            tool_bundle: serde_json::Value::Null,
            is_default: true,
            centrally_managed: true,
        }
    }
}
