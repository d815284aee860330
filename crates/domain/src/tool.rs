//! Tool call vocabulary (provider-agnostic).

use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model.
///
/// `arguments` is the raw JSON string; during streaming it arrives
/// incrementally and is only parsed at invocation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Normalized outcome of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolResult {
    /// The string form persisted in `tool` message content.
    pub fn output_text(&self) -> String {
        match &self.output {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// The shape a tool callable returns.
///
/// Callables that already expose `success`/`output` are used verbatim;
/// any other value becomes `{success: true, output: value}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: serde_json::Value,
}

impl ToolOutcome {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::String(message.into()),
        }
    }

    /// Normalize an arbitrary callable return value.
    pub fn from_value(value: serde_json::Value) -> Self {
        if let Some(obj) = value.as_object() {
            if let (Some(success), Some(output)) = (
                obj.get("success").and_then(|v| v.as_bool()),
                obj.get("output"),
            ) {
                return Self {
                    success,
                    output: output.clone(),
                };
            }
        }
        Self::ok(value)
    }
}
