//! One tool invocation: parse, execute under a timeout, normalize.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use relay_domain::tool::{ToolOutcome, ToolResult};

use crate::registry::ToolSnapshot;

pub struct Invoker {
    timeout: Duration,
}

impl Invoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Invoke `name` with the raw JSON argument string.
    ///
    /// Never fails: unknown tools, argument parse errors, handler errors
    /// and timeouts all come back as `success = false` results.
    pub async fn invoke(
        &self,
        snapshot: &ToolSnapshot,
        tool_call_id: &str,
        name: &str,
        args_json: &str,
    ) -> ToolResult {
        let started = Instant::now();
        let outcome = self.run(snapshot, name, args_json).await;
        let elapsed = started.elapsed().as_millis() as u64;

        debug!(
            tool = name,
            success = outcome.success,
            elapsed_ms = elapsed,
            "tool invocation finished"
        );

        ToolResult {
            tool_call_id: tool_call_id.to_string(),
            tool_name: name.to_string(),
            success: outcome.success,
            error: (!outcome.success).then(|| match &outcome.output {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            output: outcome.output,
            execution_time_ms: elapsed,
        }
    }

    async fn run(&self, snapshot: &ToolSnapshot, name: &str, args_json: &str) -> ToolOutcome {
        let Some(handler) = snapshot.handler(name) else {
            return ToolOutcome::err(format!("Tool '{name}' not found"));
        };

        let args = if args_json.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(args_json) {
                Ok(args) => args,
                Err(e) => {
                    warn!(tool = name, error = %e, "tool arguments are not valid JSON");
                    return ToolOutcome::err(format!("invalid arguments: {e}"));
                }
            }
        };

        match tokio::time::timeout(self.timeout, handler.call(args)).await {
            Ok(Ok(value)) => ToolOutcome::from_value(value),
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "tool execution failed");
                ToolOutcome::err(e.to_string())
            }
            Err(_) => {
                warn!(tool = name, timeout_s = self.timeout.as_secs(), "tool timed out");
                ToolOutcome::err(format!(
                    "tool '{name}' timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        }
    }
}
