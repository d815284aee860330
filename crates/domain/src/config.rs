//! Worker configuration tree.
//!
//! Deserialized from TOML with serde defaults; connection URLs may be
//! overridden by environment variables at load time (the binary handles
//! that). `validate()` reports issues without aborting so the caller can
//! decide which severities are fatal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    #[serde(default = "d_redis_url")]
    pub url: String,
    /// Client-side deadline applied to every Redis operation.
    #[serde(default = "d_3000")]
    pub op_timeout_ms: u64,
    #[serde(default = "d_3u32")]
    pub max_retries: u32,
    #[serde(default = "d_16")]
    pub pool_size: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: d_redis_url(),
            op_timeout_ms: 3_000,
            max_retries: 3,
            pool_size: 16,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Postgres connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "d_pg_url")]
    pub primary_url: String,
    /// Optional read replica. Reads stay on the primary unless a call
    /// site opts into the replica explicitly.
    #[serde(default)]
    pub replica_url: Option<String>,
    #[serde(default = "d_15")]
    pub connect_timeout_secs: u64,
    #[serde(default = "d_30")]
    pub statement_timeout_secs: u64,
    #[serde(default = "d_20u32")]
    pub max_connections: u32,
    #[serde(default = "d_2u32")]
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            primary_url: d_pg_url(),
            replica_url: None,
            connect_timeout_secs: 15,
            statement_timeout_secs: 30,
            max_connections: 20,
            max_retries: 2,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Approximate cap on stream length per run.
    #[serde(default = "d_10000")]
    pub maxlen: usize,
    /// TTL set on the stream key after completion.
    #[serde(default = "d_3600")]
    pub ttl_secs: u64,
    /// In-flight publish/append cap before streaming writes pause.
    #[serde(default = "d_500")]
    pub max_pending_ops: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            maxlen: 10_000,
            ttl_secs: 3_600,
            max_pending_ops: 500,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run loop caps & cadence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Hard upper bound on LLM steps per run.
    #[serde(default = "d_100")]
    pub max_steps: u32,
    #[serde(default = "d_25")]
    pub max_auto_continues: u32,
    #[serde(default = "d_10")]
    pub heartbeat_secs: u64,
    /// Lock TTL; must be at least 3x the heartbeat period.
    #[serde(default = "d_60")]
    pub lock_ttl_secs: u64,
    #[serde(default = "d_5")]
    pub flush_interval_secs: u64,
    #[serde(default = "d_120")]
    pub tool_timeout_secs: u64,
    #[serde(default = "d_600")]
    pub step_idempotency_ttl_secs: u64,
    #[serde(default = "d_30")]
    pub drain_timeout_secs: u64,
    /// Tools whose successful invocation ends the run.
    #[serde(default = "d_terminators")]
    pub terminator_tools: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_auto_continues: 25,
            heartbeat_secs: 10,
            lock_ttl_secs: 60,
            flush_interval_secs: 5,
            tool_timeout_secs: 120,
            step_idempotency_ttl_secs: 600,
            drain_timeout_secs: 30,
            terminator_tools: d_terminators(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM defaults & pricing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_default_model")]
    pub default_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Expose tool schemas through the provider's native function-calling
    /// interface.
    #[serde(default = "d_true")]
    pub native_tool_calling: bool,
    /// Ask adapters to also accept XML-style tool calls in text (legacy
    /// models without native tool support).
    #[serde(default)]
    pub xml_tool_calling: bool,
    /// Alias → canonical model id.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,
    /// Per-model pricing for credit estimation (USD per 1k tokens).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: d_default_model(),
            temperature: 0.0,
            max_tokens: None,
            native_tool_calling: true,
            xml_tool_calling: false,
            model_aliases: HashMap::new(),
            pricing: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelPricing {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl ModelPricing {
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Stable worker identity; a random short id is generated when unset.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default = "d_queue_key")]
    pub queue_key: String,
    #[serde(default = "d_5")]
    pub dequeue_timeout_secs: u64,
    /// In-flight runs get this long to finish after SIGTERM.
    #[serde(default = "d_30")]
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            queue_key: d_queue_key(),
            dequeue_timeout_secs: 5,
            shutdown_grace_secs: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.run.lock_ttl_secs < self.run.heartbeat_secs * 3 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!(
                    "run.lock_ttl_secs ({}) must be at least 3x run.heartbeat_secs ({})",
                    self.run.lock_ttl_secs, self.run.heartbeat_secs
                ),
            });
        }
        if self.run.max_auto_continues > self.run.max_steps {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "run.max_auto_continues ({}) exceeds run.max_steps ({}); the step cap wins",
                    self.run.max_auto_continues, self.run.max_steps
                ),
            });
        }
        if self.run.terminator_tools.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "run.terminator_tools is empty; runs can only end via stop/end_turn".into(),
            });
        }
        if self.stream.maxlen == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "stream.maxlen must be positive".into(),
            });
        }
        if self.kv.op_timeout_ms < 500 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "kv.op_timeout_ms ({}) is very low; transient network jitter will surface as failures",
                    self.kv.op_timeout_ms
                ),
            });
        }

        issues
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn d_pg_url() -> String {
    "postgres://localhost/relay".to_string()
}
fn d_default_model() -> String {
    "gpt-5-mini".to_string()
}
fn d_queue_key() -> String {
    "agent_run_jobs".to_string()
}
fn d_terminators() -> Vec<String> {
    vec!["ask".to_string(), "complete".to_string()]
}
fn d_true() -> bool {
    true
}
fn d_2u32() -> u32 {
    2
}
fn d_3u32() -> u32 {
    3
}
fn d_5() -> u64 {
    5
}
fn d_10() -> u64 {
    10
}
fn d_15() -> u64 {
    15
}
fn d_16() -> usize {
    16
}
fn d_20u32() -> u32 {
    20
}
fn d_25() -> u32 {
    25
}
fn d_30() -> u64 {
    30
}
fn d_60() -> u64 {
    60
}
fn d_100() -> u32 {
    100
}
fn d_120() -> u64 {
    120
}
fn d_500() -> usize {
    500
}
fn d_600() -> u64 {
    600
}
fn d_3000() -> u64 {
    3_000
}
fn d_3600() -> u64 {
    3_600
}
fn d_10000() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.run.max_auto_continues, 25);
        assert_eq!(config.stream.maxlen, 10_000);
        assert_eq!(config.run.terminator_tools, vec!["ask", "complete"]);
    }

    #[test]
    fn short_lock_ttl_is_an_error() {
        let mut config = Config::default();
        config.run.lock_ttl_secs = 15;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("lock_ttl")));
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.kv.op_timeout_ms, 3_000);
        assert_eq!(config.store.max_retries, 2);
        assert!(config.store.replica_url.is_none());
    }

    #[test]
    fn partial_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
            [stream]
            maxlen = 2000

            [run]
            terminator_tools = ["ask", "complete", "handoff"]

            [llm.pricing."gpt-5-mini"]
            input_cost_per_1k = 0.00025
            output_cost_per_1k = 0.002
            "#,
        )
        .unwrap();
        assert_eq!(config.stream.maxlen, 2_000);
        assert_eq!(config.run.terminator_tools.len(), 3);
        let pricing = config.llm.pricing.get("gpt-5-mini").unwrap();
        let cost = pricing.estimate_cost(1000, 1000);
        assert!((cost - 0.00225).abs() < 1e-9);
    }
}
