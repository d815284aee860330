//! The typed cache facade.
//!
//! Cache failures are never fatal: a failed read is a miss, a failed
//! write is logged and dropped. Correctness comes from the store; the
//! cache only buys latency.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use relay_domain::agent::AgentConfig;
use relay_kv::Kv;

use crate::invalidation::InvalidationSet;
use crate::keys;

#[derive(Clone)]
pub struct CacheLayer {
    kv: Arc<dyn Kv>,
}

impl CacheLayer {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    // ── Agent ────────────────────────────────────────────────────────

    pub async fn agent_config(&self, agent_id: Uuid, version: Option<Uuid>) -> Option<AgentConfig> {
        self.get_json(&keys::agent_config(agent_id, version)).await
    }

    pub async fn set_agent_config(
        &self,
        agent_id: Uuid,
        version: Option<Uuid>,
        config: &AgentConfig,
    ) {
        self.set_json(
            &keys::agent_config(agent_id, version),
            config,
            keys::AGENT_CONFIG_TTL,
        )
        .await;
    }

    pub async fn agent_mcps(&self, agent_id: Uuid) -> Option<serde_json::Value> {
        self.get_json(&keys::agent_mcps(agent_id)).await
    }

    pub async fn set_agent_mcps(&self, agent_id: Uuid, bundle: &serde_json::Value) {
        self.set_json(&keys::agent_mcps(agent_id), bundle, keys::AGENT_MCPS_TTL)
            .await;
    }

    pub async fn agent_type(&self, agent_id: Uuid) -> Option<String> {
        self.get_json(&keys::agent_type(agent_id)).await
    }

    pub async fn set_agent_type(&self, agent_id: Uuid, tag: &str) {
        self.set_json(&keys::agent_type(agent_id), &tag, keys::AGENT_TYPE_TTL)
            .await;
    }

    // ── Project / thread / account ───────────────────────────────────

    pub async fn project_meta(&self, project_id: Uuid) -> Option<serde_json::Value> {
        self.get_json(&keys::project_meta(project_id)).await
    }

    pub async fn set_project_meta(&self, project_id: Uuid, meta: &serde_json::Value) {
        self.set_json(&keys::project_meta(project_id), meta, keys::PROJECT_META_TTL)
            .await;
    }

    pub async fn running_runs(&self, account_id: Uuid) -> Option<i64> {
        self.get_json(&keys::running_runs(account_id)).await
    }

    pub async fn set_running_runs(&self, account_id: Uuid, count: i64) {
        self.set_json(&keys::running_runs(account_id), &count, keys::RUNNING_RUNS_TTL)
            .await;
    }

    pub async fn thread_count(&self, account_id: Uuid) -> Option<i64> {
        self.get_json(&keys::thread_count(account_id)).await
    }

    pub async fn set_thread_count(&self, account_id: Uuid, count: i64) {
        self.set_json(&keys::thread_count(account_id), &count, keys::THREAD_COUNT_TTL)
            .await;
    }

    /// Bump a warm thread-count entry instead of invalidating it; a cold
    /// entry stays cold (the next read refills from the store).
    pub async fn increment_thread_count(&self, account_id: Uuid) {
        let key = keys::thread_count(account_id);
        match self.kv.get(&key).await {
            Ok(Some(_)) => {
                if let Err(e) = self.kv.incr(&key).await {
                    warn!(key, error = %e, "thread count increment failed");
                }
            }
            _ => {}
        }
    }

    pub async fn tier_info(&self, account_id: Uuid) -> Option<serde_json::Value> {
        self.get_json(&keys::tier_info(account_id)).await
    }

    pub async fn set_tier_info(&self, account_id: Uuid, tier: &serde_json::Value) {
        self.set_json(&keys::tier_info(account_id), tier, keys::TIER_INFO_TTL)
            .await;
    }

    // ── Context ──────────────────────────────────────────────────────

    pub async fn kb_context(&self, agent_id: Uuid) -> Option<String> {
        self.get_json(&keys::kb_context(agent_id)).await
    }

    pub async fn set_kb_context(&self, agent_id: Uuid, context: &str) {
        self.set_json(&keys::kb_context(agent_id), &context, keys::KB_CONTEXT_TTL)
            .await;
    }

    pub async fn user_context(&self, user_id: Uuid) -> Option<String> {
        self.get_json(&keys::user_context(user_id)).await
    }

    pub async fn set_user_context(&self, user_id: Uuid, context: &str) {
        self.set_json(&keys::user_context(user_id), &context, keys::USER_CONTEXT_TTL)
            .await;
    }

    pub async fn message_history(&self, thread_id: Uuid) -> Option<Vec<serde_json::Value>> {
        self.get_json(&keys::message_history(thread_id)).await
    }

    pub async fn set_message_history(&self, thread_id: Uuid, messages: &[serde_json::Value]) {
        self.set_json(
            &keys::message_history(thread_id),
            &messages,
            keys::MESSAGE_HISTORY_TTL,
        )
        .await;
    }

    // ── Stream handle ────────────────────────────────────────────────

    pub async fn stream_handle(&self, run_id: Uuid) -> Option<String> {
        self.get_json(&keys::stream_handle(run_id)).await
    }

    pub async fn set_stream_handle(&self, run_id: Uuid, stream_key: &str) {
        self.set_json(&keys::stream_handle(run_id), &stream_key, keys::STREAM_HANDLE_TTL)
            .await;
    }

    // ── Invalidation ─────────────────────────────────────────────────

    /// Delete every key in the set. Best-effort: a failed delete only
    /// shortens the staleness window to the key's TTL.
    pub async fn invalidate(&self, set: &InvalidationSet) {
        for key in set.keys() {
            if let Err(e) = self.kv.delete(key).await {
                warn!(key, error = %e, "cache invalidation failed");
            }
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "dropping undecodable cache entry");
                    let _ = self.kv.delete(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache encode failed");
                return;
            }
        };
        if let Err(e) = self.kv.set(key, &raw, Some(ttl), false).await {
            warn!(key, error = %e, "cache write failed");
        }
    }
}
