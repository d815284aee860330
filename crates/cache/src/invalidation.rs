//! Invalidation sets — the keys a write must clear, declared once.
//!
//! A writer touching an entity asks for its set and deletes everything in
//! one call, instead of each call site hand-rolling a key list.

use uuid::Uuid;

use crate::keys;

#[derive(Debug, Clone, Default)]
pub struct InvalidationSet {
    keys: Vec<String>,
}

impl InvalidationSet {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn merge(mut self, other: InvalidationSet) -> Self {
        self.keys.extend(other.keys);
        self
    }

    /// Everything derived from an agent's stored configuration.
    pub fn for_agent(agent_id: Uuid) -> Self {
        Self {
            keys: vec![
                keys::agent_config(agent_id, None),
                keys::agent_mcps(agent_id),
                keys::agent_type(agent_id),
                keys::kb_context(agent_id),
            ],
        }
    }

    /// Account-level aggregates touched by run lifecycle transitions.
    pub fn for_account(account_id: Uuid) -> Self {
        Self {
            keys: vec![
                keys::running_runs(account_id),
                keys::thread_count(account_id),
                keys::tier_info(account_id),
            ],
        }
    }

    pub fn for_thread(thread_id: Uuid) -> Self {
        Self {
            keys: vec![keys::message_history(thread_id)],
        }
    }

    pub fn for_project(project_id: Uuid) -> Self {
        Self {
            keys: vec![keys::project_meta(project_id)],
        }
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            keys: vec![keys::user_context(user_id)],
        }
    }

    pub fn for_run(run_id: Uuid) -> Self {
        Self {
            keys: vec![keys::stream_handle(run_id)],
        }
    }
}
