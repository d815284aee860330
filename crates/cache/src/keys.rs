//! Cache key shapes and TTLs.

use std::time::Duration;
use uuid::Uuid;

pub const AGENT_CONFIG_TTL: Duration = Duration::from_secs(3600);
pub const AGENT_MCPS_TTL: Duration = Duration::from_secs(3600);
pub const AGENT_TYPE_TTL: Duration = Duration::from_secs(3600);
pub const PROJECT_META_TTL: Duration = Duration::from_secs(300);
pub const RUNNING_RUNS_TTL: Duration = Duration::from_secs(5);
pub const THREAD_COUNT_TTL: Duration = Duration::from_secs(300);
pub const KB_CONTEXT_TTL: Duration = Duration::from_secs(300);
pub const USER_CONTEXT_TTL: Duration = Duration::from_secs(900);
pub const MESSAGE_HISTORY_TTL: Duration = Duration::from_secs(60);
pub const TIER_INFO_TTL: Duration = Duration::from_secs(600);
pub const STREAM_HANDLE_TTL: Duration = Duration::from_secs(3600);

pub fn agent_config(agent_id: Uuid, version: Option<Uuid>) -> String {
    match version {
        Some(version) => format!("agent_config:{agent_id}:{version}"),
        None => format!("agent_config:{agent_id}"),
    }
}

pub fn agent_mcps(agent_id: Uuid) -> String {
    format!("agent_mcps:{agent_id}")
}

pub fn agent_type(agent_id: Uuid) -> String {
    format!("agent_type:{agent_id}")
}

pub fn project_meta(project_id: Uuid) -> String {
    format!("project_meta:{project_id}")
}

pub fn running_runs(account_id: Uuid) -> String {
    format!("running_runs:{account_id}")
}

pub fn thread_count(account_id: Uuid) -> String {
    format!("thread_count:{account_id}")
}

pub fn kb_context(agent_id: Uuid) -> String {
    format!("kb_context:{agent_id}")
}

pub fn user_context(user_id: Uuid) -> String {
    format!("user_context:{user_id}")
}

pub fn message_history(thread_id: Uuid) -> String {
    format!("message_history:{thread_id}")
}

pub fn tier_info(account_id: Uuid) -> String {
    format!("tier_info:{account_id}")
}

pub fn stream_handle(run_id: Uuid) -> String {
    format!("agent_run_stream:{run_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        let id = Uuid::nil();
        assert_eq!(
            agent_config(id, None),
            "agent_config:00000000-0000-0000-0000-000000000000"
        );
        assert!(agent_config(id, Some(id)).ends_with(":00000000-0000-0000-0000-000000000000"));
        assert!(running_runs(id).starts_with("running_runs:"));
        assert!(stream_handle(id).starts_with("agent_run_stream:"));
    }
}
