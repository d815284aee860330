//! Broker-backed sinks: post-run side jobs become queue entries instead
//! of detached in-process tasks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use relay_kv::Kv;
use relay_runtime::sinks::Sinks;
use relay_store::RunPersistence;

pub const SIDE_JOB_QUEUE: &str = "relay_side_jobs";

/// Wire form of a side job on the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideJob {
    ExtractMemories {
        thread_id: Uuid,
        account_id: Uuid,
        message_ids: Vec<Uuid>,
    },
    NotifyCompletion {
        account_id: Uuid,
        thread_id: Uuid,
        task_name: String,
        agent_name: Option<String>,
    },
    NotifyFailure {
        account_id: Uuid,
        thread_id: Uuid,
        task_name: String,
        reason: String,
    },
    CategorizeProject {
        project_id: Uuid,
    },
}

pub struct BrokerSinks {
    kv: Arc<dyn Kv>,
    persistence: Arc<dyn RunPersistence>,
    queue_key: String,
}

impl BrokerSinks {
    pub fn new(kv: Arc<dyn Kv>, persistence: Arc<dyn RunPersistence>) -> Self {
        Self {
            kv,
            persistence,
            queue_key: SIDE_JOB_QUEUE.to_string(),
        }
    }

    async fn enqueue(&self, job: SideJob) {
        let payload = match serde_json::to_string(&job) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode side job");
                return;
            }
        };
        if let Err(e) = self.kv.rpush(&self.queue_key, &payload).await {
            warn!(error = %e, "failed to enqueue side job");
        }
    }
}

#[async_trait::async_trait]
impl Sinks for BrokerSinks {
    async fn extract_memories(&self, thread_id: Uuid, account_id: Uuid, message_ids: Vec<Uuid>) {
        // Durable queue row first, broker job as the wake-up.
        if let Err(e) = self
            .persistence
            .enqueue_memory_extraction(thread_id, account_id, &message_ids)
            .await
        {
            warn!(%thread_id, error = %e, "memory extraction row insert failed");
        }
        self.enqueue(SideJob::ExtractMemories {
            thread_id,
            account_id,
            message_ids,
        })
        .await;
    }

    async fn notify_completion(
        &self,
        account_id: Uuid,
        thread_id: Uuid,
        task_name: String,
        agent_name: Option<String>,
    ) {
        self.enqueue(SideJob::NotifyCompletion {
            account_id,
            thread_id,
            task_name,
            agent_name,
        })
        .await;
    }

    async fn notify_failure(
        &self,
        account_id: Uuid,
        thread_id: Uuid,
        task_name: String,
        reason: String,
    ) {
        self.enqueue(SideJob::NotifyFailure {
            account_id,
            thread_id,
            task_name,
            reason,
        })
        .await;
    }

    async fn categorize_project(&self, project_id: Uuid) {
        self.enqueue(SideJob::CategorizeProject { project_id }).await;
    }
}
