//! The persistence seam consumed by the runtime.
//!
//! [`PgPersistence`] is the Postgres-backed production implementation;
//! [`crate::memory::MemoryStore`] backs tests and local development.

use std::sync::Arc;

use uuid::Uuid;

use relay_domain::message::NewMessage;
use relay_domain::run::RunStatus;
use relay_domain::Result;

use crate::credits::CreditRepo;
use crate::messages::MessageRepo;
use crate::runs::RunRepo;
use crate::store::{ReadPreference, Store};
use crate::threads::ThreadRepo;

/// The slice of a thread row the run core needs.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub thread_id: Uuid,
    pub project_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub name: Option<String>,
}

#[async_trait::async_trait]
pub trait RunPersistence: Send + Sync {
    /// Insert a batch of messages for one thread, preserving order.
    async fn insert_messages(&self, messages: &[NewMessage]) -> Result<()>;

    /// Current `agent_runs.status` (primary read; feeds stale-lock takeover).
    async fn run_status(&self, run_id: Uuid) -> Result<Option<RunStatus>>;

    /// Terminal status transition; returns whether a row was updated.
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<bool>;

    /// LLM-visible transcript content documents, oldest first.
    async fn llm_messages(&self, thread_id: Uuid) -> Result<Vec<serde_json::Value>>;

    /// All message ids of a thread, oldest first.
    async fn message_ids(&self, thread_id: Uuid) -> Result<Vec<Uuid>>;

    /// Reserve credits; `None` means insufficient balance.
    async fn reserve_credits(&self, account_id: Uuid, amount_cents: i64) -> Result<Option<Uuid>>;

    /// Count of running runs for an account.
    async fn running_count(&self, account_id: Uuid) -> Result<i64>;

    async fn thread_info(&self, thread_id: Uuid) -> Result<Option<ThreadInfo>>;

    /// Queue a post-run memory extraction job.
    async fn enqueue_memory_extraction(
        &self,
        thread_id: Uuid,
        account_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Postgres implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PgPersistence {
    store: Arc<Store>,
}

impl PgPersistence {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[async_trait::async_trait]
impl RunPersistence for PgPersistence {
    async fn insert_messages(&self, messages: &[NewMessage]) -> Result<()> {
        MessageRepo::new(&self.store).insert_batch(messages).await
    }

    async fn run_status(&self, run_id: Uuid) -> Result<Option<RunStatus>> {
        RunRepo::new(&self.store).status(run_id).await
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        RunRepo::new(&self.store)
            .update_status(run_id, status, error)
            .await
    }

    async fn llm_messages(&self, thread_id: Uuid) -> Result<Vec<serde_json::Value>> {
        let rows = MessageRepo::new(&self.store)
            .llm_messages(thread_id, ReadPreference::Primary)
            .await?;
        Ok(rows.into_iter().map(|row| row.content).collect())
    }

    async fn message_ids(&self, thread_id: Uuid) -> Result<Vec<Uuid>> {
        MessageRepo::new(&self.store).message_ids(thread_id).await
    }

    async fn reserve_credits(&self, account_id: Uuid, amount_cents: i64) -> Result<Option<Uuid>> {
        CreditRepo::new(&self.store)
            .reserve(account_id, amount_cents)
            .await
    }

    async fn running_count(&self, account_id: Uuid) -> Result<i64> {
        RunRepo::new(&self.store).running_count(account_id).await
    }

    async fn thread_info(&self, thread_id: Uuid) -> Result<Option<ThreadInfo>> {
        let row = ThreadRepo::new(&self.store).get(thread_id).await?;
        Ok(row.map(|t| ThreadInfo {
            thread_id: t.thread_id,
            project_id: t.project_id,
            account_id: t.account_id,
            name: t.name,
        }))
    }

    async fn enqueue_memory_extraction(
        &self,
        thread_id: Uuid,
        account_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<()> {
        ThreadRepo::new(&self.store)
            .enqueue_memory_extraction(thread_id, account_id, message_ids)
            .await
    }
}
