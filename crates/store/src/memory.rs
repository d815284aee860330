//! In-process persistence backend for tests and local development.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use relay_domain::message::NewMessage;
use relay_domain::run::RunStatus;
use relay_domain::Result;

use crate::traits::{RunPersistence, ThreadInfo};

#[derive(Default)]
struct Inner {
    messages: HashMap<Uuid, Vec<NewMessage>>,
    runs: HashMap<Uuid, (RunStatus, Option<String>)>,
    run_accounts: HashMap<Uuid, Uuid>,
    threads: HashMap<Uuid, ThreadInfo>,
    balances: HashMap<Uuid, i64>,
    extraction_jobs: Vec<(Uuid, Uuid, Vec<Uuid>)>,
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Test fixtures & inspection ───────────────────────────────────

    pub fn put_thread(&self, info: ThreadInfo) {
        self.inner.lock().threads.insert(info.thread_id, info);
    }

    pub fn put_run(&self, run_id: Uuid, status: RunStatus, account_id: Option<Uuid>) {
        let mut inner = self.inner.lock();
        inner.runs.insert(run_id, (status, None));
        if let Some(account_id) = account_id {
            inner.run_accounts.insert(run_id, account_id);
        }
    }

    pub fn set_balance(&self, account_id: Uuid, cents: i64) {
        self.inner.lock().balances.insert(account_id, cents);
    }

    pub fn balance(&self, account_id: Uuid) -> i64 {
        self.inner.lock().balances.get(&account_id).copied().unwrap_or(0)
    }

    pub fn messages(&self, thread_id: Uuid) -> Vec<NewMessage> {
        self.inner
            .lock()
            .messages
            .get(&thread_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn run(&self, run_id: Uuid) -> Option<(RunStatus, Option<String>)> {
        self.inner.lock().runs.get(&run_id).cloned()
    }

    pub fn extraction_jobs(&self) -> Vec<(Uuid, Uuid, Vec<Uuid>)> {
        self.inner.lock().extraction_jobs.clone()
    }

    pub fn seed_messages(&self, thread_id: Uuid, messages: Vec<NewMessage>) {
        self.inner.lock().messages.insert(thread_id, messages);
    }
}

#[async_trait::async_trait]
impl RunPersistence for MemoryStore {
    async fn insert_messages(&self, messages: &[NewMessage]) -> Result<()> {
        let mut inner = self.inner.lock();
        for message in messages {
            let thread = inner.messages.entry(message.thread_id).or_default();
            // Mirrors the ON CONFLICT DO NOTHING insert.
            if !thread.iter().any(|m| m.message_id == message.message_id) {
                thread.push(message.clone());
            }
        }
        Ok(())
    }

    async fn run_status(&self, run_id: Uuid) -> Result<Option<RunStatus>> {
        Ok(self.inner.lock().runs.get(&run_id).map(|(s, _)| *s))
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.runs.get_mut(&run_id) {
            Some(entry) => {
                entry.0 = status;
                if let Some(error) = error {
                    entry.1 = Some(error.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn llm_messages(&self, thread_id: Uuid) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .inner
            .lock()
            .messages
            .get(&thread_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| {
                        m.is_llm_message
                            && !m
                                .metadata
                                .get("omitted")
                                .and_then(|v| v.as_bool())
                                .unwrap_or(false)
                    })
                    .map(|m| m.content.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn message_ids(&self, thread_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .lock()
            .messages
            .get(&thread_id)
            .map(|msgs| msgs.iter().map(|m| m.message_id).collect())
            .unwrap_or_default())
    }

    async fn reserve_credits(&self, account_id: Uuid, amount_cents: i64) -> Result<Option<Uuid>> {
        let mut inner = self.inner.lock();
        let balance = inner.balances.entry(account_id).or_insert(0);
        if *balance < amount_cents {
            return Ok(None);
        }
        *balance -= amount_cents;
        Ok(Some(Uuid::new_v4()))
    }

    async fn running_count(&self, account_id: Uuid) -> Result<i64> {
        let inner = self.inner.lock();
        let count = inner
            .runs
            .iter()
            .filter(|(run_id, (status, _))| {
                *status == RunStatus::Running
                    && inner.run_accounts.get(run_id) == Some(&account_id)
            })
            .count();
        Ok(count as i64)
    }

    async fn thread_info(&self, thread_id: Uuid) -> Result<Option<ThreadInfo>> {
        Ok(self.inner.lock().threads.get(&thread_id).cloned())
    }

    async fn enqueue_memory_extraction(
        &self,
        thread_id: Uuid,
        account_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<()> {
        self.inner
            .lock()
            .extraction_jobs
            .push((thread_id, account_id, message_ids.to_vec()));
        Ok(())
    }
}
