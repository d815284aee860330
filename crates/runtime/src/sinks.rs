//! Post-run side jobs.
//!
//! Modeled as explicit jobs handed to a sink implementation instead of
//! detached in-process tasks; the production implementation enqueues on
//! the job broker. Everything here is best-effort and must never fail
//! the run.

use uuid::Uuid;

#[async_trait::async_trait]
pub trait Sinks: Send + Sync {
    /// Queue memory extraction over the thread's transcript.
    async fn extract_memories(&self, thread_id: Uuid, account_id: Uuid, message_ids: Vec<Uuid>);

    /// Task-completed notification (only fired when the `complete`
    /// terminator ran).
    async fn notify_completion(
        &self,
        account_id: Uuid,
        thread_id: Uuid,
        task_name: String,
        agent_name: Option<String>,
    );

    async fn notify_failure(
        &self,
        account_id: Uuid,
        thread_id: Uuid,
        task_name: String,
        reason: String,
    );

    /// Re-categorize the project icon/metadata after a run.
    async fn categorize_project(&self, project_id: Uuid);
}

/// No-op sinks for contexts without a broker.
#[derive(Default, Clone)]
pub struct NullSinks;

#[async_trait::async_trait]
impl Sinks for NullSinks {
    async fn extract_memories(&self, _: Uuid, _: Uuid, _: Vec<Uuid>) {}
    async fn notify_completion(&self, _: Uuid, _: Uuid, _: String, _: Option<String>) {}
    async fn notify_failure(&self, _: Uuid, _: Uuid, _: String, _: String) {}
    async fn categorize_project(&self, _: Uuid) {}
}

/// Records every sink call; assertion surface for tests.
#[derive(Default, Clone)]
pub struct RecordingSinks {
    inner: std::sync::Arc<parking_lot::Mutex<RecordedSinks>>,
}

#[derive(Default)]
pub struct RecordedSinks {
    pub extractions: Vec<(Uuid, Uuid, Vec<Uuid>)>,
    pub completions: Vec<(Uuid, Uuid, String)>,
    pub failures: Vec<(Uuid, Uuid, String)>,
    pub categorizations: Vec<Uuid>,
}

impl RecordingSinks {
    pub fn completions(&self) -> Vec<(Uuid, Uuid, String)> {
        self.inner.lock().completions.clone()
    }

    pub fn failures(&self) -> Vec<(Uuid, Uuid, String)> {
        self.inner.lock().failures.clone()
    }

    pub fn extractions(&self) -> Vec<(Uuid, Uuid, Vec<Uuid>)> {
        self.inner.lock().extractions.clone()
    }
}

#[async_trait::async_trait]
impl Sinks for RecordingSinks {
    async fn extract_memories(&self, thread_id: Uuid, account_id: Uuid, message_ids: Vec<Uuid>) {
        self.inner
            .lock()
            .extractions
            .push((thread_id, account_id, message_ids));
    }

    async fn notify_completion(
        &self,
        account_id: Uuid,
        thread_id: Uuid,
        task_name: String,
        _agent_name: Option<String>,
    ) {
        self.inner
            .lock()
            .completions
            .push((account_id, thread_id, task_name));
    }

    async fn notify_failure(
        &self,
        account_id: Uuid,
        thread_id: Uuid,
        _task_name: String,
        reason: String,
    ) {
        self.inner.lock().failures.push((account_id, thread_id, reason));
    }

    async fn categorize_project(&self, project_id: Uuid) {
        self.inner.lock().categorizations.push(project_id);
    }
}
