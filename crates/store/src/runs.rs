//! `agent_runs` rows — one per execution of a thread.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

use relay_domain::run::RunStatus;
use relay_domain::Result;

use crate::store::{ReadPreference, Store};

#[derive(Debug, Clone, FromRow)]
pub struct AgentRunRow {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub account_id: Option<Uuid>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub agent_id: Option<Uuid>,
    pub agent_version_id: Option<Uuid>,
}

impl AgentRunRow {
    pub fn status(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }
}

pub struct RunRepo<'a> {
    store: &'a Store,
}

impl<'a> RunRepo<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Option<AgentRunRow>> {
        let pool = self.store.primary().clone();
        self.store
            .with_retries("runs.get", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query_as::<_, AgentRunRow>(
                        "SELECT id, thread_id, account_id, status, started_at, completed_at, \
                                error, agent_id, agent_version_id \
                         FROM agent_runs WHERE id = $1",
                    )
                    .bind(run_id)
                    .fetch_optional(&pool)
                    .await
                }
            })
            .await
    }

    /// Current status only; used by the stale-lock takeover check, always
    /// against the primary.
    pub async fn status(&self, run_id: Uuid) -> Result<Option<RunStatus>> {
        Ok(self.get(run_id).await?.and_then(|row| row.status()))
    }

    /// Transition a run to a terminal status and record the error.
    ///
    /// Retries up to three times on its own (beyond the transport retry
    /// layer): losing the terminal status would strand the run as
    /// `running` forever.
    pub async fn update_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        for attempt in 0..3u32 {
            let pool = self.store.primary().clone();
            let error = error.map(str::to_owned);
            let result = self
                .store
                .with_retries("runs.update_status", move || {
                    let pool = pool.clone();
                    let error = error.clone();
                    async move {
                        sqlx::query(
                            "UPDATE agent_runs \
                             SET status = $2, completed_at = $3, error = COALESCE($4, error) \
                             WHERE id = $1",
                        )
                        .bind(run_id)
                        .bind(status.as_str())
                        .bind(status.is_terminal().then(Utc::now))
                        .bind(error)
                        .execute(&pool)
                        .await
                    }
                })
                .await;

            match result {
                Ok(done) if done.rows_affected() > 0 => return Ok(true),
                Ok(_) => {
                    warn!(%run_id, attempt, "agent_runs update matched no row");
                }
                Err(e) => {
                    warn!(%run_id, attempt, error = %e, "agent_runs update failed");
                }
            }
        }
        Ok(false)
    }

    /// Count of currently-running runs for an account (backs the 5 s
    /// running-runs cache).
    pub async fn running_count(&self, account_id: Uuid) -> Result<i64> {
        let pool = self.store.primary().clone();
        self.store
            .with_retries("runs.running_count", move || {
                let pool = pool.clone();
                async move {
                    let (count,): (i64,) = sqlx::query_as(
                        "SELECT COUNT(*) FROM agent_runs \
                         WHERE account_id = $1 AND status = 'running'",
                    )
                    .bind(account_id)
                    .fetch_one(&pool)
                    .await?;
                    Ok(count)
                }
            })
            .await
    }

    /// Running runs for an account, newest first.
    pub async fn list_running(
        &self,
        account_id: Uuid,
        pref: ReadPreference,
    ) -> Result<Vec<AgentRunRow>> {
        let pool = self.store.reader(pref).clone();
        self.store
            .with_retries("runs.list_running", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query_as::<_, AgentRunRow>(
                        "SELECT id, thread_id, account_id, status, started_at, completed_at, \
                                error, agent_id, agent_version_id \
                         FROM agent_runs \
                         WHERE account_id = $1 AND status = 'running' \
                         ORDER BY started_at DESC",
                    )
                    .bind(account_id)
                    .fetch_all(&pool)
                    .await
                }
            })
            .await
    }

}
