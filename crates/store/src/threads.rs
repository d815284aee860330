//! Thread and project reads consumed by the run core.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use relay_domain::Result;

use crate::store::{ReadPreference, Store};

#[derive(Debug, Clone, FromRow)]
pub struct ThreadRow {
    pub thread_id: Uuid,
    pub project_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub name: Option<String>,
    pub status: String,
    pub is_public: bool,
    pub has_images: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub project_id: Uuid,
    pub account_id: Option<Uuid>,
    pub name: Option<String>,
    pub sandbox: Option<serde_json::Value>,
}

pub struct ThreadRepo<'a> {
    store: &'a Store,
}

impl<'a> ThreadRepo<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub async fn get(&self, thread_id: Uuid) -> Result<Option<ThreadRow>> {
        let pool = self.store.primary().clone();
        self.store
            .with_retries("threads.get", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query_as::<_, ThreadRow>(
                        "SELECT thread_id, project_id, account_id, name, status, \
                                is_public, has_images, created_at \
                         FROM threads WHERE thread_id = $1",
                    )
                    .bind(thread_id)
                    .fetch_optional(&pool)
                    .await
                }
            })
            .await
    }

    pub async fn project(&self, project_id: Uuid, pref: ReadPreference) -> Result<Option<ProjectRow>> {
        let pool = self.store.reader(pref).clone();
        self.store
            .with_retries("threads.project", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query_as::<_, ProjectRow>(
                        "SELECT project_id, account_id, name, sandbox \
                         FROM projects WHERE project_id = $1",
                    )
                    .bind(project_id)
                    .fetch_optional(&pool)
                    .await
                }
            })
            .await
    }

    /// Thread count for an account (backs the 5 min thread-count cache).
    pub async fn count_for_account(&self, account_id: Uuid, pref: ReadPreference) -> Result<i64> {
        let pool = self.store.reader(pref).clone();
        self.store
            .with_retries("threads.count_for_account", move || {
                let pool = pool.clone();
                async move {
                    let (count,): (i64,) =
                        sqlx::query_as("SELECT COUNT(*) FROM threads WHERE account_id = $1")
                            .bind(account_id)
                            .fetch_one(&pool)
                            .await?;
                    Ok(count)
                }
            })
            .await
    }

    /// Queue a post-run memory extraction job row.
    pub async fn enqueue_memory_extraction(
        &self,
        thread_id: Uuid,
        account_id: Uuid,
        message_ids: &[Uuid],
    ) -> Result<()> {
        let pool = self.store.primary().clone();
        let message_ids = message_ids.to_vec();
        self.store
            .with_retries("threads.enqueue_memory_extraction", move || {
                let pool = pool.clone();
                let message_ids = message_ids.clone();
                async move {
                    sqlx::query(
                        "INSERT INTO memory_extraction_queue \
                         (id, thread_id, account_id, message_ids, status, created_at) \
                         VALUES ($1, $2, $3, $4, 'pending', NOW())",
                    )
                    .bind(Uuid::new_v4())
                    .bind(thread_id)
                    .bind(account_id)
                    .bind(&message_ids)
                    .execute(&pool)
                    .await?;
                    Ok(())
                }
            })
            .await
    }
}
