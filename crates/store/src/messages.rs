//! Message rows — the durable transcript.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use relay_domain::message::NewMessage;
use relay_domain::Result;

use crate::store::{ReadPreference, Store};

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub message_id: Uuid,
    pub thread_id: Uuid,
    #[sqlx(rename = "type")]
    pub message_type: String,
    pub is_llm_message: bool,
    pub content: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct MessageRepo<'a> {
    store: &'a Store,
}

impl<'a> MessageRepo<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Insert a batch of messages for one thread in a single transaction.
    ///
    /// Order within the batch is preserved; the flusher serializes batches
    /// per run, so per-thread ordering holds end to end.
    pub async fn insert_batch(&self, messages: &[NewMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let pool = self.store.primary().clone();
        let batch: Vec<NewMessage> = messages.to_vec();

        self.store
            .with_retries("messages.insert_batch", move || {
                let pool = pool.clone();
                let batch = batch.clone();
                async move {
                    let mut tx = pool.begin().await?;
                    for message in &batch {
                        sqlx::query(
                            "INSERT INTO messages \
                             (message_id, thread_id, type, is_llm_message, content, metadata, created_at) \
                             VALUES ($1, $2, $3, $4, $5, $6, $7) \
                             ON CONFLICT (message_id) DO NOTHING",
                        )
                        .bind(message.message_id)
                        .bind(message.thread_id)
                        .bind(message.message_type.as_str())
                        .bind(message.is_llm_message)
                        .bind(&message.content)
                        .bind(&message.metadata)
                        .bind(message.created_at)
                        .execute(&mut *tx)
                        .await?;
                    }
                    tx.commit().await?;
                    Ok(())
                }
            })
            .await
    }

    /// The LLM-visible transcript of a thread, oldest first.
    pub async fn llm_messages(
        &self,
        thread_id: Uuid,
        pref: ReadPreference,
    ) -> Result<Vec<MessageRow>> {
        self.list_ordered(thread_id, pref, "created_at", false).await
    }

    /// Transcript rows ordered by a caller-chosen column.
    ///
    /// The column name goes through the identifier whitelist before it is
    /// spliced into the query text.
    pub async fn list_ordered(
        &self,
        thread_id: Uuid,
        pref: ReadPreference,
        order_column: &str,
        descending: bool,
    ) -> Result<Vec<MessageRow>> {
        let order_by = crate::ident::order_by(order_column, descending)?;
        let sql = format!(
            "SELECT message_id, thread_id, type, is_llm_message, content, metadata, created_at \
             FROM messages \
             WHERE thread_id = $1 AND is_llm_message \
               AND COALESCE((metadata->>'omitted')::boolean, false) = false \
             {order_by}"
        );
        let pool = self.store.reader(pref).clone();
        self.store
            .with_retries("messages.list_ordered", move || {
                let pool = pool.clone();
                let sql = sql.clone();
                async move {
                    sqlx::query_as::<_, MessageRow>(&sql)
                        .bind(thread_id)
                        .fetch_all(&pool)
                        .await
                }
            })
            .await
    }

    /// All message ids of a thread, oldest first (memory extraction input).
    pub async fn message_ids(&self, thread_id: Uuid) -> Result<Vec<Uuid>> {
        let pool = self.store.primary().clone();
        self.store
            .with_retries("messages.message_ids", move || {
                let pool = pool.clone();
                async move {
                    let rows: Vec<(Uuid,)> = sqlx::query_as(
                        "SELECT message_id FROM messages \
                         WHERE thread_id = $1 ORDER BY created_at ASC",
                    )
                    .bind(thread_id)
                    .fetch_all(&pool)
                    .await?;
                    Ok(rows.into_iter().map(|(id,)| id).collect())
                }
            })
            .await
    }
}
