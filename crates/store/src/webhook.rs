//! Webhook event dedup gate.
//!
//! Every webhook handler must call [`WebhookGate::check_and_mark`] before
//! any side-effect and finalize with `mark_completed` / `mark_failed`.
//! The decision is a sum type so races are explicit at call sites.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

use relay_domain::Result;

use crate::store::Store;

/// A `processing` row older than this is considered stuck and retried.
pub const STUCK_THRESHOLD_MINS: i64 = 5;

/// Outcome of the dedup check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDecision {
    /// First delivery (or a failed/stuck prior attempt was reclaimed);
    /// the caller owns processing now.
    Proceed,
    /// Already fully processed; no-op.
    AlreadyCompleted,
    /// Another worker is actively processing.
    InProgress,
    /// A race was detected mid-claim; signal broker-level retry.
    RetryLater,
}

/// Whether a processing attempt has been running long enough to reclaim.
pub fn is_stuck(processing_started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - processing_started_at > ChronoDuration::minutes(STUCK_THRESHOLD_MINS)
}

#[derive(Debug, FromRow)]
struct WebhookEventRow {
    id: Uuid,
    status: String,
    processing_started_at: Option<DateTime<Utc>>,
    retry_count: i32,
}

pub struct WebhookGate<'a> {
    store: &'a Store,
}

impl<'a> WebhookGate<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub async fn check_and_mark(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookDecision> {
        let existing = self.fetch(event_id).await?;

        let Some(row) = existing else {
            return self.claim_new(event_id, event_type, payload).await;
        };

        match row.status.as_str() {
            "completed" => Ok(WebhookDecision::AlreadyCompleted),
            "processing" => {
                let Some(started_at) = row.processing_started_at else {
                    return Ok(WebhookDecision::InProgress);
                };
                if !is_stuck(started_at, Utc::now()) {
                    return Ok(WebhookDecision::InProgress);
                }
                warn!(event_id, since = %started_at, "stuck webhook, reclaiming");
                self.reclaim(row.id, row.retry_count, Some(started_at)).await
            }
            // A failed prior attempt may be retried by whoever claims it.
            _ => self.reclaim(row.id, row.retry_count, None).await,
        }
    }

    /// Finalize successfully. Returns whether this call performed the
    /// `processing -> completed` transition (at most one caller wins).
    pub async fn mark_completed(&self, event_id: &str) -> Result<bool> {
        let pool = self.store.primary().clone();
        let event_id = event_id.to_owned();
        self.store
            .with_retries("webhook.mark_completed", move || {
                let pool = pool.clone();
                let event_id = event_id.clone();
                async move {
                    let done = sqlx::query(
                        "UPDATE webhook_events \
                         SET status = 'completed', processed_at = NOW(), error_message = NULL \
                         WHERE event_id = $1 AND status = 'processing'",
                    )
                    .bind(&event_id)
                    .execute(&pool)
                    .await?;
                    Ok(done.rows_affected() > 0)
                }
            })
            .await
    }

    pub async fn mark_failed(&self, event_id: &str, error: &str) -> Result<()> {
        let pool = self.store.primary().clone();
        let event_id = event_id.to_owned();
        let error = error.to_owned();
        self.store
            .with_retries("webhook.mark_failed", move || {
                let pool = pool.clone();
                let event_id = event_id.clone();
                let error = error.clone();
                async move {
                    sqlx::query(
                        "UPDATE webhook_events \
                         SET status = 'failed', error_message = $2 \
                         WHERE event_id = $1",
                    )
                    .bind(&event_id)
                    .bind(&error)
                    .execute(&pool)
                    .await?;
                    Ok(())
                }
            })
            .await
    }

    // ── Private ──────────────────────────────────────────────────────

    async fn fetch(&self, event_id: &str) -> Result<Option<WebhookEventRow>> {
        let pool = self.store.primary().clone();
        let event_id = event_id.to_owned();
        self.store
            .with_retries("webhook.fetch", move || {
                let pool = pool.clone();
                let event_id = event_id.clone();
                async move {
                    sqlx::query_as::<_, WebhookEventRow>(
                        "SELECT id, status, processing_started_at, retry_count \
                         FROM webhook_events WHERE event_id = $1",
                    )
                    .bind(&event_id)
                    .fetch_optional(&pool)
                    .await
                }
            })
            .await
    }

    async fn claim_new(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookDecision> {
        let pool = self.store.primary().clone();
        let event_id = event_id.to_owned();
        let event_type = event_type.to_owned();
        let payload = payload.clone();

        let inserted = self
            .store
            .with_retries("webhook.claim_new", move || {
                let pool = pool.clone();
                let event_id = event_id.clone();
                let event_type = event_type.clone();
                let payload = payload.clone();
                async move {
                    let done = sqlx::query(
                        "INSERT INTO webhook_events \
                         (id, event_id, event_type, payload, status, processing_started_at, retry_count) \
                         VALUES ($1, $2, $3, $4, 'processing', NOW(), 0) \
                         ON CONFLICT (event_id) DO NOTHING",
                    )
                    .bind(Uuid::new_v4())
                    .bind(&event_id)
                    .bind(&event_type)
                    .bind(&payload)
                    .execute(&pool)
                    .await?;
                    Ok(done.rows_affected() > 0)
                }
            })
            .await?;

        if inserted {
            Ok(WebhookDecision::Proceed)
        } else {
            // Another worker inserted between our fetch and insert.
            Ok(WebhookDecision::RetryLater)
        }
    }

    /// Compare-and-swap a failed or stuck row back to `processing`.
    async fn reclaim(
        &self,
        row_id: Uuid,
        retry_count: i32,
        stuck_since: Option<DateTime<Utc>>,
    ) -> Result<WebhookDecision> {
        let pool = self.store.primary().clone();
        let claimed = self
            .store
            .with_retries("webhook.reclaim", move || {
                let pool = pool.clone();
                async move {
                    // The predicate pins the exact state we observed, so a
                    // concurrent claimer makes this a no-op.
                    let done = match stuck_since {
                        Some(since) => {
                            sqlx::query(
                                "UPDATE webhook_events \
                                 SET status = 'processing', processing_started_at = NOW(), \
                                     retry_count = retry_count + 1 \
                                 WHERE id = $1 AND status = 'processing' \
                                   AND processing_started_at = $2",
                            )
                            .bind(row_id)
                            .bind(since)
                            .execute(&pool)
                            .await?
                        }
                        None => {
                            sqlx::query(
                                "UPDATE webhook_events \
                                 SET status = 'processing', processing_started_at = NOW(), \
                                     retry_count = retry_count + 1, error_message = NULL \
                                 WHERE id = $1 AND status = 'failed' AND retry_count = $2",
                            )
                            .bind(row_id)
                            .bind(retry_count)
                            .execute(&pool)
                            .await?
                        }
                    };
                    Ok(done.rows_affected() > 0)
                }
            })
            .await?;

        if claimed {
            Ok(WebhookDecision::Proceed)
        } else if stuck_since.is_some() {
            Ok(WebhookDecision::InProgress)
        } else {
            Ok(WebhookDecision::RetryLater)
        }
    }
}
