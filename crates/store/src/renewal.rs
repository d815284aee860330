//! Renewal dedup gate — at most one credit grant per `(account, period)`.
//!
//! Every grant path (webhook, scheduler) must pass this gate; the unique
//! key on `(account_id, period_start)` is the source of truth no matter
//! how many signals arrive.

use uuid::Uuid;

use relay_domain::Result;

use crate::store::Store;

pub struct RenewalGate<'a> {
    store: &'a Store,
}

impl<'a> RenewalGate<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Record the period as processed. Returns `false` when the period was
    /// already claimed — the caller must not grant.
    pub async fn check_and_mark(
        &self,
        account_id: Uuid,
        period_start: i64,
        period_end: i64,
        subscription_id: &str,
        credits_granted_cents: i64,
        processed_by: &str,
    ) -> Result<bool> {
        let pool = self.store.primary().clone();
        let subscription_id = subscription_id.to_owned();
        let processed_by = processed_by.to_owned();

        self.store
            .with_retries("renewal.check_and_mark", move || {
                let pool = pool.clone();
                let subscription_id = subscription_id.clone();
                let processed_by = processed_by.clone();
                async move {
                    let done = sqlx::query(
                        "INSERT INTO renewal_processing \
                         (id, account_id, period_start, period_end, subscription_id, \
                          processed_by, credits_granted_cents, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
                         ON CONFLICT (account_id, period_start) DO NOTHING",
                    )
                    .bind(Uuid::new_v4())
                    .bind(account_id)
                    .bind(period_start)
                    .bind(period_end)
                    .bind(&subscription_id)
                    .bind(&processed_by)
                    .bind(credits_granted_cents)
                    .execute(&pool)
                    .await?;
                    Ok(done.rows_affected() > 0)
                }
            })
            .await
    }

    /// Who processed a period, if anyone (diagnostics).
    pub async fn processed_by(&self, account_id: Uuid, period_start: i64) -> Result<Option<String>> {
        let pool = self.store.primary().clone();
        self.store
            .with_retries("renewal.processed_by", move || {
                let pool = pool.clone();
                async move {
                    let row: Option<(String,)> = sqlx::query_as(
                        "SELECT processed_by FROM renewal_processing \
                         WHERE account_id = $1 AND period_start = $2",
                    )
                    .bind(account_id)
                    .bind(period_start)
                    .fetch_optional(&pool)
                    .await?;
                    Ok(row.map(|(by,)| by))
                }
            })
            .await
    }
}
