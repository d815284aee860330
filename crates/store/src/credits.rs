//! Credit accounts and ledger — reservation is the only billing surface
//! the run core touches directly.

use sqlx::FromRow;
use uuid::Uuid;

use relay_domain::Result;

use crate::store::{ReadPreference, Store};

/// Balances are integral cents; estimates round up before reserving.
pub fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).ceil().max(0.0) as i64
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditAccountRow {
    pub account_id: Uuid,
    pub tier: String,
    pub balance_cents: i64,
}

pub struct CreditRepo<'a> {
    store: &'a Store,
}

impl<'a> CreditRepo<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub async fn account(&self, account_id: Uuid, pref: ReadPreference) -> Result<Option<CreditAccountRow>> {
        let pool = self.store.reader(pref).clone();
        self.store
            .with_retries("credits.account", move || {
                let pool = pool.clone();
                async move {
                    sqlx::query_as::<_, CreditAccountRow>(
                        "SELECT account_id, tier, balance_cents \
                         FROM credit_accounts WHERE account_id = $1",
                    )
                    .bind(account_id)
                    .fetch_optional(&pool)
                    .await
                }
            })
            .await
    }

    /// Atomically reserve `amount_cents` from the account.
    ///
    /// Returns the reservation id, or `None` when the balance is short
    /// (the caller surfaces `INSUFFICIENT_CREDITS`).
    pub async fn reserve(&self, account_id: Uuid, amount_cents: i64) -> Result<Option<Uuid>> {
        let reservation_id = Uuid::new_v4();
        let pool = self.store.primary().clone();

        self.store
            .with_retries("credits.reserve", move || {
                let pool = pool.clone();
                async move {
                    let mut tx = pool.begin().await?;
                    let updated: Option<(i64,)> = sqlx::query_as(
                        "UPDATE credit_accounts \
                         SET balance_cents = balance_cents - $2 \
                         WHERE account_id = $1 AND balance_cents >= $2 \
                         RETURNING balance_cents",
                    )
                    .bind(account_id)
                    .bind(amount_cents)
                    .fetch_optional(&mut *tx)
                    .await?;

                    let Some((balance_after,)) = updated else {
                        tx.rollback().await?;
                        return Ok(None);
                    };

                    sqlx::query(
                        "INSERT INTO credit_ledger \
                         (id, account_id, amount_cents, balance_after_cents, entry_type, description, created_at) \
                         VALUES ($1, $2, $3, $4, 'reserve', $5, NOW())",
                    )
                    .bind(reservation_id)
                    .bind(account_id)
                    .bind(-amount_cents)
                    .bind(balance_after)
                    .bind(format!("run step reservation ({amount_cents}c)"))
                    .execute(&mut *tx)
                    .await?;

                    tx.commit().await?;
                    Ok(Some(reservation_id))
                }
            })
            .await
    }

    /// Grant credits (renewal path). Callers must hold the renewal gate.
    pub async fn grant(
        &self,
        account_id: Uuid,
        amount_cents: i64,
        description: &str,
    ) -> Result<i64> {
        let pool = self.store.primary().clone();
        let description = description.to_owned();
        self.store
            .with_retries("credits.grant", move || {
                let pool = pool.clone();
                let description = description.clone();
                async move {
                    let mut tx = pool.begin().await?;
                    let (balance_after,): (i64,) = sqlx::query_as(
                        "UPDATE credit_accounts \
                         SET balance_cents = balance_cents + $2 \
                         WHERE account_id = $1 \
                         RETURNING balance_cents",
                    )
                    .bind(account_id)
                    .bind(amount_cents)
                    .fetch_one(&mut *tx)
                    .await?;

                    sqlx::query(
                        "INSERT INTO credit_ledger \
                         (id, account_id, amount_cents, balance_after_cents, entry_type, description, created_at) \
                         VALUES ($1, $2, $3, $4, 'grant', $5, NOW())",
                    )
                    .bind(Uuid::new_v4())
                    .bind(account_id)
                    .bind(amount_cents)
                    .bind(balance_after)
                    .bind(&description)
                    .execute(&mut *tx)
                    .await?;

                    tx.commit().await?;
                    Ok(balance_after)
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollars_round_up_to_cents() {
        assert_eq!(dollars_to_cents(0.0), 0);
        assert_eq!(dollars_to_cents(0.001), 1);
        assert_eq!(dollars_to_cents(1.25), 125);
        assert_eq!(dollars_to_cents(-0.5), 0);
    }
}
