//! Connection pools, read routing, and the transient-error retry layer.

use std::time::Duration;

use rand::Rng;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::warn;

use relay_domain::config::StoreConfig;
use relay_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a read executes. The default is strong (primary); replica reads
/// are opt-in per call site so read-after-write stays correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    #[default]
    Primary,
    Replica,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Store {
    primary: PgPool,
    replica: Option<PgPool>,
    max_retries: u32,
}

impl Store {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = |url: &str| {
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
                .connect_lazy(url)
        };

        let primary = options(&config.primary_url)
            .map_err(|e| Error::Store(format!("primary pool: {e}")))?;
        let replica = match &config.replica_url {
            Some(url) => Some(options(url).map_err(|e| Error::Store(format!("replica pool: {e}")))?),
            None => None,
        };

        Ok(Self {
            primary,
            replica,
            max_retries: config.max_retries,
        })
    }

    /// The pool for writes and strong reads.
    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// The pool a read with the given preference should use. Falls back to
    /// the primary when no replica is configured.
    pub fn reader(&self, pref: ReadPreference) -> &PgPool {
        match (pref, &self.replica) {
            (ReadPreference::Replica, Some(replica)) => replica,
            _ => &self.primary,
        }
    }

    /// Run `f` with up to `max_retries` retries on transient failures.
    ///
    /// `f` must build a fresh future per attempt (clone the pool in).
    pub async fn with_retries<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt < self.max_retries => {
                    let delay = retry_delay(attempt);
                    warn!(op, attempt, error = %err, "transient db failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(store_error(op, err)),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Postgres SQLSTATEs worth retrying: statement timeout, admin/crash
/// shutdown, too many connections, connection failures.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "57014", "57P01", "57P02", "57P03", "53300", "08000", "08001", "08003", "08006",
];

pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref()))
            .unwrap_or(false),
        _ => false,
    }
}

pub fn store_error(op: &'static str, err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::RowNotFound => Error::Store(format!("{op}: row not found")),
        _ if is_transient(&err) => Error::Store(format!("{op}: {err}")),
        _ => Error::Other(format!("db {op}: {err}")),
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let base = 50u64 * 2u64.pow(attempt);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_transient() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(is_transient(&sqlx::Error::PoolClosed));
        assert!(is_transient(&sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))));
    }

    #[test]
    fn logical_errors_are_not_transient() {
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::ColumnNotFound("x".into())));
    }

    #[test]
    fn reader_falls_back_to_primary_without_replica() {
        // Lazy pools never connect until used, so this is safe offline.
        let config = relay_domain::config::StoreConfig::default();
        let store = futures_sync(Store::connect(&config)).unwrap();
        assert!(std::ptr::eq(
            store.reader(ReadPreference::Replica),
            store.primary()
        ));
        assert!(std::ptr::eq(
            store.reader(ReadPreference::Primary),
            store.primary()
        ));
    }

    fn futures_sync<T>(fut: impl std::future::Future<Output = T>) -> T {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn retry_delay_grows() {
        let d0 = retry_delay(0);
        let d2 = retry_delay(2);
        assert!(d0 >= Duration::from_millis(50));
        assert!(d2 >= Duration::from_millis(200));
    }
}
