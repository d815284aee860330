//! The Redis-backed key-value/stream service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures_util::StreamExt;
use redis::ErrorKind;
use tracing::warn;

use relay_domain::config::KvConfig;
use relay_domain::stream::BoxStream;
use relay_domain::{Error, Result};

use crate::retry::Backoff;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pooled Redis access with per-op deadlines and transparent retry.
pub struct KvService {
    pool: Pool,
    /// Dedicated client for pub/sub connections (pooled connections are
    /// multiplexed and cannot enter subscriber mode).
    client: redis::Client,
    op_timeout: Duration,
    max_retries: u32,
    backoff: Backoff,
    healthy: AtomicBool,
}

/// One entry read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub data: String,
}

impl KvService {
    pub fn connect(config: &KvConfig) -> Result<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| Error::Kv(format!("pool config: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::Kv(format!("pool build: {e}")))?;
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::Kv(format!("client: {e}")))?;

        Ok(Self {
            pool,
            client,
            op_timeout: Duration::from_millis(config.op_timeout_ms),
            max_retries: config.max_retries,
            backoff: Backoff::default(),
            healthy: AtomicBool::new(true),
        })
    }

    /// Whether the last operation round-tripped successfully. Consulted by
    /// the driver before queueing streaming writes.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    // ── Keys ─────────────────────────────────────────────────────────

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("get", &cmd).await
    }

    /// SET with optional TTL and NX. Returns whether the key was written.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        nx: bool,
    ) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if nx {
            cmd.arg("NX");
        }
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let reply: Option<String> = self.query("set", &cmd).await?;
        Ok(reply.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: u64 = self.query("del", &cmd).await?;
        Ok(removed > 0)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(ttl.as_secs().max(1));
        let set: i64 = self.query("expire", &cmd).await?;
        Ok(set == 1)
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.query("incr", &cmd).await
    }

    // ── Streams ──────────────────────────────────────────────────────

    /// Append one entry with approximate `MAXLEN ~` trimming. Returns the
    /// entry id.
    pub async fn xadd(&self, key: &str, fields: &[(&str, &str)], maxlen: usize) -> Result<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("MAXLEN").arg("~").arg(maxlen).arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(*value);
        }
        self.query("xadd", &cmd).await
    }

    /// Read entries after `since_id` (exclusive when prefixed with `(`,
    /// or `-` for the whole stream). Only the `data` field is surfaced.
    pub async fn xrange(&self, key: &str, since_id: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XRANGE");
        cmd.arg(key).arg(since_id).arg("+").arg("COUNT").arg(count);
        let raw: Vec<(String, std::collections::HashMap<String, String>)> =
            self.query("xrange", &cmd).await?;
        Ok(raw
            .into_iter()
            .map(|(id, mut fields)| StreamEntry {
                id,
                data: fields.remove("data").unwrap_or_default(),
            })
            .collect())
    }

    // ── Lists (job queue) ────────────────────────────────────────────

    pub async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(key).arg(value);
        self.query("rpush", &cmd).await
    }

    /// Blocking pop; the client-side deadline covers the block window.
    pub async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let block_secs = timeout.as_secs().max(1);
        let run = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| Error::Kv(format!("pool: {e}")))?;
            let reply: Option<(String, String)> = redis::cmd("BLPOP")
                .arg(key)
                .arg(block_secs)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("blpop", e))?;
            Ok::<_, Error>(reply.map(|(_, value)| value))
        };
        tokio::time::timeout(timeout + self.op_timeout, run)
            .await
            .map_err(|_| Error::Timeout("redis blpop".into()))?
    }

    // ── Pub/sub ──────────────────────────────────────────────────────

    /// Publish a message; returns the subscriber count.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(message);
        self.query("publish", &cmd).await
    }

    /// Open a dedicated subscriber connection on the given channels.
    pub async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let connect = async {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| Error::Kv(format!("pubsub connect: {e}")))?;
            for channel in channels {
                pubsub
                    .subscribe(channel)
                    .await
                    .map_err(|e| Error::Kv(format!("subscribe {channel}: {e}")))?;
            }
            Ok::<_, Error>(pubsub)
        };
        let pubsub = tokio::time::timeout(self.op_timeout, connect)
            .await
            .map_err(|_| Error::Timeout("pubsub subscribe".into()))??;

        let messages = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            msg.get_payload::<String>()
                .ok()
                .map(|payload| (channel, payload))
        });
        Ok(Subscription {
            stream: Box::pin(messages),
        })
    }

    // ── Atomic lock scripts ──────────────────────────────────────────

    /// Compare-and-set: write `holder` iff the key is absent.
    pub async fn acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        self.set(key, holder, Some(ttl), true).await
    }

    /// Compare-and-delete: remove the key only while `holder` still owns it.
    pub async fn release_lock(&self, key: &str, holder: &str) -> Result<bool> {
        let script = redis::Script::new(RELEASE_LOCK_LUA);
        let run = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| Error::Kv(format!("pool: {e}")))?;
            let released: i64 = script
                .key(key)
                .arg(holder)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| Error::Kv(format!("release_lock: {e}")))?;
            Ok::<_, Error>(released == 1)
        };
        tokio::time::timeout(self.op_timeout, run)
            .await
            .map_err(|_| Error::Timeout("release_lock".into()))?
    }

    // ── Execution ────────────────────────────────────────────────────

    async fn query<T: redis::FromRedisValue>(&self, op: &'static str, cmd: &redis::Cmd) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::time::timeout(self.op_timeout, async {
                let mut conn = self
                    .pool
                    .get()
                    .await
                    .map_err(|e| Error::Kv(format!("pool: {e}")))?;
                cmd.query_async::<T>(&mut conn)
                    .await
                    .map_err(|e| redis_error(op, e))
            })
            .await;

            let err = match outcome {
                Ok(Ok(value)) => {
                    self.healthy.store(true, Ordering::Release);
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout(format!("redis {op}")),
            };

            if err.is_transient() && attempt < self.max_retries {
                let delay = self.backoff.delay(attempt);
                warn!(op, attempt, error = %err, "transient redis failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if err.is_transient() {
                self.healthy.store(false, Ordering::Release);
            }
            return Err(err);
        }
    }
}

/// Atomic compare-and-delete used by `release_lock`.
const RELEASE_LOCK_LUA: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

fn redis_error(op: &'static str, err: redis::RedisError) -> Error {
    match err.kind() {
        ErrorKind::IoError | ErrorKind::ClusterDown | ErrorKind::MasterDown | ErrorKind::TryAgain => {
            Error::Kv(format!("{op}: {err}"))
        }
        _ if err.is_timeout() || err.is_connection_dropped() => Error::Kv(format!("{op}: {err}")),
        _ => Error::Other(format!("redis {op}: {err}")),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A live pub/sub subscription. Dropping it closes the connection.
pub struct Subscription {
    stream: BoxStream<'static, (String, String)>,
}

impl Subscription {
    pub fn from_stream(stream: BoxStream<'static, (String, String)>) -> Self {
        Self { stream }
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(Some((channel, payload)))` on message, `Ok(None)` when the
    /// timeout elapses without one, `Err` when the subscription closed.
    pub async fn next_message(&mut self, timeout: Duration) -> Result<Option<(String, String)>> {
        match tokio::time::timeout(timeout, self.stream.next()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(Error::Kv("subscription closed".into())),
            Err(_) => Ok(None),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl crate::traits::Kv for KvService {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        KvService::get(self, key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>, nx: bool) -> Result<bool> {
        KvService::set(self, key, value, ttl, nx).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        KvService::delete(self, key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        KvService::expire(self, key, ttl).await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        KvService::incr(self, key).await
    }

    async fn xadd(&self, key: &str, fields: &[(&str, &str)], maxlen: usize) -> Result<String> {
        KvService::xadd(self, key, fields, maxlen).await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        KvService::rpush(self, key, value).await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        KvService::blpop(self, key, timeout).await
    }

    async fn xrange(&self, key: &str, since_id: &str, count: usize) -> Result<Vec<StreamEntry>> {
        KvService::xrange(self, key, since_id, count).await
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        KvService::publish(self, channel, message).await
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        KvService::subscribe(self, channels).await
    }

    async fn acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        KvService::acquire_lock(self, key, holder, ttl).await
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<bool> {
        KvService::release_lock(self, key, holder).await
    }

    fn is_healthy(&self) -> bool {
        KvService::is_healthy(self)
    }
}
