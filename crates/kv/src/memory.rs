//! In-process KV backend for tests and local development.
//!
//! Implements the full [`Kv`] contract — TTLs, NX semantics, stream
//! trimming, pub/sub fan-out, and atomic lock release — without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use relay_domain::Result;

use crate::service::{StreamEntry, Subscription};
use crate::traits::Kv;

const CHANNEL_CAPACITY: usize = 1024;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
pub struct MemoryKv {
    keys: Mutex<HashMap<String, Entry>>,
    streams: Mutex<HashMap<String, Vec<StreamEntry>>>,
    stream_seq: AtomicU64,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    lists: Mutex<HashMap<String, std::collections::VecDeque<String>>>,
    list_wakeup: tokio::sync::Notify,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Number of entries currently in a stream (test inspection).
    pub fn stream_len(&self, key: &str) -> usize {
        self.streams.lock().get(key).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut keys = self.keys.lock();
        match keys.get(key) {
            Some(entry) if entry.expired() => {
                keys.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>, nx: bool) -> Result<bool> {
        let mut keys = self.keys.lock();
        let live = keys.get(key).is_some_and(|e| !e.expired());
        if nx && live {
            return Ok(false);
        }
        keys.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.keys.lock().remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut keys = self.keys.lock();
        match keys.get_mut(key) {
            Some(entry) if !entry.expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut keys = self.keys.lock();
        let next = match keys.get(key) {
            Some(entry) if !entry.expired() => entry.value.parse::<i64>().unwrap_or(0) + 1,
            _ => 1,
        };
        let expires_at = keys.get(key).and_then(|e| e.expires_at);
        keys.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn xadd(&self, key: &str, fields: &[(&str, &str)], maxlen: usize) -> Result<String> {
        let id = format!("{}-0", self.stream_seq.fetch_add(1, Ordering::Relaxed) + 1);
        let data = fields
            .iter()
            .find(|(name, _)| *name == "data")
            .map(|(_, value)| value.to_string())
            .unwrap_or_default();

        let mut streams = self.streams.lock();
        let entries = streams.entry(key.to_string()).or_default();
        entries.push(StreamEntry {
            id: id.clone(),
            data,
        });
        if entries.len() > maxlen {
            let excess = entries.len() - maxlen;
            entries.drain(..excess);
        }
        Ok(id)
    }

    async fn xrange(&self, key: &str, since_id: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let streams = self.streams.lock();
        let Some(entries) = streams.get(key) else {
            return Ok(Vec::new());
        };

        let filtered: Vec<StreamEntry> = match since_id {
            "-" => entries.iter().cloned().collect(),
            exclusive if exclusive.starts_with('(') => {
                let floor = seq_of(&exclusive[1..]);
                entries
                    .iter()
                    .filter(|e| seq_of(&e.id) > floor)
                    .cloned()
                    .collect()
            }
            inclusive => {
                let floor = seq_of(inclusive);
                entries
                    .iter()
                    .filter(|e| seq_of(&e.id) >= floor)
                    .cloned()
                    .collect()
            }
        };
        Ok(filtered.into_iter().take(count).collect())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        let len = {
            let mut lists = self.lists.lock();
            let list = lists.entry(key.to_string()).or_default();
            list.push_back(value.to_string());
            list.len() as u64
        };
        self.list_wakeup.notify_waiters();
        Ok(len)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.lists.lock().get_mut(key).and_then(|l| l.pop_front()) {
                return Ok(Some(value));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.list_wakeup.notified()).await;
        }
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let sender = { self.channels.lock().get(channel).cloned() };
        match sender {
            Some(tx) => Ok(tx.send(message.to_string()).unwrap_or(0) as u64),
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let mut feeds = Vec::with_capacity(channels.len());
        for channel in channels {
            let name = channel.clone();
            let rx = self.sender(channel).subscribe();
            let feed = BroadcastStream::new(rx).filter_map(move |result| {
                let name = name.clone();
                async move { result.ok().map(|payload| (name, payload)) }
            });
            feeds.push(Box::pin(feed) as relay_domain::stream::BoxStream<'static, (String, String)>);
        }
        Ok(Subscription::from_stream(Box::pin(
            futures_util::stream::select_all(feeds),
        )))
    }

    async fn acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        self.set(key, holder, Some(ttl), true).await
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<bool> {
        let mut keys = self.keys.lock();
        match keys.get(key) {
            Some(entry) if !entry.expired() && entry.value == holder => {
                keys.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

fn seq_of(id: &str) -> u64 {
    id.split('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_nx_respects_live_keys() {
        let kv = MemoryKv::new();
        assert!(kv.set("k", "a", None, true).await.unwrap());
        assert!(!kv.set("k", "b", None, true).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("a"));

        // Non-NX set overwrites.
        assert!(kv.set("k", "c", None, false).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Some(Duration::from_secs(10)), false)
            .await
            .unwrap();
        assert!(kv.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(kv.get("k").await.unwrap().is_none());
        // Expired key no longer blocks NX.
        assert!(kv.set("k", "w", None, true).await.unwrap());
    }

    #[tokio::test]
    async fn stream_append_trim_and_range() {
        let kv = MemoryKv::new();
        for i in 0..5 {
            let data = format!("e{i}");
            kv.xadd("s", &[("data", data.as_str())], 3).await.unwrap();
        }
        // Trimmed to the newest 3.
        assert_eq!(kv.stream_len("s"), 3);

        let all = kv.xrange("s", "-", 100).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.last().unwrap().data, "e4");

        // Exclusive range after the first remaining entry.
        let after = kv.xrange("s", &format!("({}", all[0].id), 100).await.unwrap();
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn pubsub_round_trip() {
        let kv = MemoryKv::new();
        let mut sub = kv.subscribe(&["c1".to_string(), "c2".to_string()]).await.unwrap();

        // No subscribers on unknown channels.
        assert_eq!(kv.publish("c3", "x").await.unwrap(), 0);

        assert_eq!(kv.publish("c2", "STOP").await.unwrap(), 1);
        let (channel, payload) = sub
            .next_message(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(channel, "c2");
        assert_eq!(payload, "STOP");

        // Timeout with no traffic yields None.
        let quiet = sub.next_message(Duration::from_millis(20)).await.unwrap();
        assert!(quiet.is_none());
    }

    #[tokio::test]
    async fn lock_release_is_holder_checked() {
        let kv = MemoryKv::new();
        assert!(kv
            .acquire_lock("lock", "me", Duration::from_secs(30))
            .await
            .unwrap());
        // A different holder cannot release.
        assert!(!kv.release_lock("lock", "other").await.unwrap());
        assert!(kv.release_lock("lock", "me").await.unwrap());
        // Released lock is acquirable again.
        assert!(kv
            .acquire_lock("lock", "other", Duration::from_secs(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn blpop_waits_for_push() {
        let kv = Arc::new(MemoryKv::new());

        // Empty queue times out.
        assert!(kv
            .blpop("q", Duration::from_millis(30))
            .await
            .unwrap()
            .is_none());

        let consumer = {
            let kv = kv.clone();
            tokio::spawn(async move { kv.blpop("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        kv.rpush("q", "job1").await.unwrap();

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("job1"));
    }

    #[tokio::test]
    async fn rpush_blpop_is_fifo() {
        let kv = MemoryKv::new();
        kv.rpush("q", "a").await.unwrap();
        kv.rpush("q", "b").await.unwrap();
        assert_eq!(
            kv.blpop("q", Duration::from_millis(10)).await.unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(
            kv.blpop("q", Duration::from_millis(10)).await.unwrap().as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn incr_counts_from_one() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("n").await.unwrap(), 1);
        assert_eq!(kv.incr("n").await.unwrap(), 2);
    }
}
