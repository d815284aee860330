//! Run control helpers used by sibling workers and operator tooling.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use relay_cache::CacheLayer;
use relay_domain::run::{self, ControlSignal, RunStatus};
use relay_domain::Result;
use relay_kv::Kv;
use relay_store::RunPersistence;

/// Stop a run wherever it is hosted: mark the row stopped and publish
/// `STOP` on the global control channel; the owning worker's supervisor
/// does the rest.
pub async fn stop_run(
    kv: &Arc<dyn Kv>,
    persistence: &Arc<dyn RunPersistence>,
    run_id: Uuid,
) -> Result<bool> {
    let known = persistence
        .update_run_status(run_id, RunStatus::Stopped, Some("Stopped by user"))
        .await?;
    kv.publish(
        &run::global_control_channel(run_id),
        ControlSignal::Stop.as_str(),
    )
    .await?;
    info!(%run_id, known, "stop requested");
    Ok(known)
}

/// Running-run count for an account, through the 5 s cache.
pub async fn running_count(
    cache: &CacheLayer,
    persistence: &Arc<dyn RunPersistence>,
    account_id: Uuid,
) -> Result<i64> {
    if let Some(count) = cache.running_runs(account_id).await {
        return Ok(count);
    }
    let count = persistence.running_count(account_id).await?;
    cache.set_running_runs(account_id, count).await;
    Ok(count)
}

/// Catch-up read of a run's event stream for late-joining subscribers.
///
/// `since_id` of `-` reads from the beginning; pass the last seen id
/// prefixed with `(` for an exclusive resume.
pub async fn stream_tail(
    kv: &Arc<dyn Kv>,
    run_id: Uuid,
    since_id: &str,
    count: usize,
) -> Result<Vec<(String, serde_json::Value)>> {
    let entries = kv.xrange(&run::stream_key(run_id), since_id, count).await?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            serde_json::from_str(&entry.data)
                .ok()
                .map(|event| (entry.id, event))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_kv::memory::MemoryKv;
    use relay_store::memory::MemoryStore;

    #[tokio::test]
    async fn stop_publishes_and_updates() {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        store.put_run(run_id, RunStatus::Running, None);
        let persistence: Arc<dyn RunPersistence> = Arc::new(store.clone());

        let mut sub = kv
            .subscribe(&[run::global_control_channel(run_id)])
            .await
            .unwrap();

        assert!(stop_run(&kv, &persistence, run_id).await.unwrap());
        assert_eq!(store.run(run_id).unwrap().0, RunStatus::Stopped);

        let (_, payload) = sub
            .next_message(std::time::Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, "STOP");
    }

    #[tokio::test]
    async fn running_count_uses_cache() {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let cache = CacheLayer::new(kv);
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        store.put_run(Uuid::new_v4(), RunStatus::Running, Some(account));
        let persistence: Arc<dyn RunPersistence> = Arc::new(store.clone());

        assert_eq!(running_count(&cache, &persistence, account).await.unwrap(), 1);

        // A new running run is invisible while the cache is warm.
        store.put_run(Uuid::new_v4(), RunStatus::Running, Some(account));
        assert_eq!(running_count(&cache, &persistence, account).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stream_tail_parses_events() {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let run_id = Uuid::new_v4();
        kv.xadd(
            &run::stream_key(run_id),
            &[("data", "{\"type\":\"status\",\"status\":\"completed\"}")],
            100,
        )
        .await
        .unwrap();
        kv.xadd(&run::stream_key(run_id), &[("data", "not json")], 100)
            .await
            .unwrap();

        let events = stream_tail(&kv, run_id, "-", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1["status"], "completed");
    }
}
