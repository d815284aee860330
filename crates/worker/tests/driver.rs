//! Driver integration: claim semantics, stream fan-out, terminal
//! signalling and cleanup against in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use relay_domain::config::Config;
use relay_domain::message::{MessageType, NewMessage};
use relay_domain::run::{self, RunJob, RunStatus};
use relay_domain::stream::{FinishReason, LlmChunk};
use relay_kv::memory::MemoryKv;
use relay_kv::Kv;
use relay_llm::scripted::ScriptedProvider;
use relay_store::memory::MemoryStore;
use relay_store::traits::ThreadInfo;
use relay_tools::ToolRegistry;
use relay_worker::driver::{run_agent, DriverOutcome};
use relay_worker::Worker;

struct Fixture {
    worker: Arc<Worker>,
    kv: Arc<MemoryKv>,
    store: MemoryStore,
    job: RunJob,
}

fn fixture(provider: ScriptedProvider, instance_id: &str) -> Fixture {
    let kv = Arc::new(MemoryKv::new());
    let store = MemoryStore::new();

    let mut config = Config::default();
    config.worker.instance_id = Some(instance_id.to_string());
    let config = Arc::new(config);

    let registry = Arc::new(ToolRegistry::new());
    registry.register_fn(
        "complete",
        "Signal the task is finished",
        serde_json::json!({"type": "object"}),
        |args| async move { Ok(serde_json::json!({"success": true, "output": args})) },
    );

    let account_id = Uuid::new_v4();
    let thread_id = Uuid::new_v4();
    let run_id = Uuid::new_v4();
    let project_id = Uuid::new_v4();

    store.put_run(run_id, RunStatus::Running, Some(account_id));
    store.put_thread(ThreadInfo {
        thread_id,
        project_id: Some(project_id),
        account_id: Some(account_id),
        name: Some("Demo task".into()),
    });
    store.seed_messages(
        thread_id,
        vec![NewMessage::new(
            thread_id,
            MessageType::User,
            true,
            serde_json::json!({"role": "user", "content": "hi"}),
            serde_json::json!({}),
        )],
    );

    let worker = Worker::build_with_backends(
        config,
        kv.clone(),
        Arc::new(store.clone()),
        Arc::new(provider),
        registry,
    );

    Fixture {
        worker,
        kv,
        store,
        job: RunJob {
            run_id,
            thread_id,
            instance_id: instance_id.to_string(),
            project_id,
            model_name: "gpt-5-mini".into(),
            agent_id: None,
            account_id: Some(account_id),
            request_id: Some("req-1".into()),
        },
    }
}

fn stop_script() -> Vec<Vec<LlmChunk>> {
    vec![vec![
        LlmChunk::ContentDelta { text: "hello".into() },
        LlmChunk::Finish {
            reason: FinishReason::Stop,
        },
    ]]
}

#[tokio::test]
async fn happy_path_streams_and_finalizes() {
    let f = fixture(ScriptedProvider::new(stop_script()), "w1");

    // Subscribe to the terminal control channel before driving.
    let mut control = f
        .kv
        .subscribe(&[run::global_control_channel(f.job.run_id)])
        .await
        .unwrap();

    let outcome = run_agent(&f.worker, f.job.clone()).await;
    assert_eq!(outcome, DriverOutcome::Finished(RunStatus::Completed));

    // Terminal DB status.
    assert_eq!(f.store.run(f.job.run_id).unwrap().0, RunStatus::Completed);

    // Exactly one terminal control signal: END_STREAM.
    let (_, signal) = control
        .next_message(Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal, "END_STREAM");
    assert!(control
        .next_message(Duration::from_millis(50))
        .await
        .unwrap()
        .is_none());

    // The stream carries the run's events in order, ending with the
    // final status.
    let entries = f
        .kv
        .xrange(&run::stream_key(f.job.run_id), "-", 1000)
        .await
        .unwrap();
    assert!(!entries.is_empty());
    let mut events: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| serde_json::from_str(&e.data).unwrap())
        .collect();
    // Consumers order by `sequence`; every event carries a distinct one.
    events.sort_by_key(|e| e["sequence"].as_u64().unwrap());
    let sequences: Vec<u64> = events
        .iter()
        .map(|e| e["sequence"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, (0..events.len() as u64).collect::<Vec<_>>());
    let last = events.last().unwrap();
    assert_eq!(last["type"], "status");
    assert_eq!(last["status"], "completed");

    // Ownership was released.
    assert!(f
        .kv
        .get(&run::lock_key(f.job.run_id))
        .await
        .unwrap()
        .is_none());

    // The assistant row was persisted.
    let rows = f.store.messages(f.job.thread_id);
    assert!(rows
        .iter()
        .any(|m| m.message_type == MessageType::Assistant));
}

#[tokio::test]
async fn s6_duplicate_claim_is_skipped() {
    let f = fixture(ScriptedProvider::new(stop_script()), "w1");

    // A live sibling already holds the lock with a heartbeat.
    f.kv
        .set(&run::lock_key(f.job.run_id), "w2", None, false)
        .await
        .unwrap();
    f.kv
        .set(
            &run::instance_active_key("w2", f.job.run_id),
            "running",
            None,
            false,
        )
        .await
        .unwrap();

    let outcome = run_agent(&f.worker, f.job.clone()).await;
    assert_eq!(outcome, DriverOutcome::Skipped);

    // No events on the stream, no status transition.
    assert_eq!(f.kv.stream_len(&run::stream_key(f.job.run_id)), 0);
    assert_eq!(f.store.run(f.job.run_id).unwrap().0, RunStatus::Running);
    // The sibling's lock is untouched.
    assert_eq!(
        f.kv.get(&run::lock_key(f.job.run_id)).await.unwrap().as_deref(),
        Some("w2")
    );
}

#[tokio::test]
async fn stop_signal_over_pubsub_stops_run() {
    let long_script: Vec<LlmChunk> = (0..300)
        .map(|i| LlmChunk::ContentDelta {
            text: format!("c{i}"),
        })
        .chain(std::iter::once(LlmChunk::Finish {
            reason: FinishReason::Stop,
        }))
        .collect();
    let provider =
        ScriptedProvider::new(vec![long_script]).with_chunk_delay(Duration::from_millis(5));
    let f = fixture(provider, "w1");

    let kv = f.kv.clone();
    let channel = run::global_control_channel(f.job.run_id);
    tokio::spawn(async move {
        // Let the run get going, then stop it externally.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = kv.publish(&channel, "STOP").await;
    });

    let outcome = run_agent(&f.worker, f.job.clone()).await;
    assert_eq!(outcome, DriverOutcome::Finished(RunStatus::Stopped));

    let (status, error) = f.store.run(f.job.run_id).unwrap();
    assert_eq!(status, RunStatus::Stopped);
    assert_eq!(error.as_deref(), Some("Stopped by global_control_channel"));
}

#[tokio::test]
async fn terminator_fires_completion_sink() {
    let provider = ScriptedProvider::new(vec![vec![
        LlmChunk::ToolCallDelta {
            index: 0,
            id: Some("tc_1".into()),
            name: Some("complete".into()),
            arguments_fragment: Some("{\"summary\":\"done\"}".into()),
        },
        LlmChunk::Finish {
            reason: FinishReason::ToolCalls,
        },
    ]]);
    let f = fixture(provider, "w1");

    let outcome = run_agent(&f.worker, f.job.clone()).await;
    assert_eq!(outcome, DriverOutcome::Finished(RunStatus::Completed));

    // BrokerSinks queued the extraction row and side jobs.
    assert_eq!(f.store.extraction_jobs().len(), 1);
    let mut kinds = Vec::new();
    while let Some(payload) = f
        .kv
        .blpop(relay_worker::sinks::SIDE_JOB_QUEUE, Duration::from_millis(20))
        .await
        .unwrap()
    {
        let job: serde_json::Value = serde_json::from_str(&payload).unwrap();
        kinds.push(job["kind"].as_str().unwrap().to_string());
    }
    assert!(kinds.contains(&"extract_memories".to_string()));
    assert!(kinds.contains(&"notify_completion".to_string()));
    assert!(kinds.contains(&"categorize_project".to_string()));
}

#[tokio::test]
async fn failure_fires_failure_sink_and_error_signal() {
    // Pricing configured + zero balance → INSUFFICIENT_CREDITS.
    let provider = ScriptedProvider::new(stop_script());
    let f = {
        let mut f = fixture(provider, "w1");
        let mut config = (*f.worker.config).clone();
        config.llm.pricing.insert(
            "gpt-5-mini".into(),
            relay_domain::config::ModelPricing {
                input_cost_per_1k: 1.0,
                output_cost_per_1k: 1.0,
            },
        );
        // Rebuild the worker with pricing in place.
        let registry = Arc::new(ToolRegistry::new());
        f.worker = Worker::build_with_backends(
            Arc::new(config),
            f.kv.clone(),
            Arc::new(f.store.clone()),
            Arc::new(ScriptedProvider::new(stop_script())),
            registry,
        );
        f
    };
    f.store.set_balance(f.job.account_id.unwrap(), 0);

    let mut control = f
        .kv
        .subscribe(&[run::global_control_channel(f.job.run_id)])
        .await
        .unwrap();

    let outcome = run_agent(&f.worker, f.job.clone()).await;
    assert_eq!(outcome, DriverOutcome::Finished(RunStatus::Failed));

    let (status, error) = f.store.run(f.job.run_id).unwrap();
    assert_eq!(status, RunStatus::Failed);
    assert_eq!(error.as_deref(), Some("Insufficient credits"));

    let (_, signal) = control
        .next_message(Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal, "ERROR");

    // Failure notification queued.
    let payload = f
        .kv
        .blpop(relay_worker::sinks::SIDE_JOB_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert!(payload.contains("notify_failure"));
}

#[tokio::test]
async fn rerun_after_completion_is_idempotent_per_run() {
    // Re-delivering the job after the first execution finished: the lock
    // is gone and the DB status is terminal, so a second worker may run —
    // but per-step idempotency keys make the replay a no-op loop that
    // completes immediately with no duplicate stream events.
    let f = fixture(
        ScriptedProvider::new({
            let mut scripts = stop_script();
            scripts.push(vec![LlmChunk::Finish {
                reason: FinishReason::Stop,
            }]);
            scripts
        }),
        "w1",
    );

    let first = run_agent(&f.worker, f.job.clone()).await;
    assert_eq!(first, DriverOutcome::Finished(RunStatus::Completed));
    let events_after_first = f.kv.stream_len(&run::stream_key(f.job.run_id));

    let second = run_agent(&f.worker, f.job.clone()).await;
    assert_eq!(second, DriverOutcome::Finished(RunStatus::Completed));

    // The replay skipped the already-marked step 1: its assistant content
    // was not produced again.
    let entries = f
        .kv
        .xrange(&run::stream_key(f.job.run_id), "-", 1000)
        .await
        .unwrap();
    let hello_events = entries
        .iter()
        .filter(|e| e.data.contains("hello"))
        .count();
    // Step 1 emitted "hello" as a delta and in the completed message, in
    // the first invocation only.
    assert_eq!(hello_events, 2);
    assert!(entries.len() > events_after_first, "second invocation appended frames");
}
