//! End-to-end coordinator scenarios with a scripted provider and
//! in-memory KV/store backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use relay_domain::agent::AgentConfig;
use relay_domain::config::{ModelPricing, RunConfig};
use relay_domain::event::{EventPayload, RunEvent};
use relay_domain::message::{MessageType, NewMessage};
use relay_domain::run::{RunJob, RunStatus};
use relay_domain::stream::{FinishReason, LlmChunk};
use relay_kv::memory::MemoryKv;
use relay_llm::scripted::ScriptedProvider;
use relay_llm::LlmExecutor;
use relay_runtime::coordinator::{Coordinator, CoordinatorDeps, RunContext, RunOutcome};
use relay_runtime::idempotency::StepIdempotency;
use relay_runtime::prompt::DefaultPromptBuilder;
use relay_runtime::{CancelToken, Lifecycle, WriteBuffer};
use relay_store::memory::MemoryStore;
use relay_tools::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    store: MemoryStore,
    job: RunJob,
    cancel: CancelToken,
    deps: CoordinatorDeps,
}

fn registry_with_tools() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    registry.register_fn(
        "calc",
        "Evaluate a trivial expression",
        serde_json::json!({"type": "object", "properties": {"expr": {"type": "string"}}}),
        |args| async move {
            match args.get("expr").and_then(|v| v.as_str()) {
                Some("2+2") => Ok(serde_json::json!(4)),
                other => Ok(serde_json::json!({
                    "success": false,
                    "output": format!("cannot evaluate {other:?}"),
                })),
            }
        },
    );
    registry.register_fn(
        "complete",
        "Signal the task is finished",
        serde_json::json!({"type": "object", "properties": {"summary": {"type": "string"}}}),
        |args| async move {
            Ok(serde_json::json!({
                "success": true,
                "output": args.get("summary").cloned().unwrap_or_default(),
            }))
        },
    );
    registry.register_fn(
        "ask",
        "Ask the user a question",
        serde_json::json!({"type": "object", "properties": {"question": {"type": "string"}}}),
        |args| async move {
            if args.get("question").is_some() {
                Ok(serde_json::json!({"success": true, "output": args}))
            } else {
                Ok(serde_json::json!({"success": false, "output": "question required"}))
            }
        },
    );
    Arc::new(registry)
}

fn harness(provider: ScriptedProvider, account_balance_cents: Option<i64>) -> Harness {
    let store = MemoryStore::new();
    let kv = Arc::new(MemoryKv::new());

    let account_id = account_balance_cents.map(|cents| {
        let account = Uuid::new_v4();
        store.set_balance(account, cents);
        account
    });

    let thread_id = Uuid::new_v4();
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

    let run_id = Uuid::new_v4();
    store.put_run(run_id, RunStatus::Running, account_id);

    let persistence: Arc<MemoryStore> = Arc::new(store.clone());
    let buffer = Arc::new(WriteBuffer::new(persistence.clone()));

    let mut pricing = HashMap::new();
    if account_balance_cents.is_some() {
        pricing.insert(
            "gpt-5-mini".to_string(),
            ModelPricing {
                input_cost_per_1k: 1.0,
                output_cost_per_1k: 4.0,
            },
        );
    }

    let deps = CoordinatorDeps {
        executor: Arc::new(LlmExecutor::new(Arc::new(provider))),
        registry: registry_with_tools(),
        persistence: persistence.clone(),
        buffer,
        prompt_builder: Arc::new(DefaultPromptBuilder::new(persistence, None)),
        idempotency: StepIdempotency::new(kv, Duration::from_secs(600)),
        lifecycle: Lifecycle::new(),
        run_config: RunConfig::default(),
        pricing,
        temperature: 0.0,
        max_tokens: None,
        native_tool_calling: true,
        xml_tool_calling: false,
    };

    Harness {
        store,
        job: RunJob {
            run_id,
            thread_id,
            instance_id: "test-worker".into(),
            project_id: Uuid::new_v4(),
            model_name: "gpt-5-mini".into(),
            agent_id: None,
            account_id,
            request_id: None,
        },
        cancel: CancelToken::new(),
        deps,
    }
}

async fn run_to_completion(harness: Harness) -> (Vec<RunEvent>, RunOutcome, MemoryStore, RunJob) {
    let (tx, mut rx) = mpsc::channel(256);
    let ctx = RunContext {
        job: harness.job.clone(),
        agent: AgentConfig::default_template(),
        cancel: harness.cancel.clone(),
    };
    let coordinator = Coordinator::new(harness.deps);
    let task = tokio::spawn(async move { coordinator.run(ctx, tx).await });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let outcome = task.await.expect("coordinator task panicked");
    (events, outcome, harness.store, harness.job)
}

// ── Event inspection helpers ───────────────────────────────────────

fn kind(event: &RunEvent) -> String {
    match &event.payload {
        EventPayload::LlmResponseStart => "llm_response_start".into(),
        EventPayload::LlmResponseEnd => "llm_response_end".into(),
        EventPayload::ContentDelta { .. } => "content".into(),
        EventPayload::ToolCallChunk { .. } => "tool_call_chunk".into(),
        EventPayload::AssistantComplete { .. } => "assistant_complete".into(),
        EventPayload::ToolStarted { .. } => "tool_started".into(),
        EventPayload::ToolResultMsg { .. } => "tool_result".into(),
        EventPayload::ToolCompleted { .. } => "tool_completed".into(),
        EventPayload::Finish { reason, .. } => format!("finish:{}", reason.as_str()),
        EventPayload::Lifecycle { status, .. } => format!("status:{status}"),
        EventPayload::Error { .. } => "error".into(),
    }
}

fn kinds(events: &[RunEvent]) -> Vec<String> {
    events.iter().map(kind).collect()
}

fn assert_sequence_strictly_increasing(events: &[RunEvent]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as u64, "sequence must increase from 0 without gaps");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — single-turn stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_single_turn_stop() {
    let provider = ScriptedProvider::new(vec![vec![
        LlmChunk::ContentDelta { text: "hel".into() },
        LlmChunk::ContentDelta { text: "lo".into() },
        LlmChunk::Finish {
            reason: FinishReason::Stop,
        },
    ]]);
    let (events, outcome, store, job) = run_to_completion(harness(provider, None)).await;

    assert_sequence_strictly_increasing(&events);
    let ks = kinds(&events);
    assert_eq!(
        ks,
        vec![
            "status:initializing",
            "status:ready",
            "status:thinking",
            "llm_response_start",
            "content",
            "content",
            "assistant_complete",
            "finish:stop",
            "llm_response_end",
            "status:completed",
        ]
    );

    // The finalized assistant message carries the full text.
    let complete = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::AssistantComplete { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(complete, "hello");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.steps, 1);

    // Persisted transcript: one assistant row, no delta rows.
    let rows = store.messages(job.thread_id);
    let assistant_rows: Vec<_> = rows
        .iter()
        .filter(|m| m.message_type == MessageType::Assistant)
        .collect();
    assert_eq!(assistant_rows.len(), 1);
    assert_eq!(assistant_rows[0].content["content"], "hello");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — tool call then stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_tool_call_then_complete() {
    let provider = ScriptedProvider::new(vec![
        vec![
            LlmChunk::ToolCallDelta {
                index: 0,
                id: Some("tc_1".into()),
                name: Some("calc".into()),
                arguments_fragment: Some("{\"expr\":".into()),
            },
            LlmChunk::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments_fragment: Some("\"2+2\"}".into()),
            },
            LlmChunk::Finish {
                reason: FinishReason::ToolCalls,
            },
        ],
        vec![
            LlmChunk::ContentDelta { text: "4".into() },
            LlmChunk::Finish {
                reason: FinishReason::Stop,
            },
        ],
    ]);
    let (events, outcome, store, job) = run_to_completion(harness(provider, None)).await;
    assert_sequence_strictly_increasing(&events);

    // Two llm_response_start/end pairs with distinct thread_run_ids.
    let starts: Vec<&RunEvent> = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::LlmResponseStart))
        .collect();
    let ends: Vec<&RunEvent> = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::LlmResponseEnd))
        .collect();
    assert_eq!(starts.len(), 2);
    assert_eq!(ends.len(), 2);
    assert_ne!(starts[0].thread_run_id, starts[1].thread_run_id);

    // One started/result/completed triple, ids consistent.
    let tool_result = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ToolResultMsg { result, .. } => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert!(tool_result.success);
    assert_eq!(tool_result.tool_call_id, "tc_1");
    assert_eq!(tool_result.output, serde_json::json!(4));

    // The tool result links the assistant message that carried the call.
    let assistant_id = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::AssistantComplete {
                message_id,
                tool_calls,
                ..
            } if !tool_calls.is_empty() => Some(*message_id),
            _ => None,
        })
        .unwrap();
    let linked = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ToolResultMsg {
                assistant_message_id,
                ..
            } => Some(*assistant_message_id),
            _ => None,
        })
        .unwrap();
    assert_eq!(linked, Some(assistant_id));

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.steps, 2);
    assert_eq!(kind(events.last().unwrap()), "status:completed");

    // Round-trip: persisted rows reconstruct a legal transcript (the
    // seeded user turn, the tool-calling assistant, its tool result, the
    // final assistant).
    let rows = store.messages(job.thread_id);
    let llm_rows: Vec<_> = rows.iter().filter(|m| m.is_llm_message).collect();
    let types: Vec<&str> = llm_rows.iter().map(|m| m.message_type.as_str()).collect();
    assert_eq!(types, vec!["user", "assistant", "tool", "assistant"]);
    let prior_assistant = llm_rows[1];
    let tool_row = llm_rows[2];
    assert_eq!(
        tool_row.content["tool_call_id"],
        prior_assistant.content["tool_calls"][0]["id"]
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — terminator tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_terminator_tool_ends_run() {
    let provider = ScriptedProvider::new(vec![
        vec![
            LlmChunk::ToolCallDelta {
                index: 0,
                id: Some("tc_done".into()),
                name: Some("complete".into()),
                arguments_fragment: Some("{\"summary\":\"done\"}".into()),
            },
            LlmChunk::Finish {
                reason: FinishReason::ToolCalls,
            },
        ],
        // A second script that must never run.
        vec![LlmChunk::Finish {
            reason: FinishReason::Stop,
        }],
    ]);
    let (events, outcome, _store, _job) = run_to_completion(harness(provider, None)).await;
    assert_sequence_strictly_increasing(&events);

    let ks = kinds(&events);
    // Tail ordering: tool_completed(terminating) -> finish(agent_terminated)
    // -> llm_response_end, then the run-final status.
    assert_eq!(
        &ks[ks.len() - 4..],
        &[
            "tool_completed",
            "finish:agent_terminated",
            "llm_response_end",
            "status:completed",
        ]
    );

    let terminating = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ToolCompleted {
                terminating: true,
                function_name,
                success,
                ..
            } => Some((function_name.clone(), *success)),
            _ => None,
        })
        .unwrap();
    assert_eq!(terminating, ("complete".to_string(), true));

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.complete_tool_called);
    // Budget remained but no further step executed.
    assert_eq!(outcome.steps, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — external stop while streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s4_external_stop() {
    let long_script: Vec<LlmChunk> = (0..200)
        .map(|i| LlmChunk::ContentDelta {
            text: format!("chunk{i} "),
        })
        .chain(std::iter::once(LlmChunk::Finish {
            reason: FinishReason::Stop,
        }))
        .collect();
    let provider =
        ScriptedProvider::new(vec![long_script]).with_chunk_delay(Duration::from_millis(5));

    let h = harness(provider, None);
    let cancel = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
    });

    let (events, outcome, _store, _job) = run_to_completion(h).await;
    assert_sequence_strictly_increasing(&events);
    assert_eq!(outcome.status, RunStatus::Stopped);

    let ks = kinds(&events);
    let stopped_at = ks.iter().position(|k| k == "status:stopped").unwrap();
    // No assistant event after the stopped status.
    assert!(ks[stopped_at..]
        .iter()
        .all(|k| k != "content" && k != "assistant_complete"));
    assert_eq!(stopped_at, ks.len() - 1, "stopped is the terminal event");

    let stopped_message = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::Lifecycle { status, message, .. } if status == "stopped" => {
                Some(message.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(stopped_message, "Cancelled");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — insufficient credits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_insufficient_credits() {
    let provider = ScriptedProvider::new(vec![vec![LlmChunk::Finish {
        reason: FinishReason::Stop,
    }]]);
    // Account exists with zero balance; pricing is configured.
    let (events, outcome, _store, _job) = run_to_completion(harness(provider, Some(0))).await;

    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Error { message, code } => Some((message.clone(), *code)),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Insufficient credits");
    assert_eq!(
        errors[0].1,
        Some(relay_domain::error::ErrorCode::InsufficientCredits)
    );

    assert_eq!(kind(events.last().unwrap()), "status:failed");
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("Insufficient credits"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S7 — auto-continue cap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s7_auto_continue_cap() {
    // A provider that always finishes with `length`.
    let scripts: Vec<Vec<LlmChunk>> = (0..40)
        .map(|i| {
            vec![
                LlmChunk::ContentDelta {
                    text: format!("part{i}"),
                },
                LlmChunk::Finish {
                    reason: FinishReason::Length,
                },
            ]
        })
        .collect();
    let provider = ScriptedProvider::new(scripts);
    let (events, outcome, _store, _job) = run_to_completion(harness(provider, None)).await;
    assert_sequence_strictly_increasing(&events);

    // Exactly max_auto_continues steps ran.
    assert_eq!(outcome.steps, 25);
    assert_eq!(outcome.status, RunStatus::Stopped);
    assert_eq!(outcome.error.as_deref(), Some("max_auto_continues"));

    let ks = kinds(&events);
    assert_eq!(ks.last().unwrap(), "status:stopped");
    assert_eq!(ks.iter().filter(|k| *k == "llm_response_start").count(), 25);

    // Every turn used a distinct thread_run_id.
    let mut turn_ids: Vec<Uuid> = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::LlmResponseStart))
        .map(|e| e.thread_run_id)
        .collect();
    turn_ids.sort();
    turn_ids.dedup();
    assert_eq!(turn_ids.len(), 25);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// A FAILED terminator does not end the run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn failed_terminator_tool_does_not_end_run() {
    // `ask` is a reserved terminator, but it fails (missing question);
    // only a SUCCESSFUL terminator invocation ends the run.
    let provider = ScriptedProvider::new(vec![
        vec![
            LlmChunk::ToolCallDelta {
                index: 0,
                id: Some("tc_x".into()),
                name: Some("ask".into()),
                arguments_fragment: Some("{}".into()),
            },
            LlmChunk::Finish {
                reason: FinishReason::ToolCalls,
            },
        ],
        vec![
            LlmChunk::ContentDelta {
                text: "sorry".into(),
            },
            LlmChunk::Finish {
                reason: FinishReason::Stop,
            },
        ],
    ]);
    let (events, outcome, _store, _job) = run_to_completion(harness(provider, None)).await;

    let failed_completion = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ToolCompleted {
                success,
                terminating,
                ..
            } => Some((*success, *terminating)),
            _ => None,
        })
        .unwrap();
    assert_eq!(failed_completion, (false, false));
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.steps, 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider error fails the run after one retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn provider_error_retries_once_then_fails() {
    let provider = ScriptedProvider::new(vec![
        vec![LlmChunk::ProviderError {
            message: "upstream 500".into(),
            error_code: Some("provider_internal".into()),
        }],
        vec![LlmChunk::ProviderError {
            message: "upstream 500".into(),
            error_code: Some("provider_internal".into()),
        }],
    ]);
    let (events, outcome, _store, _job) = run_to_completion(harness(provider, None)).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("upstream 500"));
    assert_eq!(kind(events.last().unwrap()), "status:failed");
    // Both attempts surfaced an in-band error event.
    assert_eq!(kinds(&events).iter().filter(|k| *k == "error").count(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider error recovers on retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn provider_error_recovers_on_retry() {
    let provider = ScriptedProvider::new(vec![
        vec![LlmChunk::ProviderError {
            message: "transient".into(),
            error_code: None,
        }],
        vec![
            LlmChunk::ContentDelta { text: "ok".into() },
            LlmChunk::Finish {
                reason: FinishReason::Stop,
            },
        ],
    ]);
    let (events, outcome, _store, _job) = run_to_completion(harness(provider, None)).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    let complete = events.iter().find_map(|e| match &e.payload {
        EventPayload::AssistantComplete { content, .. } => Some(content.clone()),
        _ => None,
    });
    assert_eq!(complete.as_deref(), Some("ok"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shutdown short-circuit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn shutdown_short_circuits_new_runs() {
    let provider = ScriptedProvider::new(vec![]);
    let h = harness(provider, None);
    h.deps.lifecycle.begin_shutdown();

    let (events, outcome, _store, _job) = run_to_completion(h).await;
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        EventPayload::Error { message, code } => {
            assert_eq!(message, "Server shutting down");
            assert_eq!(*code, Some(relay_domain::error::ErrorCode::Shutdown));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streamed tool-call deltas carry only the new suffix
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tool_call_chunks_emit_only_new_suffixes() {
    let provider = ScriptedProvider::new(vec![
        vec![
            LlmChunk::ToolCallDelta {
                index: 0,
                id: Some("tc_1".into()),
                name: Some("calc".into()),
                arguments_fragment: Some("{\"ex".into()),
            },
            LlmChunk::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments_fragment: Some("pr\":\"2+2\"}".into()),
            },
            LlmChunk::Finish {
                reason: FinishReason::ToolCalls,
            },
        ],
        vec![
            LlmChunk::ContentDelta { text: "4".into() },
            LlmChunk::Finish {
                reason: FinishReason::Stop,
            },
        ],
    ]);
    let (events, _outcome, _store, _job) = run_to_completion(harness(provider, None)).await;

    let deltas: Vec<String> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolCallChunk { deltas } => {
                Some(deltas.iter().map(|d| d.arguments_delta.clone()).collect::<Vec<_>>())
            }
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(deltas, vec!["{\"ex", "pr\":\"2+2\"}"]);
    assert_eq!(deltas.concat(), "{\"expr\":\"2+2\"}");
}
