//! End-to-end tests for WorkflowEngine over the in-memory ledger
//!
//! Run with: cargo test -p actflow-durable --test engine_test

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use actflow_durable::prelude::*;
use actflow_durable::{ActivityOutcome, ExecutionRecord};

// ============================================
// Helpers
// ============================================

/// Activity that counts invocations and answers from `result(n)`
fn counting<F>(name: &str, calls: Arc<AtomicU32>, result: F) -> Arc<dyn ActivityExecutor>
where
    F: Fn(u32, serde_json::Value) -> Result<serde_json::Value, ActivityError>
        + Send
        + Sync
        + 'static,
{
    let result = Arc::new(result);
    Arc::new(FnActivityExecutor::new(name, move |_ctx, input| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let result = result.clone();
        async move { result(n, input) }
    }))
}

fn engine_with(ledger: Arc<InMemoryExecutionLedger>, pipeline: Pipeline) -> WorkflowEngine {
    WorkflowEngine::new(ledger, pipeline, EngineConfig::default())
}

fn id(value: &str) -> RequestIdentifier {
    RequestIdentifier::from(value)
}

/// Seed a PROCESSING execution holding `records`
async fn seed_records(
    ledger: &InMemoryExecutionLedger,
    identifier: &str,
    records: Vec<ExecutionRecord>,
) {
    let identifier = id(identifier);
    ledger
        .create_execution(&identifier, Uuid::now_v7(), &RequestEnvelope::new(identifier.clone()))
        .await
        .unwrap();
    ledger
        .update_status(&identifier, ExecutionStatus::Processing, None)
        .await
        .unwrap();
    for record in records {
        ledger.append(&identifier, record).await.unwrap();
    }
}

/// Seed a PROCESSING execution whose first step already succeeded
async fn seed_first_step(ledger: &InMemoryExecutionLedger, identifier: &str, value: serde_json::Value) {
    seed_records(
        ledger,
        identifier,
        vec![ExecutionRecord::new(0, 1, ActivityOutcome::success(value))],
    )
    .await;
}

/// Activity that records the attempt number it was invoked with
fn attempt_recorder(
    name: &str,
    attempts: Arc<Mutex<Vec<u32>>>,
    result: Result<serde_json::Value, ActivityError>,
) -> Arc<dyn ActivityExecutor> {
    Arc::new(FnActivityExecutor::new(name, move |ctx, _input| {
        attempts.lock().push(ctx.attempt);
        let result = result.clone();
        async move { result }
    }))
}

// ============================================
// Admission and status
// ============================================

#[tokio::test]
async fn test_status_before_submit_is_not_found() {
    let engine = engine_with(Arc::new(InMemoryExecutionLedger::new()), Pipeline::new());

    for identifier in ["req-1", "req-2", "unknown"] {
        let err = engine.status(&id(identifier)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[tokio::test]
async fn test_single_step_success_has_no_error_field() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new().then(
        "ok",
        counting("ok", calls.clone(), |_, _| Ok(json!({ "ok": true }))),
    );
    let engine = engine_with(Arc::new(InMemoryExecutionLedger::new()), pipeline);

    let result = engine
        .submit_and_wait(RequestEnvelope::new("req-ok"))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(serde_json::to_value(&result).unwrap(), json!({ "status": "SUCCESS" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_submitted_request_completes() {
    // submit {identifier: "req-1", payload: {...}} through the local processing step
    let engine = engine_with(
        Arc::new(InMemoryExecutionLedger::new()),
        Pipeline::new().then(PROCESS_REQUEST, Arc::new(ProcessRequestActivity::new())),
    );

    let envelope: RequestEnvelope = serde_json::from_value(json!({
        "identifier": "req-1",
        "payload": { "interfaces": ["ge-0/0/0"] }
    }))
    .unwrap();

    let submitted = engine.submit(envelope).await.unwrap();
    assert_eq!(submitted, id("req-1"));

    engine
        .registry()
        .find(&submitted)
        .unwrap()
        .wait_settled()
        .await;

    let report = engine.status(&submitted).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Completed);
    let result = report.result.unwrap();
    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(serde_json::to_value(&result).unwrap()["status"], "SUCCESS");
}

#[tokio::test]
async fn test_missing_identifier_is_rejected_before_execution() {
    // {identifier: "req-2"} arriving without its identifier field
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    let engine = engine_with(
        ledger.clone(),
        Pipeline::new().then(PROCESS_REQUEST, Arc::new(ProcessRequestActivity::new())),
    );

    let envelope: RequestEnvelope =
        serde_json::from_value(json!({ "payload": { "name": "req-2" } })).unwrap();

    let err = engine.submit(envelope.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let err = engine.submit_and_wait(envelope).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    assert_eq!(ledger.execution_count(), 0);
    assert!(engine.registry().is_empty());

    let err = engine.status(&id("req-2")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_resubmission_returns_existing_execution() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new().then(
        "once",
        counting("once", calls.clone(), |n, _| Ok(json!(n))),
    );
    let engine = engine_with(Arc::new(InMemoryExecutionLedger::new()), pipeline);

    let first = engine
        .submit_and_wait(RequestEnvelope::new("req-dup"))
        .await
        .unwrap();
    let second = engine
        .submit_and_wait(RequestEnvelope::new("req-dup").with_feedback("ignored"))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_payload_error_fails_permanently() {
    let engine = engine_with(
        Arc::new(InMemoryExecutionLedger::new()),
        Pipeline::new().then(PROCESS_REQUEST, Arc::new(ProcessRequestActivity::new())),
    );

    let result = engine
        .submit_and_wait(RequestEnvelope::new("req-bad").with_payload_error("unexpected token"))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert!(result
        .error_message()
        .unwrap()
        .contains("payload error: unexpected token"));
    assert_eq!(
        engine.status(&id("req-bad")).await.unwrap().status,
        ExecutionStatus::Failed
    );
}

// ============================================
// Replay
// ============================================

#[tokio::test]
async fn test_recorded_success_is_not_reinvoked() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    seed_first_step(&ledger, "req-replay", json!({ "from": "ledger" })).await;

    let first_calls = Arc::new(AtomicU32::new(0));
    let second_calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(None));
    let seen_by_step = seen.clone();

    let pipeline = Pipeline::new()
        .then(
            "first",
            counting("first", first_calls.clone(), |_, _| Ok(json!("fresh"))),
        )
        .then(
            "second",
            counting("second", second_calls.clone(), move |_, input| {
                *seen_by_step.lock() = Some(input.clone());
                Ok(json!("done"))
            }),
        );
    let engine = engine_with(ledger, pipeline);

    let result = engine
        .submit_and_wait(RequestEnvelope::new("req-replay"))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), Some(json!({ "from": "ledger" })));
}

#[tokio::test]
async fn test_second_engine_replays_finished_execution() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = || {
        Pipeline::new().then(
            "work",
            counting("work", calls.clone(), |_, _| Ok(json!("done"))),
        )
    };

    let first = engine_with(ledger.clone(), pipeline());
    first
        .submit_and_wait(RequestEnvelope::new("req-restart"))
        .await
        .unwrap();

    // Fresh process, same ledger
    let second = engine_with(ledger, pipeline());
    let result = second
        .submit_and_wait(RequestEnvelope::new("req-restart"))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recorded_transient_failure_resumes_at_next_attempt() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    seed_records(
        &ledger,
        "req-flaky",
        vec![ExecutionRecord::new(
            0,
            1,
            ActivityOutcome::failure(ActivityError::transient("connection reset")),
        )],
    )
    .await;

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new().then(
        "flaky",
        attempt_recorder(
            "flaky",
            attempts.clone(),
            Err(ActivityError::transient("connection reset")),
        ),
    );
    let engine = WorkflowEngine::new(
        ledger.clone(),
        pipeline,
        EngineConfig::default().with_retry(RetryPolicy::exponential().with_max_attempts(4)),
    );

    assert_eq!(engine.recover().await.unwrap(), 1);
    let snapshot = engine
        .registry()
        .find(&id("req-flaky"))
        .unwrap()
        .wait_settled()
        .await;

    // Attempt 1 came from the ledger; only 2..=4 run here
    assert_eq!(*attempts.lock(), vec![2, 3, 4]);
    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(
        snapshot.result.unwrap().error_message(),
        Some("step 'flaky' failed after 4 attempt(s): connection reset")
    );

    let keys: Vec<_> = ledger
        .read(&id("req-flaky"))
        .await
        .unwrap()
        .iter()
        .map(ExecutionRecord::order_key)
        .collect();
    assert_eq!(keys, vec![(0, 1), (0, 2), (0, 3), (0, 4)]);
}

#[tokio::test(start_paused = true)]
async fn test_recorded_transient_failure_then_success() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    seed_records(
        &ledger,
        "req-retry-ok",
        vec![ExecutionRecord::new(
            0,
            1,
            ActivityOutcome::failure(ActivityError::transient("connection reset")),
        )],
    )
    .await;

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new().then(
        "flaky",
        attempt_recorder("flaky", attempts.clone(), Ok(json!("recovered"))),
    );
    let engine = engine_with(ledger, pipeline);

    let result = engine
        .submit_and_wait(RequestEnvelope::new("req-retry-ok"))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(*attempts.lock(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_recorded_permanent_failure_is_not_reinvoked() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    seed_records(
        &ledger,
        "req-rejected",
        vec![ExecutionRecord::new(
            0,
            1,
            ActivityOutcome::failure(ActivityError::permanent("device not provisioned")),
        )],
    )
    .await;

    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new().then(
        "provision",
        counting("provision", calls.clone(), |_, _| Ok(json!("too late"))),
    );
    let engine = engine_with(ledger.clone(), pipeline);

    assert_eq!(engine.recover().await.unwrap(), 1);
    let snapshot = engine
        .registry()
        .find(&id("req-rejected"))
        .unwrap()
        .wait_settled()
        .await;

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert_eq!(
        snapshot.result.unwrap().error_message(),
        Some("step 'provision' failed after 1 attempt(s): device not provisioned")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(ledger.read(&id("req-rejected")).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recorded_exhausted_retries_are_not_reinvoked() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    let failure = || ActivityOutcome::failure(ActivityError::transient("connection refused"));
    seed_records(
        &ledger,
        "req-exhausted",
        (1..=3)
            .map(|attempt| ExecutionRecord::new(0, attempt, failure()))
            .collect(),
    )
    .await;

    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new().then(
        "unreachable",
        counting("unreachable", calls.clone(), |_, _| Ok(json!(null))),
    );
    let engine = WorkflowEngine::new(
        ledger,
        pipeline,
        EngineConfig::default().with_retry(RetryPolicy::exponential().with_max_attempts(3)),
    );

    let result = engine
        .submit_and_wait(RequestEnvelope::new("req-exhausted"))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================
// Retries
// ============================================

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let invoked_at = Arc::new(Mutex::new(Vec::new()));
    let stamps = invoked_at.clone();

    let pipeline = Pipeline::new().then(
        "unreachable",
        counting("unreachable", calls.clone(), move |_, _| {
            stamps.lock().push(Instant::now());
            Err(ActivityError::transient("connection refused"))
        }),
    );

    let policy = RetryPolicy::exponential()
        .with_max_attempts(5)
        .with_initial_interval(Duration::from_secs(1))
        .with_max_interval(Duration::from_secs(4));
    let engine = WorkflowEngine::new(
        Arc::new(InMemoryExecutionLedger::new()),
        pipeline,
        EngineConfig::default().with_retry(policy.clone()),
    );

    let result = engine
        .submit_and_wait(RequestEnvelope::new("req-retry"))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(
        result.error_message(),
        Some("step 'unreachable' failed after 5 attempt(s): connection refused")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let stamps = invoked_at.lock();
    let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 4);
    assert!(gaps.windows(2).all(|w| w[0] <= w[1]), "gaps {:?}", gaps);
    assert!(gaps[0] >= policy.initial_interval);
    assert!(gaps.iter().all(|gap| *gap < policy.max_interval + Duration::from_millis(10)));

    assert_eq!(
        engine.status(&id("req-retry")).await.unwrap().status,
        ExecutionStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_short_circuits_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new().then(
        "reject",
        counting("reject", calls.clone(), |_, _| {
            Err(ActivityError::permanent("device not provisioned"))
        }),
    );
    let engine = WorkflowEngine::new(
        Arc::new(InMemoryExecutionLedger::new()),
        pipeline,
        EngineConfig::default().with_retry(RetryPolicy::exponential().with_max_attempts(10)),
    );

    let result = engine
        .submit_and_wait(RequestEnvelope::new("req-perm"))
        .await
        .unwrap();

    assert_eq!(result.status, ResultStatus::Error);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let pipeline = Pipeline::new().then(
        "slow",
        Arc::new(FnActivityExecutor::new("slow", move |_ctx, _input| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(json!(n))
            }
        })),
    );
    let engine = WorkflowEngine::new(
        Arc::new(InMemoryExecutionLedger::new()),
        pipeline,
        EngineConfig::default().with_activity_timeout(Duration::from_secs(5)),
    );

    let result = engine
        .submit_and_wait(RequestEnvelope::new("req-slow"))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let records = engine.ledger().read(&id("req-slow")).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].outcome.error().map(|e| e.kind),
        Some(FailureKind::Timeout)
    );
}

// ============================================
// Cancellation
// ============================================

#[tokio::test]
async fn test_cancel_mid_pipeline() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let second_calls = Arc::new(AtomicU32::new(0));

    let (on_start, gate) = (started.clone(), release.clone());
    let first: Arc<dyn ActivityExecutor> =
        Arc::new(FnActivityExecutor::new("first", move |_ctx, input| {
            let (on_start, gate) = (on_start.clone(), gate.clone());
            async move {
                on_start.notify_one();
                gate.notified().await;
                Ok(input)
            }
        }));

    let pipeline = Pipeline::new().then("first", first).then(
        "second",
        counting("second", second_calls.clone(), |_, _| Ok(json!("late"))),
    );
    let engine = engine_with(Arc::new(InMemoryExecutionLedger::new()), pipeline);

    let identifier = engine.submit(RequestEnvelope::new("req-cancel")).await.unwrap();
    started.notified().await;

    assert_eq!(
        engine.status(&identifier).await.unwrap().status,
        ExecutionStatus::Processing
    );
    assert!(engine.cancel(&identifier).await.unwrap());
    release.notify_one();

    let snapshot = engine
        .registry()
        .find(&identifier)
        .unwrap()
        .wait_settled()
        .await;
    assert_eq!(snapshot.status, ExecutionStatus::Cancelled);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let report = engine.status(&identifier).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert_eq!(
        report.result,
        Some(ResultEnvelope::error("request req-cancel was cancelled"))
    );

    // Already terminal
    assert!(!engine.cancel(&identifier).await.unwrap());
}

#[tokio::test]
async fn test_cancel_unknown_is_not_found() {
    let engine = engine_with(Arc::new(InMemoryExecutionLedger::new()), Pipeline::new());

    let err = engine.cancel(&id("ghost")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_cancel_after_eviction_reads_ledger() {
    let engine = engine_with(Arc::new(InMemoryExecutionLedger::new()), Pipeline::new());
    engine
        .submit_and_wait(RequestEnvelope::new("req-old"))
        .await
        .unwrap();
    assert!(engine.evict(&id("req-old")));

    assert!(!engine.cancel(&id("req-old")).await.unwrap());
    assert_eq!(
        engine.status(&id("req-old")).await.unwrap().status,
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn test_resubmitted_finished_execution_reports_ledger_state() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new().then(
        "work",
        counting("work", calls.clone(), |_, _| Ok(json!("done"))),
    );
    let engine = engine_with(Arc::new(InMemoryExecutionLedger::new()), pipeline);

    engine
        .submit_and_wait(RequestEnvelope::new("req-done"))
        .await
        .unwrap();
    assert!(engine.evict(&id("req-done")));

    // Registered again, but its instance has not loaded the ledger yet
    engine.submit(RequestEnvelope::new("req-done")).await.unwrap();
    let machine = engine.registry().find(&id("req-done")).unwrap();
    assert_eq!(machine.snapshot().run_id, None);

    let report = engine.status(&id("req-done")).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.result, Some(ResultEnvelope::success()));
    assert!(report.run_id.is_some());

    assert!(!engine.cancel(&id("req-done")).await.unwrap());
    assert!(!machine.is_cancel_requested());

    let snapshot = machine.wait_settled().await;
    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================
// Faults and recovery
// ============================================

#[tokio::test]
async fn test_ledger_failure_is_internal_and_recoverable() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new().then(
        "work",
        counting("work", calls.clone(), |n, _| Ok(json!(n))),
    );
    let engine = engine_with(ledger.clone(), pipeline);

    ledger.fail_appends(1);
    let err = engine
        .submit_and_wait(RequestEnvelope::new("req-fault"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(
        engine.status(&id("req-fault")).await.unwrap().status,
        ExecutionStatus::Processing
    );

    assert_eq!(engine.recover().await.unwrap(), 1);
    let snapshot = engine
        .registry()
        .find(&id("req-fault"))
        .unwrap()
        .wait_settled()
        .await;

    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(ledger.read(&id("req-fault")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_recover_resumes_after_recorded_step() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    seed_first_step(&ledger, "req-resume", json!("step-0")).await;

    let first_calls = Arc::new(AtomicU32::new(0));
    let second_calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new()
        .then(
            "first",
            counting("first", first_calls.clone(), |_, _| Ok(json!("again"))),
        )
        .then(
            "second",
            counting("second", second_calls.clone(), |_, input| {
                Ok(json!({ "after": input }))
            }),
        );
    let engine = engine_with(ledger.clone(), pipeline);

    assert_eq!(engine.recover().await.unwrap(), 1);
    engine
        .registry()
        .find(&id("req-resume"))
        .unwrap()
        .wait_settled()
        .await;

    assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    assert_eq!(second_calls.load(Ordering::SeqCst), 1);

    let state = ledger.read_state(&id("req-resume")).await.unwrap().unwrap();
    assert_eq!(state.status, ExecutionStatus::Completed);

    // Nothing left to resume
    assert_eq!(engine.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_persisted_cancel_is_honored_on_recover() {
    let ledger = Arc::new(InMemoryExecutionLedger::new());
    seed_first_step(&ledger, "req-stopped", json!("step-0")).await;

    let second_calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new()
        .then(
            "first",
            counting("first", Arc::new(AtomicU32::new(0)), |_, _| Ok(json!(null))),
        )
        .then(
            "second",
            counting("second", second_calls.clone(), |_, _| Ok(json!(null))),
        );
    let engine = engine_with(ledger.clone(), pipeline);

    // Cancellation arrives while no process is running the execution
    assert!(engine.cancel(&id("req-stopped")).await.unwrap());

    assert_eq!(engine.recover().await.unwrap(), 1);
    let snapshot = engine
        .registry()
        .find(&id("req-stopped"))
        .unwrap()
        .wait_settled()
        .await;

    assert_eq!(snapshot.status, ExecutionStatus::Cancelled);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let state = ledger.read_state(&id("req-stopped")).await.unwrap().unwrap();
    assert_eq!(state.status, ExecutionStatus::Cancelled);
    assert!(!state.cancel_requested);
}

#[tokio::test]
async fn test_concurrent_submissions_share_one_execution() {
    let calls = Arc::new(AtomicU32::new(0));
    let pipeline = Pipeline::new().then(
        "work",
        counting("work", calls.clone(), |n, _| Ok(json!(n))),
    );
    let engine = Arc::new(engine_with(Arc::new(InMemoryExecutionLedger::new()), pipeline));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .submit_and_wait(RequestEnvelope::new("req-shared"))
                .await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_success());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
