// crates/idempotency-core/tests/coordinator.rs
// ============================================================================
// Module: Idempotency Coordinator Tests
// Description: Claim → run → commit protocol behavior and race handling.
// ============================================================================
//! ## Overview
//! Drives the coordinator over the in-memory store with a manual clock.
//! Race windows are reproduced deterministically either by advancing time
//! from inside the operation or by wrapping the store so a competitor acts
//! between the coordinator's read and its guarded write.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::Barrier;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use idempotency_core::ClaimKey;
use idempotency_core::ClaimNonce;
use idempotency_core::ClaimStore;
use idempotency_core::Clock;
use idempotency_core::CoordinatorAuditEvent;
use idempotency_core::CoordinatorDecision;
use idempotency_core::CoordinatorError;
use idempotency_core::ExecuteRequest;
use idempotency_core::ExecutionPolicy;
use idempotency_core::IN_PROGRESS_MESSAGE;
use idempotency_core::IdempotencyAuditSink;
use idempotency_core::IdempotencyCoordinator;
use idempotency_core::IdempotencyOutcome;
use idempotency_core::IdempotencyRecord;
use idempotency_core::InMemoryClaimStore;
use idempotency_core::InsertOutcome;
use idempotency_core::KeyDeriver;
use idempotency_core::KeyInputs;
use idempotency_core::KeySecret;
use idempotency_core::LOST_OWNERSHIP_MESSAGE;
use idempotency_core::MAX_RESPONSE_BYTES;
use idempotency_core::ManualClock;
use idempotency_core::NewClaim;
use idempotency_core::OPERATION_FAILED_ERROR;
use idempotency_core::RECORD_VANISHED_ERROR;
use idempotency_core::RecordStatus;
use idempotency_core::RecordUpdate;
use idempotency_core::SanitizedResponse;
use idempotency_core::ScopeId;
use idempotency_core::StoreError;
use idempotency_core::SweepAuditEvent;
use idempotency_core::TenantId;
use idempotency_core::Timestamp;
use idempotency_core::UpdateGuard;
use serde::Serialize;
use serde::Serializer;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const START_MS: i64 = 1_700_000_000_000;
const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

fn coordinator<S: ClaimStore>(store: S, clock: &ManualClock) -> IdempotencyCoordinator<S> {
    IdempotencyCoordinator::new(store, KeyDeriver::new(KeySecret::new(TEST_SECRET).unwrap()))
        .with_clock(Arc::new(clock.clone()))
}

fn clock() -> ManualClock {
    ManualClock::new(Timestamp::from_unix_millis(START_MS))
}

fn request(scope: &str, value: &str) -> ExecuteRequest {
    ExecuteRequest::new(
        TenantId::new("tenant-a").unwrap(),
        ScopeId::new(scope).unwrap(),
        KeyInputs::new().with("test", value).unwrap(),
    )
}

fn key_for<S: ClaimStore>(coordinator: &IdempotencyCoordinator<S>, request: &ExecuteRequest) -> ClaimKey {
    coordinator.derive_key(&request.tenant, &request.scope, &request.inputs).unwrap()
}

fn ok_result(trace: &str) -> Result<Value, Infallible> {
    Ok(json!({"ok": true, "traceId": trace}))
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<CoordinatorAuditEvent>>,
    sweeps: Mutex<Vec<u64>>,
}

impl RecordingSink {
    fn decisions(&self) -> Vec<CoordinatorDecision> {
        self.events.lock().unwrap().iter().map(|event| event.decision).collect()
    }
}

impl IdempotencyAuditSink for RecordingSink {
    fn record(&self, event: &CoordinatorAuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn record_sweep(&self, event: &SweepAuditEvent) {
        self.sweeps.lock().unwrap().push(event.deleted);
    }
}

/// Lets a competitor reclaim the record right after the coordinator reads it.
struct RacingStore {
    inner: InMemoryClaimStore,
    competitor_time: Timestamp,
}

impl ClaimStore for RacingStore {
    fn try_insert_started(&self, claim: &NewClaim) -> Result<InsertOutcome, StoreError> {
        self.inner.try_insert_started(claim)
    }

    fn conditional_update(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        update: &RecordUpdate,
    ) -> Result<u64, StoreError> {
        self.inner.conditional_update(key, guard, update)
    }

    fn read_by_key(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        let snapshot = self.inner.read_by_key(key)?;
        if let Some(record) = &snapshot {
            let guard = match record.status {
                RecordStatus::Started => UpdateGuard::StaleStarted {
                    cutoff: record.started_at,
                },
                RecordStatus::Failed => UpdateGuard::Failed,
                RecordStatus::Succeeded => return Ok(snapshot),
            };
            let update = RecordUpdate::Reclaim {
                nonce: ClaimNonce::generate(),
                started_at: self.competitor_time,
                clear_response: true,
            };
            assert_eq!(self.inner.conditional_update(key, &guard, &update)?, 1);
        }
        Ok(snapshot)
    }

    fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        self.inner.delete_expired(now)
    }
}

/// Reports a duplicate insert but never returns the record, `misses` times.
struct VanishingStore {
    inner: InMemoryClaimStore,
    misses: usize,
    inserts: AtomicUsize,
    reads: AtomicUsize,
}

impl VanishingStore {
    fn new(misses: usize) -> Self {
        Self {
            inner: InMemoryClaimStore::new(),
            misses,
            inserts: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }
}

impl ClaimStore for VanishingStore {
    fn try_insert_started(&self, claim: &NewClaim) -> Result<InsertOutcome, StoreError> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) < self.misses {
            return Ok(InsertOutcome::Duplicate);
        }
        self.inner.try_insert_started(claim)
    }

    fn conditional_update(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        update: &RecordUpdate,
    ) -> Result<u64, StoreError> {
        self.inner.conditional_update(key, guard, update)
    }

    fn read_by_key(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.misses {
            return Ok(None);
        }
        self.inner.read_by_key(key)
    }

    fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        self.inner.delete_expired(now)
    }
}

/// Fails every call with an I/O error.
struct FailingStore;

impl ClaimStore for FailingStore {
    fn try_insert_started(&self, _claim: &NewClaim) -> Result<InsertOutcome, StoreError> {
        Err(StoreError::Io("disk unavailable".to_string()))
    }

    fn conditional_update(
        &self,
        _key: &ClaimKey,
        _guard: &UpdateGuard,
        _update: &RecordUpdate,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Io("disk unavailable".to_string()))
    }

    fn read_by_key(&self, _key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        Err(StoreError::Io("disk unavailable".to_string()))
    }

    fn delete_expired(&self, _now: Timestamp) -> Result<u64, StoreError> {
        Err(StoreError::Io("disk unavailable".to_string()))
    }
}

struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("CANARY_SERIALIZE"))
    }
}

// ============================================================================
// SECTION: Happy Path
// ============================================================================

#[test]
fn first_call_executes_and_replay_is_cached() {
    let store = InMemoryClaimStore::new();
    let clock = clock();
    let coordinator = coordinator(store.clone(), &clock);
    let request = request("X", "value2");
    let calls = AtomicUsize::new(0);
    let operation = || {
        calls.fetch_add(1, Ordering::SeqCst);
        ok_result("trace-1")
    };

    let first = coordinator.execute(&request, operation).unwrap();
    let second = coordinator.execute(&request, operation).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let expected: SanitizedResponse =
        serde_json::from_value(json!({"ok": true, "traceId": "trace-1"})).unwrap();
    assert_eq!(
        first,
        IdempotencyOutcome::Succeeded {
            data: expected.clone(),
            cached: false,
        }
    );
    assert_eq!(
        second,
        IdempotencyOutcome::Succeeded {
            data: expected,
            cached: true,
        }
    );

    let record = store.read_by_key(&key_for(&coordinator, &request)).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Succeeded);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.completed_at, Some(Timestamp::from_unix_millis(START_MS)));
}

#[test]
fn replay_serves_first_result_without_running_second_operation() {
    let store = InMemoryClaimStore::new();
    let clock = clock();
    let coordinator = coordinator(store.clone(), &clock);
    let request = request("X", "value2");
    let first_calls = AtomicUsize::new(0);
    let second_calls = AtomicUsize::new(0);

    let first = coordinator
        .execute(&request, || {
            first_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(json!({"data": "result2"}))
        })
        .unwrap();
    let second = coordinator
        .execute(&request, || {
            second_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(json!({"data": "result2-new"}))
        })
        .unwrap();

    let expected: SanitizedResponse = serde_json::from_value(json!({"data": "result2"})).unwrap();
    assert_eq!(
        first,
        IdempotencyOutcome::Succeeded {
            data: expected.clone(),
            cached: false,
        }
    );
    assert_eq!(
        second,
        IdempotencyOutcome::Succeeded {
            data: expected,
            cached: true,
        }
    );
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn outcome_serializes_with_status_tag() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store, &clock());
    let outcome = coordinator.execute(&request("X", "value2"), || ok_result("t")).unwrap();
    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({"status": "succeeded", "data": {"ok": true, "traceId": "t"}, "cached": false})
    );
}

#[test]
fn different_scopes_and_inputs_execute_independently() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store.clone(), &clock());
    let calls = AtomicUsize::new(0);
    for request in [request("X", "value2"), request("Y", "value2"), request("X", "value3")] {
        let outcome = coordinator
            .execute(&request, || {
                calls.fetch_add(1, Ordering::SeqCst);
                ok_result("t")
            })
            .unwrap();
        assert!(!outcome.is_cached());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.record_count().unwrap(), 3);
}

#[test]
fn concurrent_callers_execute_once() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store, &clock());
    let request = request("X", "value2");
    let calls = AtomicUsize::new(0);
    let barrier = Barrier::new(8);

    let outcomes: Vec<IdempotencyOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0 .. 8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    coordinator
                        .execute(&request, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            ok_result("once")
                        })
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let fresh = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, IdempotencyOutcome::Succeeded { cached: false, .. }))
        .count();
    assert_eq!(fresh, 1);
    for outcome in &outcomes {
        match outcome {
            IdempotencyOutcome::Succeeded {
                ..
            } => {}
            IdempotencyOutcome::InProgress {
                message,
            } => assert_eq!(message, IN_PROGRESS_MESSAGE),
            IdempotencyOutcome::Failed {
                ..
            } => panic!("unexpected failure"),
        }
    }
}

// ============================================================================
// SECTION: Failure Handling
// ============================================================================

#[test]
fn failure_is_generic_and_retry_is_immediate() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store.clone(), &clock());
    let request = request("X", "value2");

    let failed = coordinator
        .execute(&request, || Err::<Value, _>("CANARY_PROVIDER_ERROR".to_string()))
        .unwrap();
    assert_eq!(
        failed,
        IdempotencyOutcome::Failed {
            error: OPERATION_FAILED_ERROR.to_string(),
        }
    );

    let key = key_for(&coordinator, &request);
    let record = store.read_by_key(&key).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.response, Some(SanitizedResponse::failure_payload()));
    assert!(!serde_json::to_string(&record).unwrap().contains("CANARY"));

    let retried = coordinator.execute(&request, || ok_result("retry")).unwrap();
    assert!(matches!(retried, IdempotencyOutcome::Succeeded { cached: false, .. }));
    let record = store.read_by_key(&key).unwrap().unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.status, RecordStatus::Succeeded);
}

#[test]
fn oversized_result_is_recorded_as_failure() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store.clone(), &clock());
    let request = request("X", "value2");
    let calls = AtomicUsize::new(0);
    let outcome = coordinator
        .execute(&request, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(json!({"data": "x".repeat(MAX_RESPONSE_BYTES)}))
        })
        .unwrap();
    assert_eq!(
        outcome,
        IdempotencyOutcome::Failed {
            error: OPERATION_FAILED_ERROR.to_string(),
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let record = store.read_by_key(&key_for(&coordinator, &request)).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.response, Some(SanitizedResponse::failure_payload()));
}

#[test]
fn unserializable_result_is_recorded_as_failure() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store.clone(), &clock());
    let request = request("X", "value2");
    let outcome = coordinator.execute(&request, || Ok::<_, Infallible>(Unserializable)).unwrap();
    assert_eq!(outcome.status_label(), "failed");
    let record = store.read_by_key(&key_for(&coordinator, &request)).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert!(!serde_json::to_string(&record).unwrap().contains("CANARY"));
}

#[test]
fn success_payload_is_sanitized_before_storage() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store.clone(), &clock());
    let request = request("X", "value2");
    let outcome = coordinator
        .execute(&request, || {
            Ok::<_, Infallible>(json!({
                "ok": true,
                "prompt": "CANARY_PROMPT",
                "data": {"debug": "CANARY_DEBUG"},
                "createdActionRequestIds": ["ar-1"],
            }))
        })
        .unwrap();

    let data = outcome.data().unwrap();
    assert_eq!(data.clone().into_value(), json!({"ok": true, "createdActionRequestIds": ["ar-1"]}));
    let record = store.read_by_key(&key_for(&coordinator, &request)).unwrap().unwrap();
    assert!(!serde_json::to_string(&record).unwrap().contains("CANARY"));
}

// ============================================================================
// SECTION: In-Progress and Takeover
// ============================================================================

#[test]
fn fresh_foreign_claim_reports_in_progress() {
    let store = InMemoryClaimStore::new();
    let clock = clock();
    let coordinator = coordinator(store.clone(), &clock);
    let request = request("X", "value2");
    let key = key_for(&coordinator, &request);
    store
        .try_insert_started(&NewClaim::new(
            key,
            ClaimNonce::generate(),
            clock.now(),
            Duration::from_secs(3600),
        ))
        .unwrap();

    clock.advance(Duration::from_secs(299));
    let outcome = coordinator
        .execute(&request, || -> Result<Value, Infallible> { panic!("must not run") })
        .unwrap();
    assert_eq!(
        outcome,
        IdempotencyOutcome::InProgress {
            message: IN_PROGRESS_MESSAGE.to_string(),
        }
    );
}

#[test]
fn stale_claim_is_taken_over_at_the_boundary() {
    let store = InMemoryClaimStore::new();
    let clock = clock();
    let coordinator = coordinator(store.clone(), &clock);
    let request = request("X", "value2");
    let key = key_for(&coordinator, &request);
    let abandoned = ClaimNonce::generate();
    store
        .try_insert_started(&NewClaim::new(
            key.clone(),
            abandoned.clone(),
            clock.now(),
            Duration::from_secs(3600),
        ))
        .unwrap();

    clock.advance(Duration::from_secs(300));
    let outcome = coordinator.execute(&request, || ok_result("takeover")).unwrap();
    assert!(matches!(outcome, IdempotencyOutcome::Succeeded { cached: false, .. }));

    let record = store.read_by_key(&key).unwrap().unwrap();
    assert_eq!(record.attempt_count, 2);
    assert!(!record.claim_nonce.matches(&abandoned));
    assert_eq!(record.expires_at, Timestamp::from_unix_millis(START_MS + 3_600_000));
}

#[test]
fn lost_takeover_race_reports_in_progress() {
    let clock = clock();
    let inner = InMemoryClaimStore::new();
    let racing = RacingStore {
        inner: inner.clone(),
        competitor_time: Timestamp::from_unix_millis(START_MS + 600_000),
    };
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(racing, &clock).with_audit_sink(sink.clone());
    let request = request("X", "value2");
    let key = key_for(&coordinator, &request);
    inner
        .try_insert_started(&NewClaim::new(
            key.clone(),
            ClaimNonce::generate(),
            clock.now(),
            Duration::from_secs(3600),
        ))
        .unwrap();

    clock.advance(Duration::from_secs(600));
    let outcome = coordinator
        .execute(&request, || -> Result<Value, Infallible> { panic!("must not run") })
        .unwrap();
    assert_eq!(outcome.status_label(), "in_progress");
    assert_eq!(sink.decisions(), vec![CoordinatorDecision::TakeoverLost]);
    assert_eq!(inner.read_by_key(&key).unwrap().unwrap().attempt_count, 2);
}

#[test]
fn lost_retry_race_reports_in_progress() {
    let clock = clock();
    let inner = InMemoryClaimStore::new();
    let sink = Arc::new(RecordingSink::default());
    let direct = coordinator(inner.clone(), &clock);
    let request = request("X", "value2");
    direct.execute(&request, || Err::<Value, _>(())).unwrap();

    let racing = RacingStore {
        inner: inner.clone(),
        competitor_time: clock.now(),
    };
    let coordinator = coordinator(racing, &clock).with_audit_sink(sink.clone());
    let outcome = coordinator
        .execute(&request, || -> Result<Value, Infallible> { panic!("must not run") })
        .unwrap();
    assert_eq!(outcome.status_label(), "in_progress");
    assert_eq!(sink.decisions(), vec![CoordinatorDecision::RetryLost]);
}

#[test]
fn stale_owner_commit_is_discarded_after_takeover() {
    let store = InMemoryClaimStore::new();
    let clock = clock();
    let first = coordinator(store.clone(), &clock);
    let second = coordinator(store.clone(), &clock);
    let request = request("X", "value2");

    let outcome = first
        .execute(&request, || {
            clock.advance(Duration::from_secs(300));
            let inner = second.execute(&request, || ok_result("second")).unwrap();
            assert!(matches!(inner, IdempotencyOutcome::Succeeded { cached: false, .. }));
            ok_result("first")
        })
        .unwrap();

    assert_eq!(
        outcome,
        IdempotencyOutcome::InProgress {
            message: LOST_OWNERSHIP_MESSAGE.to_string(),
        }
    );
    let record = store.read_by_key(&key_for(&first, &request)).unwrap().unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.response.unwrap().get("traceId"), Some(&json!("second")));
}

#[test]
fn external_nonce_change_blocks_commit() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store.clone(), &clock());
    let request = request("X", "value2");
    let key = key_for(&coordinator, &request);

    let outcome = coordinator
        .execute(&request, || {
            let record = store.read_by_key(&key).unwrap().unwrap();
            let changed = store
                .conditional_update(
                    &key,
                    &UpdateGuard::Nonce(record.claim_nonce.clone()),
                    &RecordUpdate::Reclaim {
                        nonce: ClaimNonce::generate(),
                        started_at: record.started_at,
                        clear_response: true,
                    },
                )
                .unwrap();
            assert_eq!(changed, 1);
            ok_result("late")
        })
        .unwrap();

    assert_eq!(outcome.status_label(), "in_progress");
    let record = store.read_by_key(&key).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Started);
    assert_eq!(record.response, None);
}

// ============================================================================
// SECTION: Anomalies and Errors
// ============================================================================

#[test]
fn vanished_record_is_retried_exactly_once() {
    let store = VanishingStore::new(usize::MAX);
    let coordinator = coordinator(store, &clock());
    let outcome = coordinator
        .execute(&request("X", "value2"), || -> Result<Value, Infallible> {
            panic!("must not run")
        })
        .unwrap();
    assert_eq!(
        outcome,
        IdempotencyOutcome::Failed {
            error: RECORD_VANISHED_ERROR.to_string(),
        }
    );
    assert_eq!(coordinator.store().inserts.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.store().reads.load(Ordering::SeqCst), 2);
}

#[test]
fn single_vanish_recovers_on_retry() {
    let store = VanishingStore::new(1);
    let coordinator = coordinator(store, &clock());
    let outcome = coordinator.execute(&request("X", "value2"), || ok_result("t")).unwrap();
    assert!(matches!(outcome, IdempotencyOutcome::Succeeded { cached: false, .. }));
    assert_eq!(coordinator.store().inserts.load(Ordering::SeqCst), 2);
}

#[test]
fn store_errors_propagate() {
    let coordinator = coordinator(FailingStore, &clock());
    let err = coordinator
        .execute(&request("X", "value2"), || -> Result<Value, Infallible> {
            panic!("must not run")
        })
        .unwrap_err();
    assert_eq!(err, CoordinatorError::Store(StoreError::Io("disk unavailable".to_string())));
    assert!(matches!(coordinator.sweep_expired(), Err(CoordinatorError::Store(_))));
}

#[test]
fn succeeded_record_without_response_is_corrupt() {
    let store = InMemoryClaimStore::new();
    let clock = clock();
    let coordinator = coordinator(store.clone(), &clock);
    let request = request("X", "value2");
    let key = key_for(&coordinator, &request);
    store
        .seed(IdempotencyRecord {
            key,
            claim_nonce: ClaimNonce::generate(),
            status: RecordStatus::Succeeded,
            started_at: clock.now(),
            completed_at: Some(clock.now()),
            expires_at: Timestamp::from_unix_millis(START_MS + 1_000),
            attempt_count: 1,
            response: None,
        })
        .unwrap();
    let err = coordinator.execute(&request, || ok_result("t")).unwrap_err();
    assert!(matches!(err, CoordinatorError::Store(StoreError::Corrupt(_))));
}

#[test]
fn invalid_policy_is_rejected_before_store_access() {
    let store = InMemoryClaimStore::new();
    let coordinator = coordinator(store.clone(), &clock());
    let short_stale = request("X", "value2")
        .with_policy(ExecutionPolicy::new(Duration::from_secs(60), Duration::from_millis(500)));
    let zero_ttl =
        request("X", "value2").with_policy(ExecutionPolicy::new(Duration::ZERO, Duration::from_secs(5)));
    for request in [short_stale, zero_ttl] {
        let err = coordinator.execute(&request, || ok_result("t")).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidRequest(_)));
    }
    assert_eq!(store.record_count().unwrap(), 0);
}

#[test]
fn policy_from_hours_minutes() {
    let policy = ExecutionPolicy::from_hours_minutes(24, 5);
    assert_eq!(policy, ExecutionPolicy::default());
}

// ============================================================================
// SECTION: Sweep and Audit
// ============================================================================

#[test]
fn sweep_removes_expired_records_and_allows_reexecution() {
    let store = InMemoryClaimStore::new();
    let clock = clock();
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(store.clone(), &clock).with_audit_sink(sink.clone());
    let request = request("X", "value2")
        .with_policy(ExecutionPolicy::new(Duration::from_secs(60), Duration::from_secs(5)));
    coordinator.execute(&request, || ok_result("t")).unwrap();

    clock.advance(Duration::from_secs(59));
    assert_eq!(coordinator.sweep_expired().unwrap(), 0);
    clock.advance(Duration::from_secs(1));
    assert_eq!(coordinator.sweep_expired().unwrap(), 1);
    assert_eq!(*sink.sweeps.lock().unwrap(), vec![0, 1]);

    let again = coordinator.execute(&request, || ok_result("t")).unwrap();
    assert!(!again.is_cached());
}

#[test]
fn audit_events_record_decisions_without_sensitive_data() {
    let store = InMemoryClaimStore::new();
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(store, &clock()).with_audit_sink(sink.clone());
    let request = request("X", "CANARY_INPUT");
    coordinator.execute(&request, || ok_result("CANARY_RESULT")).unwrap();
    coordinator.execute(&request, || ok_result("CANARY_RESULT")).unwrap();

    assert_eq!(
        sink.decisions(),
        vec![
            CoordinatorDecision::Claimed,
            CoordinatorDecision::Committed,
            CoordinatorDecision::CacheHit
        ]
    );
    let key = key_for(&coordinator, &request);
    for event in sink.events.lock().unwrap().iter() {
        let line = serde_json::to_string(event).unwrap();
        assert!(!line.contains("CANARY"));
        assert!(line.contains(key.key_hash.as_str()));
        assert_eq!(event.attempt_count, Some(1));
    }
}
