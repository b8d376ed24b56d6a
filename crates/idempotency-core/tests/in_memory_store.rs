// crates/idempotency-core/tests/in_memory_store.rs
// ============================================================================
// Module: In-Memory Claim Store Tests
// Description: Store primitive semantics for the in-memory backend.
// ============================================================================
//! ## Overview
//! Exercises insert uniqueness, guarded updates with honest counts, and
//! expiry deletion on [`idempotency_core::InMemoryClaimStore`].

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

use std::sync::Barrier;
use std::time::Duration;

use idempotency_core::ClaimKey;
use idempotency_core::ClaimNonce;
use idempotency_core::ClaimStore;
use idempotency_core::CompletionStatus;
use idempotency_core::InMemoryClaimStore;
use idempotency_core::InsertOutcome;
use idempotency_core::KeyHash;
use idempotency_core::NewClaim;
use idempotency_core::RecordStatus;
use idempotency_core::RecordUpdate;
use idempotency_core::SanitizedResponse;
use idempotency_core::ScopeId;
use idempotency_core::TenantId;
use idempotency_core::Timestamp;
use idempotency_core::UpdateGuard;

fn key(suffix: char) -> ClaimKey {
    ClaimKey::new(
        TenantId::new("tenant-a").unwrap(),
        ScopeId::new("design.requestChanges").unwrap(),
        KeyHash::parse(suffix.to_string().repeat(64)).unwrap(),
    )
}

fn claim(key: &ClaimKey, at: i64) -> NewClaim {
    NewClaim::new(
        key.clone(),
        ClaimNonce::generate(),
        Timestamp::from_unix_millis(at),
        Duration::from_secs(60),
    )
}

#[test]
fn insert_is_unique_per_key() {
    let store = InMemoryClaimStore::new();
    let key = key('a');
    assert_eq!(store.try_insert_started(&claim(&key, 0)).unwrap(), InsertOutcome::Inserted);
    assert_eq!(store.try_insert_started(&claim(&key, 1)).unwrap(), InsertOutcome::Duplicate);

    let record = store.read_by_key(&key).unwrap().expect("record");
    assert_eq!(record.status, RecordStatus::Started);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.started_at, Timestamp::from_unix_millis(0));
    assert_eq!(record.expires_at, Timestamp::from_unix_millis(60_000));
}

#[test]
fn tenants_do_not_collide() {
    let store = InMemoryClaimStore::new();
    let first = key('a');
    let mut second = first.clone();
    second.tenant = TenantId::new("tenant-b").unwrap();
    assert_eq!(store.try_insert_started(&claim(&first, 0)).unwrap(), InsertOutcome::Inserted);
    assert_eq!(store.try_insert_started(&claim(&second, 0)).unwrap(), InsertOutcome::Inserted);
    assert_eq!(store.record_count().unwrap(), 2);
}

#[test]
fn concurrent_inserts_have_one_winner() {
    let store = InMemoryClaimStore::new();
    let key = key('b');
    let barrier = Barrier::new(8);
    let winners = std::thread::scope(|scope| {
        let handles: Vec<_> = (0 .. 8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    store.try_insert_started(&claim(&key, 0)).unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|outcome| *outcome == InsertOutcome::Inserted)
            .count()
    });
    assert_eq!(winners, 1);
}

#[test]
fn nonce_guard_rejects_foreign_nonce() {
    let store = InMemoryClaimStore::new();
    let key = key('c');
    let owned = claim(&key, 0);
    store.try_insert_started(&owned).unwrap();

    let update = RecordUpdate::Complete {
        status: CompletionStatus::Succeeded,
        response: SanitizedResponse::failure_payload(),
        completed_at: Timestamp::from_unix_millis(5),
    };
    let foreign = UpdateGuard::Nonce(ClaimNonce::generate());
    assert_eq!(store.conditional_update(&key, &foreign, &update).unwrap(), 0);
    assert_eq!(store.read_by_key(&key).unwrap().unwrap().status, RecordStatus::Started);

    let mine = UpdateGuard::Nonce(owned.nonce.clone());
    assert_eq!(store.conditional_update(&key, &mine, &update).unwrap(), 1);
    let record = store.read_by_key(&key).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Succeeded);
    assert_eq!(record.completed_at, Some(Timestamp::from_unix_millis(5)));
}

#[test]
fn stale_guard_uses_inclusive_cutoff() {
    let store = InMemoryClaimStore::new();
    let key = key('d');
    store.try_insert_started(&claim(&key, 1_000)).unwrap();

    let reclaim = RecordUpdate::Reclaim {
        nonce: ClaimNonce::generate(),
        started_at: Timestamp::from_unix_millis(2_000),
        clear_response: false,
    };
    let early = UpdateGuard::StaleStarted {
        cutoff: Timestamp::from_unix_millis(999),
    };
    assert_eq!(store.conditional_update(&key, &early, &reclaim).unwrap(), 0);

    let boundary = UpdateGuard::StaleStarted {
        cutoff: Timestamp::from_unix_millis(1_000),
    };
    assert_eq!(store.conditional_update(&key, &boundary, &reclaim).unwrap(), 1);
    let record = store.read_by_key(&key).unwrap().unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.started_at, Timestamp::from_unix_millis(2_000));
    assert_eq!(record.expires_at, Timestamp::from_unix_millis(61_000));
}

#[test]
fn failed_guard_reclaim_clears_response_and_completion() {
    let store = InMemoryClaimStore::new();
    let key = key('e');
    let owned = claim(&key, 0);
    store.try_insert_started(&owned).unwrap();
    let fail = RecordUpdate::Complete {
        status: CompletionStatus::Failed,
        response: SanitizedResponse::failure_payload(),
        completed_at: Timestamp::from_unix_millis(10),
    };
    store.conditional_update(&key, &UpdateGuard::Nonce(owned.nonce), &fail).unwrap();

    let reclaim = RecordUpdate::Reclaim {
        nonce: ClaimNonce::generate(),
        started_at: Timestamp::from_unix_millis(20),
        clear_response: true,
    };
    assert_eq!(store.conditional_update(&key, &UpdateGuard::Failed, &reclaim).unwrap(), 1);
    assert_eq!(store.conditional_update(&key, &UpdateGuard::Failed, &reclaim).unwrap(), 0);
    let record = store.read_by_key(&key).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Started);
    assert_eq!(record.response, None);
    assert_eq!(record.completed_at, None);
    assert_eq!(record.attempt_count, 2);
}

#[test]
fn update_on_missing_key_changes_nothing() {
    let store = InMemoryClaimStore::new();
    let update = RecordUpdate::Reclaim {
        nonce: ClaimNonce::generate(),
        started_at: Timestamp::from_unix_millis(0),
        clear_response: true,
    };
    assert_eq!(store.conditional_update(&key('f'), &UpdateGuard::Failed, &update).unwrap(), 0);
}

#[test]
fn delete_expired_counts_and_keeps_live_records() {
    let store = InMemoryClaimStore::new();
    store.try_insert_started(&claim(&key('1'), 0)).unwrap();
    store.try_insert_started(&claim(&key('2'), 30_000)).unwrap();
    store.try_insert_started(&claim(&key('3'), 90_000)).unwrap();

    assert_eq!(store.delete_expired(Timestamp::from_unix_millis(90_000)).unwrap(), 2);
    assert_eq!(store.record_count().unwrap(), 1);
    assert!(store.read_by_key(&key('3')).unwrap().is_some());
    assert_eq!(store.delete_expired(Timestamp::from_unix_millis(90_000)).unwrap(), 0);
}
