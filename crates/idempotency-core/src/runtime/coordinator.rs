// crates/idempotency-core/src/runtime/coordinator.rs
// ============================================================================
// Module: Idempotency Coordinator
// Description: Claim → run → commit orchestration over a claim store.
// Purpose: Execute an operation at most once per derived key.
// Dependencies: crate::{core, interfaces}, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`IdempotencyCoordinator::execute`] derives a key, races for the claim,
//! runs the caller's operation only if it won, and commits the sanitized
//! result under a nonce guard. The coordinator holds no in-process lock;
//! every decision rests on store atomicity and honest changed-row counts.
//!
//! Security posture: operation errors are dropped unformatted. Only the
//! sanitized success payload or the fixed failure payload reaches the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::ClaimKey;
use crate::core::ClaimNonce;
use crate::core::CompletionStatus;
use crate::core::IdempotencyOutcome;
use crate::core::IdempotencyRecord;
use crate::core::KeyDeriver;
use crate::core::KeyError;
use crate::core::KeyInputs;
use crate::core::RecordStatus;
use crate::core::ResponseSanitizer;
use crate::core::SanitizedResponse;
use crate::core::ScopeId;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::interfaces::ClaimStore;
use crate::interfaces::Clock;
use crate::interfaces::InsertOutcome;
use crate::interfaces::NewClaim;
use crate::interfaces::RecordUpdate;
use crate::interfaces::StoreError;
use crate::interfaces::SystemClock;
use crate::interfaces::UpdateGuard;
use crate::runtime::audit::CoordinatorAuditEvent;
use crate::runtime::audit::CoordinatorDecision;
use crate::runtime::audit::IdempotencyAuditSink;
use crate::runtime::audit::NoopAuditSink;
use crate::runtime::audit::SweepAuditEvent;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Shortest accepted stale-takeover window.
pub const MIN_STALE_TAKEOVER: Duration = Duration::from_secs(1);
/// Default record lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default stale-takeover window.
pub const DEFAULT_STALE_TAKEOVER: Duration = Duration::from_secs(5 * 60);
/// Re-claims allowed after a duplicate insert finds no record.
const MAX_VANISHED_RETRIES: u32 = 1;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Coordinator errors.
///
/// Operation failures are not errors; they are reported as
/// [`IdempotencyOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The request was rejected before touching the store.
    #[error("invalid execute request: {0}")]
    InvalidRequest(String),
    /// Key derivation failed.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The claim store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Request Types
// ============================================================================

/// Timing policy for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Lifetime of a new record.
    pub ttl: Duration,
    /// Age after which a `started` claim may be taken over.
    pub stale_takeover: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            stale_takeover: DEFAULT_STALE_TAKEOVER,
        }
    }
}

impl ExecutionPolicy {
    /// Creates a policy from explicit durations.
    #[must_use]
    pub const fn new(ttl: Duration, stale_takeover: Duration) -> Self {
        Self {
            ttl,
            stale_takeover,
        }
    }

    /// Creates a policy from whole hours and minutes.
    #[must_use]
    pub const fn from_hours_minutes(ttl_hours: u64, stale_takeover_minutes: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_hours.saturating_mul(3600)),
            stale_takeover: Duration::from_secs(stale_takeover_minutes.saturating_mul(60)),
        }
    }

    /// Validates the policy bounds.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidRequest`] when `ttl` is zero or
    /// `stale_takeover` is below [`MIN_STALE_TAKEOVER`].
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.ttl.is_zero() {
            return Err(CoordinatorError::InvalidRequest("ttl must be greater than zero".to_string()));
        }
        if self.stale_takeover < MIN_STALE_TAKEOVER {
            return Err(CoordinatorError::InvalidRequest(format!(
                "stale_takeover must be at least {}s",
                MIN_STALE_TAKEOVER.as_secs()
            )));
        }
        Ok(())
    }
}

/// One idempotent execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    /// Isolation boundary.
    pub tenant: TenantId,
    /// Operation family.
    pub scope: ScopeId,
    /// Values that define operation identity.
    pub inputs: KeyInputs,
    /// Timing policy.
    pub policy: ExecutionPolicy,
}

impl ExecuteRequest {
    /// Creates a request with the default policy.
    #[must_use]
    pub fn new(tenant: TenantId, scope: ScopeId, inputs: KeyInputs) -> Self {
        Self {
            tenant,
            scope,
            inputs,
            policy: ExecutionPolicy::default(),
        }
    }

    /// Replaces the timing policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Internal result of the claim phase.
enum ClaimAttempt {
    /// This caller holds the claim.
    Owned {
        /// Ownership proof.
        nonce: ClaimNonce,
        /// Attempt count after the claim, when known.
        attempt_count: Option<u32>,
    },
    /// The protocol finished without running the operation.
    Resolved(IdempotencyOutcome),
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Claim → run → commit coordinator.
pub struct IdempotencyCoordinator<S> {
    /// Claim store backend.
    store: S,
    /// Key deriver holding the process secret.
    deriver: KeyDeriver,
    /// Allowlist applied before persistence.
    sanitizer: ResponseSanitizer,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Audit sink.
    audit: Arc<dyn IdempotencyAuditSink>,
}

impl<S: ClaimStore> IdempotencyCoordinator<S> {
    /// Creates a coordinator with the default sanitizer, the system clock,
    /// and a no-op audit sink.
    #[must_use]
    pub fn new(store: S, deriver: KeyDeriver) -> Self {
        Self {
            store,
            deriver,
            sanitizer: ResponseSanitizer::default(),
            clock: Arc::new(SystemClock),
            audit: Arc::new(NoopAuditSink),
        }
    }

    /// Replaces the response sanitizer.
    #[must_use]
    pub fn with_sanitizer(mut self, sanitizer: ResponseSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn IdempotencyAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Returns the underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Derives the record key for `inputs` under `tenant` and `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Key`] when derivation fails.
    pub fn derive_key(
        &self,
        tenant: &TenantId,
        scope: &ScopeId,
        inputs: &KeyInputs,
    ) -> Result<ClaimKey, CoordinatorError> {
        let key_hash = self.deriver.derive(inputs)?;
        Ok(ClaimKey::new(tenant.clone(), scope.clone(), key_hash))
    }

    /// Runs `operation` at most once for the request's key.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] for invalid requests, key derivation
    /// failures, and store failures. Operation failures are reported as
    /// [`IdempotencyOutcome::Failed`].
    pub fn execute<T, E, F>(
        &self,
        request: &ExecuteRequest,
        operation: F,
    ) -> Result<IdempotencyOutcome, CoordinatorError>
    where
        T: Serialize,
        F: FnOnce() -> Result<T, E>,
    {
        request.policy.validate()?;
        let key = self.derive_key(&request.tenant, &request.scope, &request.inputs)?;
        match self.claim(&key, &request.policy)? {
            ClaimAttempt::Resolved(outcome) => Ok(outcome),
            ClaimAttempt::Owned {
                nonce,
                attempt_count,
            } => self.run_owned(&key, nonce, attempt_count, operation),
        }
    }

    /// Deletes every record whose `expires_at` has passed.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] when the store fails.
    pub fn sweep_expired(&self) -> Result<u64, CoordinatorError> {
        let now = self.clock.now();
        let deleted = self.store.delete_expired(now)?;
        self.audit.record_sweep(&SweepAuditEvent::new(now, deleted));
        Ok(deleted)
    }

    /// Inserts a fresh claim or inspects the existing record.
    fn claim(
        &self,
        key: &ClaimKey,
        policy: &ExecutionPolicy,
    ) -> Result<ClaimAttempt, CoordinatorError> {
        let mut vanished = 0;
        loop {
            let now = self.clock.now();
            let nonce = ClaimNonce::generate();
            let claim = NewClaim::new(key.clone(), nonce.clone(), now, policy.ttl);
            if self.store.try_insert_started(&claim)? == InsertOutcome::Inserted {
                self.emit(key, now, CoordinatorDecision::Claimed, Some(1));
                return Ok(ClaimAttempt::Owned {
                    nonce,
                    attempt_count: Some(1),
                });
            }
            if let Some(record) = self.store.read_by_key(key)? {
                return self.inspect(key, record, policy, now);
            }
            if vanished >= MAX_VANISHED_RETRIES {
                self.emit(key, now, CoordinatorDecision::RecordVanished, None);
                return Ok(ClaimAttempt::Resolved(IdempotencyOutcome::record_vanished()));
            }
            vanished += 1;
        }
    }

    /// Decides what to do with an existing record.
    fn inspect(
        &self,
        key: &ClaimKey,
        record: IdempotencyRecord,
        policy: &ExecutionPolicy,
        now: Timestamp,
    ) -> Result<ClaimAttempt, CoordinatorError> {
        match record.status {
            RecordStatus::Succeeded => {
                let Some(data) = record.response else {
                    return Err(StoreError::Corrupt(format!(
                        "succeeded record without response for {key}"
                    ))
                    .into());
                };
                self.emit(key, now, CoordinatorDecision::CacheHit, Some(record.attempt_count));
                Ok(ClaimAttempt::Resolved(IdempotencyOutcome::Succeeded {
                    data,
                    cached: true,
                }))
            }
            RecordStatus::Started => {
                let cutoff = now.saturating_sub(policy.stale_takeover);
                if !record.is_stale_at(cutoff) {
                    self.emit(key, now, CoordinatorDecision::InProgress, Some(record.attempt_count));
                    return Ok(ClaimAttempt::Resolved(IdempotencyOutcome::in_progress()));
                }
                self.reclaim(
                    key,
                    &UpdateGuard::StaleStarted {
                        cutoff,
                    },
                    false,
                    now,
                    record.attempt_count,
                    (CoordinatorDecision::Takeover, CoordinatorDecision::TakeoverLost),
                )
            }
            RecordStatus::Failed => self.reclaim(
                key,
                &UpdateGuard::Failed,
                true,
                now,
                record.attempt_count,
                (CoordinatorDecision::RetryClaimed, CoordinatorDecision::RetryLost),
            ),
        }
    }

    /// Races for ownership of an existing record under `guard`.
    fn reclaim(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        clear_response: bool,
        now: Timestamp,
        observed_attempts: u32,
        (won, lost): (CoordinatorDecision, CoordinatorDecision),
    ) -> Result<ClaimAttempt, CoordinatorError> {
        let nonce = ClaimNonce::generate();
        let update = RecordUpdate::Reclaim {
            nonce: nonce.clone(),
            started_at: now,
            clear_response,
        };
        if self.store.conditional_update(key, guard, &update)? == 0 {
            self.emit(key, now, lost, Some(observed_attempts));
            return Ok(ClaimAttempt::Resolved(IdempotencyOutcome::in_progress()));
        }
        let attempt_count = observed_attempts.checked_add(1);
        self.emit(key, now, won, attempt_count);
        Ok(ClaimAttempt::Owned {
            nonce,
            attempt_count,
        })
    }

    /// Runs the operation as owner and commits under the nonce guard.
    fn run_owned<T, E, F>(
        &self,
        key: &ClaimKey,
        nonce: ClaimNonce,
        attempt_count: Option<u32>,
        operation: F,
    ) -> Result<IdempotencyOutcome, CoordinatorError>
    where
        T: Serialize,
        F: FnOnce() -> Result<T, E>,
    {
        let data = operation()
            .ok()
            .and_then(|value| serde_json::to_value(&value).ok())
            .and_then(|value| self.sanitizer.sanitize_bounded(&value));
        let guard = UpdateGuard::Nonce(nonce);
        let now = self.clock.now();
        let Some(data) = data else {
            self.store.conditional_update(
                key,
                &guard,
                &RecordUpdate::Complete {
                    status: CompletionStatus::Failed,
                    response: SanitizedResponse::failure_payload(),
                    completed_at: now,
                },
            )?;
            self.emit(key, now, CoordinatorDecision::OperationFailed, attempt_count);
            return Ok(IdempotencyOutcome::operation_failed());
        };

        let update = RecordUpdate::Complete {
            status: CompletionStatus::Succeeded,
            response: data.clone(),
            completed_at: now,
        };
        if self.store.conditional_update(key, &guard, &update)? == 0 {
            self.emit(key, now, CoordinatorDecision::CommitLost, attempt_count);
            return Ok(IdempotencyOutcome::lost_ownership());
        }
        self.emit(key, now, CoordinatorDecision::Committed, attempt_count);
        Ok(IdempotencyOutcome::Succeeded {
            data,
            cached: false,
        })
    }

    /// Records one decision.
    fn emit(
        &self,
        key: &ClaimKey,
        now: Timestamp,
        decision: CoordinatorDecision,
        attempt_count: Option<u32>,
    ) {
        self.audit.record(&CoordinatorAuditEvent::new(key, now, decision, attempt_count));
    }
}
