// crates/idempotency-core/src/interfaces/mod.rs
// ============================================================================
// Module: Idempotency Interfaces
// Description: Backend-agnostic claim store and clock contracts.
// Purpose: Define the seams through which the coordinator reaches storage and time.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! [`ClaimStore`] is the only path to durable state. Implementations must
//! provide an atomic unique insert, conditional updates that report an
//! honest changed-row count, key reads, and expiry deletion. The coordinator
//! never guesses at driver result shapes; a store that cannot report exact
//! counts cannot implement this trait.
//!
//! Security posture: records read back from a store are untrusted and must
//! be validated by the implementation before they are returned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use thiserror::Error;

use crate::core::ClaimKey;
use crate::core::ClaimNonce;
use crate::core::CompletionStatus;
use crate::core::IdempotencyRecord;
use crate::core::RecordStatus;
use crate::core::SanitizedResponse;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Claim Store
// ============================================================================

/// Claim store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("claim store io error: {0}")]
    Io(String),
    /// Store data is corrupted or violates record invariants.
    #[error("claim store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("claim store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data or request is invalid.
    #[error("claim store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("claim store error: {0}")]
    Store(String),
}

/// A claim to insert in the `started` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    /// Record key.
    pub key: ClaimKey,
    /// Ownership proof for the new claim.
    pub nonce: ClaimNonce,
    /// Claim time.
    pub started_at: Timestamp,
    /// Purge time.
    pub expires_at: Timestamp,
}

impl NewClaim {
    /// Creates a claim starting at `now` that expires after `ttl`.
    #[must_use]
    pub fn new(key: ClaimKey, nonce: ClaimNonce, now: Timestamp, ttl: Duration) -> Self {
        Self {
            key,
            nonce,
            started_at: now,
            expires_at: now.saturating_add(ttl),
        }
    }

    /// Returns the record an insert of this claim creates.
    #[must_use]
    pub fn into_record(self) -> IdempotencyRecord {
        IdempotencyRecord {
            key: self.key,
            claim_nonce: self.nonce,
            status: RecordStatus::Started,
            started_at: self.started_at,
            completed_at: None,
            expires_at: self.expires_at,
            attempt_count: 1,
            response: None,
        }
    }
}

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This caller created the record and owns the claim.
    Inserted,
    /// A record already exists for the key.
    Duplicate,
}

/// Predicate a conditional update must satisfy, in addition to the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateGuard {
    /// `status = started AND started_at <= cutoff`.
    StaleStarted {
        /// Latest claim time still considered stale.
        cutoff: Timestamp,
    },
    /// `status = failed`.
    Failed,
    /// `claim_nonce = nonce`.
    Nonce(ClaimNonce),
}

impl UpdateGuard {
    /// Returns true when `record` satisfies the guard.
    #[must_use]
    pub fn matches(&self, record: &IdempotencyRecord) -> bool {
        match self {
            Self::StaleStarted {
                cutoff,
            } => record.is_stale_at(*cutoff),
            Self::Failed => record.status == RecordStatus::Failed,
            Self::Nonce(nonce) => record.claim_nonce.matches(nonce),
        }
    }
}

/// Field changes applied by a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordUpdate {
    /// Take a new claim: new nonce, `status = started`, `attempt_count + 1`,
    /// `completed_at` cleared.
    Reclaim {
        /// New ownership proof.
        nonce: ClaimNonce,
        /// New claim time.
        started_at: Timestamp,
        /// Clear any stored response.
        clear_response: bool,
    },
    /// Commit a terminal state.
    Complete {
        /// Terminal status.
        status: CompletionStatus,
        /// Sanitized response to persist.
        response: SanitizedResponse,
        /// Completion time.
        completed_at: Timestamp,
    },
}

impl RecordUpdate {
    /// Applies the update to an in-memory record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when the attempt counter would overflow.
    pub fn apply(&self, record: &mut IdempotencyRecord) -> Result<(), StoreError> {
        match self {
            Self::Reclaim {
                nonce,
                started_at,
                clear_response,
            } => {
                record.attempt_count = record.attempt_count.checked_add(1).ok_or_else(|| {
                    StoreError::Corrupt(format!("attempt_count overflow for {}", record.key))
                })?;
                record.claim_nonce = nonce.clone();
                record.status = RecordStatus::Started;
                record.started_at = *started_at;
                record.completed_at = None;
                if *clear_response {
                    record.response = None;
                }
            }
            Self::Complete {
                status,
                response,
                completed_at,
            } => {
                record.status = (*status).into();
                record.response = Some(response.clone());
                record.completed_at = Some(*completed_at);
            }
        }
        Ok(())
    }
}

/// Durable store of idempotency records.
pub trait ClaimStore {
    /// Atomically inserts a `started` record unless one exists for the key.
    ///
    /// Exactly one of any set of concurrent callers observes
    /// [`InsertOutcome::Inserted`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure. A uniqueness collision is not
    /// an error.
    fn try_insert_started(&self, claim: &NewClaim) -> Result<InsertOutcome, StoreError>;

    /// Applies `update` to the record at `key` when `guard` holds.
    ///
    /// Returns the exact number of records modified (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn conditional_update(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        update: &RecordUpdate,
    ) -> Result<u64, StoreError>;

    /// Reads the record at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or invalid stored data.
    fn read_by_key(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Deletes every record with `expires_at <= now`, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError>;
}

impl<T: ClaimStore + ?Sized> ClaimStore for Arc<T> {
    fn try_insert_started(&self, claim: &NewClaim) -> Result<InsertOutcome, StoreError> {
        (**self).try_insert_started(claim)
    }

    fn conditional_update(
        &self,
        key: &ClaimKey,
        guard: &UpdateGuard,
        update: &RecordUpdate,
    ) -> Result<u64, StoreError> {
        (**self).conditional_update(key, guard, update)
    }

    fn read_by_key(&self, key: &ClaimKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        (**self).read_by_key(key)
    }

    fn delete_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        (**self).delete_expired(now)
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Time source for claims, commits, and sweeps.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp::from_unix_millis(i64::try_from(now.as_millis()).unwrap_or(i64::MAX))
    }
}
