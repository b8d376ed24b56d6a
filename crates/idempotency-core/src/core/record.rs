// crates/idempotency-core/src/core/record.rs
// ============================================================================
// Module: Idempotency Records
// Description: The persistent claim record and its lifecycle states.
// Purpose: Define the single entity every claim store persists.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An [`IdempotencyRecord`] exists once per [`ClaimKey`]. It is created in
//! the `started` state by an atomic insert and then only changes through
//! guarded conditional updates: a nonce match for commits, a status match
//! for stale takeovers and failed-record retries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ClaimNonce;
use crate::core::identifiers::KeyHash;
use crate::core::identifiers::ScopeId;
use crate::core::identifiers::TenantId;
use crate::core::sanitize::SanitizedResponse;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// A claim is held and the operation may be running.
    Started,
    /// The operation succeeded and a sanitized response is stored.
    Succeeded,
    /// The operation failed; the generic failure payload is stored.
    Failed,
}

impl RecordStatus {
    /// Returns the stable storage label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parses a storage label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "started" => Some(Self::Started),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal states a claim owner may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Commit a successful result.
    Succeeded,
    /// Commit a failure.
    Failed,
}

impl From<CompletionStatus> for RecordStatus {
    fn from(status: CompletionStatus) -> Self {
        match status {
            CompletionStatus::Succeeded => Self::Succeeded,
            CompletionStatus::Failed => Self::Failed,
        }
    }
}

// ============================================================================
// SECTION: Keys
// ============================================================================

/// Unique key of a record: `(tenant, scope, key_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimKey {
    /// Tenant isolation boundary.
    pub tenant: TenantId,
    /// Operation family.
    pub scope: ScopeId,
    /// Derived request key.
    pub key_hash: KeyHash,
}

impl ClaimKey {
    /// Creates a claim key.
    #[must_use]
    pub const fn new(tenant: TenantId, scope: ScopeId, key_hash: KeyHash) -> Self {
        Self {
            tenant,
            scope,
            key_hash,
        }
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.scope, self.key_hash)
    }
}

// ============================================================================
// SECTION: Record
// ============================================================================

/// Persistent claim record.
///
/// # Invariants
/// - `status == Succeeded` implies `response` is present.
/// - `attempt_count >= 1` and never decreases.
/// - `completed_at` is set only for terminal states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Record key.
    pub key: ClaimKey,
    /// Current ownership proof.
    pub claim_nonce: ClaimNonce,
    /// Lifecycle state.
    pub status: RecordStatus,
    /// When the current claim was taken.
    pub started_at: Timestamp,
    /// When the record reached a terminal state.
    pub completed_at: Option<Timestamp>,
    /// When the record may be purged.
    pub expires_at: Timestamp,
    /// Number of claims ever taken on this key.
    pub attempt_count: u32,
    /// Sanitized response payload.
    pub response: Option<SanitizedResponse>,
}

impl IdempotencyRecord {
    /// Returns true when the current claim is at or past the stale cutoff.
    #[must_use]
    pub fn is_stale_at(&self, cutoff: Timestamp) -> bool {
        self.status == RecordStatus::Started && self.started_at <= cutoff
    }
}
