// crates/idempotency-core/src/runtime/audit.rs
// ============================================================================
// Module: Idempotency Audit Logging
// Description: Structured audit events for claim decisions and sweeps.
// Purpose: Emit redacted audit logs without hard dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every coordinator decision and every expiry sweep produces a JSON event.
//! Events carry identifiers and labels only: never request inputs, nonces,
//! operation results, or error text. Sinks are deliberately small so a
//! deployment can route events into its own logging pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::core::ClaimKey;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Coordinator decision recorded in an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorDecision {
    /// Fresh insert won the claim.
    Claimed,
    /// A committed result was served.
    CacheHit,
    /// Another caller holds a fresh claim.
    InProgress,
    /// A stale claim was taken over.
    Takeover,
    /// A concurrent caller won the stale takeover.
    TakeoverLost,
    /// A failed record was reclaimed.
    RetryClaimed,
    /// A concurrent caller won the failed-record reclaim.
    RetryLost,
    /// The owner committed a success.
    Committed,
    /// The owner's commit matched no record; result discarded.
    CommitLost,
    /// The operation failed and the generic failure was recorded.
    OperationFailed,
    /// The record disappeared between insert and read.
    RecordVanished,
}

impl CoordinatorDecision {
    /// Returns the stable label for this decision.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::CacheHit => "cache_hit",
            Self::InProgress => "in_progress",
            Self::Takeover => "takeover",
            Self::TakeoverLost => "takeover_lost",
            Self::RetryClaimed => "retry_claimed",
            Self::RetryLost => "retry_lost",
            Self::Committed => "committed",
            Self::CommitLost => "commit_lost",
            Self::OperationFailed => "operation_failed",
            Self::RecordVanished => "record_vanished",
        }
    }
}

/// Coordinator audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Tenant identifier.
    pub tenant: String,
    /// Scope identifier.
    pub scope: String,
    /// Derived key hash.
    pub key_hash: String,
    /// Decision taken.
    pub decision: CoordinatorDecision,
    /// Attempt count when known.
    pub attempt_count: Option<u32>,
}

impl CoordinatorAuditEvent {
    /// Builds an event for `key`.
    #[must_use]
    pub fn new(
        key: &ClaimKey,
        timestamp: Timestamp,
        decision: CoordinatorDecision,
        attempt_count: Option<u32>,
    ) -> Self {
        Self {
            event: "idempotency_decision",
            timestamp_ms: timestamp.as_unix_millis(),
            tenant: key.tenant.to_string(),
            scope: key.scope.to_string(),
            key_hash: key.key_hash.to_string(),
            decision,
            attempt_count,
        }
    }
}

/// Expiry sweep audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct SweepAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Records deleted.
    pub deleted: u64,
}

impl SweepAuditEvent {
    /// Builds a sweep event.
    #[must_use]
    pub const fn new(timestamp: Timestamp, deleted: u64) -> Self {
        Self {
            event: "idempotency_sweep",
            timestamp_ms: timestamp.as_unix_millis(),
            deleted,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for idempotency events.
pub trait IdempotencyAuditSink: Send + Sync {
    /// Record a coordinator decision.
    fn record(&self, event: &CoordinatorAuditEvent);

    /// Record an expiry sweep.
    fn record_sweep(&self, _event: &SweepAuditEvent) {}
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl IdempotencyAuditSink for StderrAuditSink {
    fn record(&self, event: &CoordinatorAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }

    fn record_sweep(&self, event: &SweepAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Writes one serialized line.
    fn write_line<T: Serialize>(&self, event: &T) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

impl IdempotencyAuditSink for FileAuditSink {
    fn record(&self, event: &CoordinatorAuditEvent) {
        self.write_line(event);
    }

    fn record_sweep(&self, event: &SweepAuditEvent) {
        self.write_line(event);
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl IdempotencyAuditSink for NoopAuditSink {
    fn record(&self, _event: &CoordinatorAuditEvent) {}
}
