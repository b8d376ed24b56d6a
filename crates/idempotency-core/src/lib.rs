// crates/idempotency-core/src/lib.rs
// ============================================================================
// Module: Idempotency Core Library
// Description: Public API surface for the idempotent execution engine.
// Purpose: Expose core types, store interfaces, and the claim coordinator.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Idempotency core guarantees that an expensive, side-effecting operation
//! runs at most once per logical request. Callers hand the coordinator a
//! tenant, a scope, the inputs that identify the request, and a closure; the
//! coordinator claims the request in a durable store, runs the closure only
//! when it owns the claim, and commits a sanitized result behind a nonce
//! guard. Storage backends plug in through [`ClaimStore`].
//!
//! Security posture: inputs and stored records are untrusted; raw free text
//! must be hashed with [`hash_text`] before it becomes part of a key.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::ClaimStore;
pub use interfaces::Clock;
pub use interfaces::InsertOutcome;
pub use interfaces::NewClaim;
pub use interfaces::RecordUpdate;
pub use interfaces::StoreError;
pub use interfaces::SystemClock;
pub use interfaces::UpdateGuard;
pub use runtime::CoordinatorAuditEvent;
pub use runtime::CoordinatorDecision;
pub use runtime::CoordinatorError;
pub use runtime::DEFAULT_STALE_TAKEOVER;
pub use runtime::DEFAULT_TTL;
pub use runtime::ExecuteRequest;
pub use runtime::ExecutionPolicy;
pub use runtime::FileAuditSink;
pub use runtime::IdempotencyAuditSink;
pub use runtime::IdempotencyCoordinator;
pub use runtime::InMemoryClaimStore;
pub use runtime::MIN_STALE_TAKEOVER;
pub use runtime::ManualClock;
pub use runtime::NoopAuditSink;
pub use runtime::SharedClaimStore;
pub use runtime::StderrAuditSink;
pub use runtime::SweepAuditEvent;
