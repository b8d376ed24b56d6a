// crates/idempotency-core/src/runtime/mod.rs
// ============================================================================
// Module: Idempotency Runtime
// Description: Claim coordinator, audit sinks, and reference stores.
// Purpose: Execute operations at most once against a pluggable claim store.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The runtime hosts the claim → run → commit coordinator plus the pieces it
//! needs at the edges: audit sinks, a manual clock for tests, and an
//! in-memory claim store for tests and demos.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod clock;
pub mod coordinator;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::CoordinatorAuditEvent;
pub use audit::CoordinatorDecision;
pub use audit::FileAuditSink;
pub use audit::IdempotencyAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use audit::SweepAuditEvent;
pub use clock::ManualClock;
pub use coordinator::CoordinatorError;
pub use coordinator::DEFAULT_STALE_TAKEOVER;
pub use coordinator::DEFAULT_TTL;
pub use coordinator::ExecuteRequest;
pub use coordinator::ExecutionPolicy;
pub use coordinator::IdempotencyCoordinator;
pub use coordinator::MIN_STALE_TAKEOVER;
pub use store::InMemoryClaimStore;
pub use store::SharedClaimStore;
