// crates/idempotency-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Claim Store
// Description: Durable ClaimStore backend using SQLite.
// Purpose: Provide production-grade persistence for idempotency records.
// Dependencies: idempotency-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`idempotency_core::ClaimStore`].
//! Uniqueness is enforced by the table constraint, every transition is a
//! single guarded `UPDATE`, and changed-row counts come straight from the
//! engine. Several handles, including handles in other processes, may share
//! one database file. Security posture: rows read back are untrusted and
//! validated before use.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_RESPONSE_BYTES;
pub use store::SqliteClaimStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
