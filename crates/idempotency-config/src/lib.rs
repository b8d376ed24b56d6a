// crates/idempotency-config/src/lib.rs
// ============================================================================
// Module: Idempotency Config Library
// Description: Configuration model and startup validation.
// Purpose: Load fail-closed configuration and wire stores, sinks, and secrets.
// Dependencies: idempotency-core, idempotency-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is a small TOML document. Loading enforces size, path, and
//! encoding limits; validation rejects unknown fields, out-of-range timing,
//! memory stores in production, and secrets that fail the environment's
//! strictness rules.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AuditConfig;
pub use config::AuditSinkType;
pub use config::ConfigError;
pub use config::DEFAULT_SECRET_ENV_VAR;
pub use config::ExecutionConfig;
pub use config::IdempotencyConfig;
pub use config::SecretConfig;
pub use config::StoreConfig;
pub use config::StoreType;
