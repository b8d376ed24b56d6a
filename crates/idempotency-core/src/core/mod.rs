// crates/idempotency-core/src/core/mod.rs
// ============================================================================
// Module: Idempotency Core Types
// Description: Identifiers, records, key derivation, hashing, and sanitization.
// Purpose: Provide the pure building blocks consumed by the coordinator.
// Dependencies: hmac, rand, serde, serde_json, sha2, subtle
// ============================================================================

//! ## Overview
//! Core types are pure: nothing here touches storage or reads the clock.
//! The coordinator in [`crate::runtime`] composes them into the claim
//! protocol.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod hashing;
pub mod identifiers;
pub mod key;
pub mod outcome;
pub mod record;
pub mod sanitize;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hashing::canonical_json_bytes;
pub use hashing::hash_text;
pub use hashing::hex_encode;
pub use hashing::sha256_hex;
pub use hashing::HashError;
pub use identifiers::ClaimNonce;
pub use identifiers::IdentifierError;
pub use identifiers::KeyHash;
pub use identifiers::ScopeId;
pub use identifiers::TenantId;
pub use key::DeploymentEnvironment;
pub use key::InputValue;
pub use key::KeyDeriver;
pub use key::KeyError;
pub use key::KeyInputs;
pub use key::KeySecret;
pub use key::SecretError;
pub use outcome::IdempotencyOutcome;
pub use outcome::IN_PROGRESS_MESSAGE;
pub use outcome::LOST_OWNERSHIP_MESSAGE;
pub use outcome::OPERATION_FAILED_ERROR;
pub use outcome::RECORD_VANISHED_ERROR;
pub use record::ClaimKey;
pub use record::CompletionStatus;
pub use record::IdempotencyRecord;
pub use record::RecordStatus;
pub use sanitize::ResponseSanitizer;
pub use sanitize::ResponseShapeError;
pub use sanitize::SanitizedResponse;
pub use sanitize::DEFAULT_ALLOWED_FIELDS;
pub use sanitize::MAX_RESPONSE_BYTES;
pub use time::Timestamp;
