// crates/idempotency-core/src/core/hashing.rs
// ============================================================================
// Module: Idempotency Hashing
// Description: Sensitive-text hashing, canonical JSON, and hex helpers.
// Purpose: Keep raw free text out of keys, logs, and storage.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! [`hash_text`] is the caller-side helper for free-text inputs such as user
//! prompts. It normalizes whitespace and applies plain SHA-256; the result is
//! only ever an *input* to the keyed MAC in [`crate::core::key`], so it does
//! not need to be secret-keyed. Canonical JSON follows RFC 8785 (JCS) so that
//! persisted responses replay byte-for-byte.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical encodings.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Sensitive Text
// ============================================================================

/// Normalizes and hashes free text into a 64-character hex digest.
///
/// Leading and trailing whitespace is trimmed and interior whitespace runs
/// collapse to a single space, so formatting noise never changes the digest.
#[must_use]
pub fn hash_text(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    sha256_hex(normalized.as_bytes())
}

/// Hashes raw bytes with SHA-256 and returns lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

// ============================================================================
// SECTION: Canonical JSON
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
