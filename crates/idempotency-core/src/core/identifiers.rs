// crates/idempotency-core/src/core/identifiers.rs
// ============================================================================
// Module: Idempotency Identifiers
// Description: Typed identifiers for tenants, scopes, key hashes, and nonces.
// Purpose: Keep record keys strongly typed with validated string forms.
// Dependencies: rand, serde, subtle
// ============================================================================

//! ## Overview
//! Every component of an idempotency record key is a validated newtype.
//! Tenants and scopes are opaque, bounded strings. Key hashes and claim
//! nonces have fixed lowercase-hex shapes so malformed values read back from
//! storage fail closed instead of silently matching nothing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::core::hashing::hex_encode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum byte length of tenant and scope identifiers.
pub const MAX_NAME_LENGTH: usize = 128;
/// Hex length of a derived key hash (256-bit digest).
pub const KEY_HASH_HEX_LENGTH: usize = 64;
/// Random bytes drawn for each claim nonce.
const NONCE_BYTES: usize = 20;
/// Hex length of a claim nonce.
pub const CLAIM_NONCE_HEX_LENGTH: usize = NONCE_BYTES * 2;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Identifier was empty.
    #[error("{0} must be non-empty")]
    Empty(&'static str),
    /// Identifier exceeded the length limit.
    #[error("{field} exceeds {max} bytes")]
    TooLong {
        /// Identifier kind.
        field: &'static str,
        /// Maximum allowed length.
        max: usize,
    },
    /// Identifier did not have the required hex shape.
    #[error("{field} must be {length} lowercase hex characters")]
    NotHex {
        /// Identifier kind.
        field: &'static str,
        /// Required length.
        length: usize,
    },
}

// ============================================================================
// SECTION: Names
// ============================================================================

/// Validates a bounded, non-empty name.
fn validate_name(field: &'static str, value: &str) -> Result<(), IdentifierError> {
    if value.is_empty() {
        return Err(IdentifierError::Empty(field));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(IdentifierError::TooLong {
            field,
            max: MAX_NAME_LENGTH,
        });
    }
    Ok(())
}

/// Validates a fixed-length lowercase hex string.
fn validate_hex(field: &'static str, value: &str, length: usize) -> Result<(), IdentifierError> {
    let well_formed = value.len() == length
        && value.bytes().all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte));
    if well_formed {
        Ok(())
    } else {
        Err(IdentifierError::NotHex {
            field,
            length,
        })
    }
}

/// Tenant identifier; records never match across tenants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Creates a validated tenant identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is empty or too long.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        validate_name("tenant", &id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Logical operation family, e.g. `design.requestChanges`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeId(String);

impl ScopeId {
    /// Creates a validated scope identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is empty or too long.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        validate_name("scope", &id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for ScopeId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScopeId> for String {
    fn from(value: ScopeId) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Key Hash
// ============================================================================

/// Keyed digest identifying a request within a tenant and scope.
///
/// # Invariants
/// - Always exactly 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyHash(String);

impl KeyHash {
    /// Parses a key hash from its hex form.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::NotHex`] when the value is malformed.
    pub fn parse(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        validate_hex("key_hash", &value, KEY_HASH_HEX_LENGTH)?;
        Ok(Self(value))
    }

    /// Builds a key hash from raw digest bytes.
    pub(crate) fn from_digest(bytes: &[u8]) -> Self {
        Self(hex_encode(bytes))
    }

    /// Returns the hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for KeyHash {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<KeyHash> for String {
    fn from(value: KeyHash) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Claim Nonce
// ============================================================================

/// Single-use random token proving ownership of a claim.
///
/// # Invariants
/// - Generated from the OS CSPRNG; never derived from counters or clocks.
/// - Compared in constant time.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClaimNonce(String);

impl ClaimNonce {
    /// Draws a fresh nonce from the operating system's secure RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex_encode(&bytes))
    }

    /// Parses a nonce read back from storage.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::NotHex`] when the value is malformed.
    pub fn parse(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        validate_hex("claim_nonce", &value, CLAIM_NONCE_HEX_LENGTH)?;
        Ok(Self(value))
    }

    /// Returns the hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when both nonces are identical.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl PartialEq for ClaimNonce {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for ClaimNonce {}

impl fmt::Debug for ClaimNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClaimNonce(<redacted>)")
    }
}

impl TryFrom<String> for ClaimNonce {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ClaimNonce> for String {
    fn from(value: ClaimNonce) -> Self {
        value.0
    }
}
