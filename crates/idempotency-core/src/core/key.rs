// crates/idempotency-core/src/core/key.rs
// ============================================================================
// Module: Idempotency Key Derivation
// Description: Canonical input encoding and HMAC-SHA256 key derivation.
// Purpose: Turn request inputs into stable, non-guessable record keys.
// Dependencies: hmac, serde_json, sha2
// ============================================================================

//! ## Overview
//! [`KeyDeriver`] canonicalizes [`KeyInputs`] (sorted keys, `key=<json>`
//! entries joined by `|`) and applies HMAC-SHA256 under a process secret.
//! Someone who can guess plausible inputs still cannot precompute keys
//! without the secret.
//!
//! The secret is injected explicitly as a [`KeySecret`]. Resolution is a
//! startup step: outside [`DeploymentEnvironment::Local`] a missing, default,
//! or short secret is a hard error, never a fallback.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;

use crate::core::hashing::hash_text;
use crate::core::identifiers::KeyHash;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Separator between canonical entries.
const ENTRY_SEPARATOR: char = '|';
/// Separator between an entry key and its encoded value.
const VALUE_SEPARATOR: char = '=';
/// Secret used only when running locally without configuration.
pub const DEV_FALLBACK_SECRET: &str = "default-secret-dev-only";
/// Minimum secret length outside local development.
pub const MIN_SECRET_BYTES: usize = 32;

/// HMAC-SHA256 instance used for key derivation.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Key derivation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Input key was empty or contained a reserved separator.
    #[error("invalid input key: {0}")]
    InvalidInputKey(String),
    /// MAC initialization failed.
    #[error("key mac error: {0}")]
    Mac(String),
}

/// Secret resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    /// No secret was supplied outside local development.
    #[error("idempotency secret is required in {0} environments")]
    Missing(DeploymentEnvironment),
    /// The dev-only fallback secret was supplied outside local development.
    #[error("idempotency secret must not use the dev-only default in {0} environments")]
    DefaultSecret(DeploymentEnvironment),
    /// The secret was shorter than [`MIN_SECRET_BYTES`].
    #[error("idempotency secret must be at least {min} bytes (got {actual})")]
    TooShort {
        /// Minimum allowed length.
        min: usize,
        /// Supplied length.
        actual: usize,
    },
}

// ============================================================================
// SECTION: Environment
// ============================================================================

/// Deployment environment used to decide secret strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEnvironment {
    /// Developer workstation; the fallback secret is permitted.
    #[default]
    Local,
    /// Automated test runs; an explicit secret is required.
    Test,
    /// Production; an explicit, strong secret is required.
    Production,
}

impl DeploymentEnvironment {
    /// Returns the stable label for this environment.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for DeploymentEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// SECTION: Secret
// ============================================================================

/// Process-wide MAC secret.
#[derive(Clone)]
pub struct KeySecret(Vec<u8>);

impl KeySecret {
    /// Resolves the secret for `environment`.
    ///
    /// An empty value is treated as missing.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError`] outside local development when the secret is
    /// missing, equal to [`DEV_FALLBACK_SECRET`], or too short.
    pub fn resolve(
        environment: DeploymentEnvironment,
        value: Option<&str>,
    ) -> Result<Self, SecretError> {
        let value = value.filter(|value| !value.is_empty());
        match (environment, value) {
            (DeploymentEnvironment::Local, None) => Ok(Self::dev_fallback()),
            (DeploymentEnvironment::Local, Some(value)) => Ok(Self(value.as_bytes().to_vec())),
            (_, None) => Err(SecretError::Missing(environment)),
            (_, Some(value)) => Self::strict(environment, value),
        }
    }

    /// Builds a secret held to production rules.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError`] when the value is the dev default or too short.
    pub fn new(value: &str) -> Result<Self, SecretError> {
        Self::strict(DeploymentEnvironment::Production, value)
    }

    /// Returns the dev-only fallback secret.
    #[must_use]
    pub fn dev_fallback() -> Self {
        Self(DEV_FALLBACK_SECRET.as_bytes().to_vec())
    }

    /// Applies non-local validation rules.
    fn strict(environment: DeploymentEnvironment, value: &str) -> Result<Self, SecretError> {
        if value == DEV_FALLBACK_SECRET {
            return Err(SecretError::DefaultSecret(environment));
        }
        if value.len() < MIN_SECRET_BYTES {
            return Err(SecretError::TooShort {
                min: MIN_SECRET_BYTES,
                actual: value.len(),
            });
        }
        Ok(Self(value.as_bytes().to_vec()))
    }

    /// Returns the raw secret bytes.
    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KeySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeySecret(<redacted>)")
    }
}

// ============================================================================
// SECTION: Inputs
// ============================================================================

/// Scalar input value contributing to a request's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValue {
    /// Absent value; canonicalized as the empty string.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Integer(i64),
    /// Text value. Free text must be hashed first.
    Text(String),
}

impl InputValue {
    /// Returns the canonical JSON encoding of this value.
    fn canonical(&self) -> String {
        let value = match self {
            Self::Null => serde_json::Value::from(""),
            Self::Bool(value) => serde_json::Value::from(*value),
            Self::Integer(value) => serde_json::Value::from(*value),
            Self::Text(value) => serde_json::Value::from(value.as_str()),
        };
        value.to_string()
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for InputValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for InputValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for InputValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Inputs that determine a request's identity, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInputs {
    /// Entries sorted lexicographically by key.
    entries: BTreeMap<String, InputValue>,
}

impl KeyInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidInputKey`] when `key` is empty or contains
    /// `=` or `|`.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<InputValue>,
    ) -> Result<(), KeyError> {
        let key = key.into();
        if key.is_empty() || key.contains([ENTRY_SEPARATOR, VALUE_SEPARATOR]) {
            return Err(KeyError::InvalidInputKey(key));
        }
        self.entries.insert(key, value.into());
        Ok(())
    }

    /// Builder form of [`KeyInputs::insert`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidInputKey`] for reserved or empty keys.
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<InputValue>,
    ) -> Result<Self, KeyError> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Inserts the [`hash_text`] digest of `text` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidInputKey`] for reserved or empty keys.
    pub fn with_text_hash(self, key: impl Into<String>, text: &str) -> Result<Self, KeyError> {
        self.with(key, hash_text(text))
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the canonical string fed to the MAC.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                out.push(ENTRY_SEPARATOR);
            }
            out.push_str(key);
            out.push(VALUE_SEPARATOR);
            out.push_str(&value.canonical());
        }
        out
    }
}

// ============================================================================
// SECTION: Deriver
// ============================================================================

/// Derives record keys from inputs under a process secret.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    /// MAC secret.
    secret: KeySecret,
}

impl KeyDeriver {
    /// Creates a deriver bound to `secret`.
    #[must_use]
    pub const fn new(secret: KeySecret) -> Self {
        Self {
            secret,
        }
    }

    /// Derives the 64-character key hash for `inputs`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Mac`] when the MAC cannot be initialized.
    pub fn derive(&self, inputs: &KeyInputs) -> Result<KeyHash, KeyError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|err| KeyError::Mac(err.to_string()))?;
        mac.update(inputs.canonical_string().as_bytes());
        Ok(KeyHash::from_digest(&mac.finalize().into_bytes()))
    }
}
