// crates/idempotency-core/src/core/sanitize.rs
// ============================================================================
// Module: Response Sanitizer
// Description: Allowlist filter applied to operation results before storage.
// Purpose: Prevent prompts, debug data, and secrets from being persisted.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The sanitizer keeps only allowlisted top-level fields whose values are
//! scalars or arrays of scalars. Nested objects are dropped whole rather than
//! filtered recursively, keeping the allowlist auditable and closing the door
//! on payloads smuggled through nested structures. It has no knowledge of
//! which operation produced a result.
//!
//! Security posture: operation results are untrusted; anything not proven
//! safe is discarded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::canonical_json_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Top-level fields that may be persisted.
pub const DEFAULT_ALLOWED_FIELDS: &[&str] = &[
    "ok",
    "stopReason",
    "createdActionRequestIds",
    "traceId",
    "needsHuman",
    "cached",
    "data",
];

/// Largest canonical JSON encoding of a response that may be persisted.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;
/// Field used to wrap non-object results.
const DATA_FIELD: &str = "data";
/// Stop reason recorded for failed operations.
const FAILURE_STOP_REASON: &str = "provider_failed";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Raised when a stored response is not flat.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseShapeError {
    /// A field held a nested object or a non-scalar array.
    #[error("response field {0} is not a scalar or scalar array")]
    Nested(String),
}

// ============================================================================
// SECTION: Sanitized Response
// ============================================================================

/// Flat, allowlist-filtered response object.
///
/// # Invariants
/// - Every value is `null`, a boolean, a number, a string, or an array of
///   those.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct SanitizedResponse {
    /// Fields ordered by name.
    fields: BTreeMap<String, Value>,
}

impl SanitizedResponse {
    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true when no fields survived sanitization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Converts the response into a JSON object value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields.into_iter().collect())
    }

    /// Returns the fixed payload stored for failed operations.
    ///
    /// Carries no operation-specific detail.
    #[must_use]
    pub fn failure_payload() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("ok".to_string(), Value::Bool(false));
        fields.insert("stopReason".to_string(), Value::from(FAILURE_STOP_REASON));
        Self {
            fields,
        }
    }
}

impl TryFrom<BTreeMap<String, Value>> for SanitizedResponse {
    type Error = ResponseShapeError;

    fn try_from(fields: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        if let Some((field, _)) = fields.iter().find(|(_, value)| !is_flat_value(value)) {
            return Err(ResponseShapeError::Nested(field.clone()));
        }
        Ok(Self {
            fields,
        })
    }
}

impl From<SanitizedResponse> for BTreeMap<String, Value> {
    fn from(response: SanitizedResponse) -> Self {
        response.fields
    }
}

// ============================================================================
// SECTION: Sanitizer
// ============================================================================

/// Allowlist filter for operation results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSanitizer {
    /// Field names that may be persisted.
    allowed: BTreeSet<String>,
}

impl Default for ResponseSanitizer {
    fn default() -> Self {
        Self::with_allowlist(DEFAULT_ALLOWED_FIELDS.iter().copied())
    }
}

impl ResponseSanitizer {
    /// Creates a sanitizer with an explicit allowlist.
    #[must_use]
    pub fn with_allowlist<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true when `field` is allowlisted.
    #[must_use]
    pub fn allows(&self, field: &str) -> bool {
        self.allowed.contains(field)
    }

    /// Filters `raw` down to allowlisted flat fields.
    ///
    /// Scalar and scalar-array results are wrapped as `{"data": raw}`; any
    /// other non-object result sanitizes to an empty object.
    #[must_use]
    pub fn sanitize(&self, raw: &Value) -> SanitizedResponse {
        let fields = match raw {
            Value::Object(map) => map
                .iter()
                .filter(|(key, value)| self.allows(key) && is_flat_value(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            other if is_flat_value(other) && self.allows(DATA_FIELD) => {
                BTreeMap::from([(DATA_FIELD.to_string(), other.clone())])
            }
            _ => BTreeMap::new(),
        };
        SanitizedResponse {
            fields,
        }
    }

    /// Sanitizes `raw` and checks the result against [`MAX_RESPONSE_BYTES`].
    ///
    /// Returns `None` when the canonical encoding is over the limit or
    /// cannot be produced.
    #[must_use]
    pub fn sanitize_bounded(&self, raw: &Value) -> Option<SanitizedResponse> {
        let response = self.sanitize(raw);
        let encoded = canonical_json_bytes(&response).ok()?;
        (encoded.len() <= MAX_RESPONSE_BYTES).then_some(response)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true for scalars and arrays of scalars.
fn is_flat_value(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
        Value::Array(items) => items.iter().all(is_scalar),
        Value::Object(_) => false,
    }
}

/// Returns true for non-container JSON values.
const fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}
