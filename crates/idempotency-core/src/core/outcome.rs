// crates/idempotency-core/src/core/outcome.rs
// ============================================================================
// Module: Execution Outcomes
// Description: Caller-visible result of an idempotent execution.
// Purpose: Force callers to handle success, in-progress, and failure.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`IdempotencyOutcome`] is what the coordinator returns when the protocol
//! ran to completion. Store failures are not outcomes; they surface as
//! [`crate::CoordinatorError`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::sanitize::SanitizedResponse;

// ============================================================================
// SECTION: Messages
// ============================================================================

/// Message returned while another caller holds a fresh claim.
pub const IN_PROGRESS_MESSAGE: &str =
    "Operation already in progress. Please retry in a few seconds.";
/// Message returned when a commit lost its ownership guard.
pub const LOST_OWNERSHIP_MESSAGE: &str =
    "Lost ownership during commit. Another caller may have taken over.";
/// Generic error returned for failed operations.
pub const OPERATION_FAILED_ERROR: &str = "Operation failed";
/// Error returned when a record vanished twice during claiming.
pub const RECORD_VANISHED_ERROR: &str = "Idempotency key disappeared during claim attempt";

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of [`crate::IdempotencyCoordinator::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IdempotencyOutcome {
    /// The operation has a committed result. Final for the record's TTL.
    Succeeded {
        /// Sanitized result.
        data: SanitizedResponse,
        /// True when served from a previous execution.
        cached: bool,
    },
    /// Another caller owns the claim; retry shortly.
    InProgress {
        /// Human-readable retry hint.
        message: String,
    },
    /// This attempt failed; safe to retry immediately.
    Failed {
        /// Generic error message without operation detail.
        error: String,
    },
}

impl IdempotencyOutcome {
    /// Returns the stable status label.
    #[must_use]
    pub const fn status_label(&self) -> &'static str {
        match self {
            Self::Succeeded {
                ..
            } => "succeeded",
            Self::InProgress {
                ..
            } => "in_progress",
            Self::Failed {
                ..
            } => "failed",
        }
    }

    /// Returns the sanitized data for successful outcomes.
    #[must_use]
    pub const fn data(&self) -> Option<&SanitizedResponse> {
        match self {
            Self::Succeeded {
                data, ..
            } => Some(data),
            Self::InProgress {
                ..
            }
            | Self::Failed {
                ..
            } => None,
        }
    }

    /// Returns true for cache hits.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        matches!(self, Self::Succeeded { cached: true, .. })
    }

    /// Builds the fresh-claim in-progress outcome.
    pub(crate) fn in_progress() -> Self {
        Self::InProgress {
            message: IN_PROGRESS_MESSAGE.to_string(),
        }
    }

    /// Builds the lost-ownership in-progress outcome.
    pub(crate) fn lost_ownership() -> Self {
        Self::InProgress {
            message: LOST_OWNERSHIP_MESSAGE.to_string(),
        }
    }

    /// Builds the generic failure outcome.
    pub(crate) fn operation_failed() -> Self {
        Self::Failed {
            error: OPERATION_FAILED_ERROR.to_string(),
        }
    }

    /// Builds the vanished-record failure outcome.
    pub(crate) fn record_vanished() -> Self {
        Self::Failed {
            error: RECORD_VANISHED_ERROR.to_string(),
        }
    }
}
