//! Unified error type for the orchestration engine.
//!
//! Every failure the engine can produce maps into [`EngineError`], giving
//! callers a single type to match against. Variants carry enough context
//! for retry classification and user-facing messages.
//!
//! Note the deliberate *absence* of a "parse incomplete" variant: a
//! brace-balanced candidate that runs off the end of the text is a normal
//! mid-stream condition, surfaced as `None` from the extractor rather than
//! as an error.
//!
//! # Transience
//!
//! [`is_transient`](EngineError::is_transient) classifies an error as worth
//! retrying. Timeouts, network failures, and HTTP-like statuses
//! 429/500/502/503/504 are transient; everything else — including
//! validation, policy, and contract failures — is permanent and never
//! retried.

use http::StatusCode;

/// The unified error type for all engine operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Text that should have been JSON could not be parsed, even after the
    /// one-shot newline repair pass.
    #[error("parse error: {message}")]
    Parse {
        /// What went wrong during parsing.
        message: String,
    },

    /// Text was syntactically JSON but violated the strict response
    /// contract. Escalates into a self-correcting continuation, never a
    /// surfaced error.
    #[error("contract violation: {reason}")]
    ContractViolation {
        /// Which part of the contract was violated.
        reason: String,
    },

    /// A tool call failed pre-dispatch validation: empty name, non-object
    /// params, missing required fields, or a policy block for the active
    /// mode. Never retried.
    #[error("validation failed for tool '{tool_name}': {reason}")]
    Validation {
        /// The tool the call named.
        tool_name: String,
        /// Why validation rejected it.
        reason: String,
    },

    /// A semantically identical call is already executing. Rejected without
    /// becoming a user-visible failure.
    #[error("call already executing: {key}")]
    DuplicateCall {
        /// The call identity that collided.
        key: String,
    },

    /// An HTTP-like failure reported by the tool boundary.
    ///
    /// `status` is `None` when the failure happened before any response
    /// (e.g. connection reset).
    #[error("http error (status={status:?}): {message}")]
    Http {
        /// The status code, if one was received.
        status: Option<StatusCode>,
        /// Human-readable description.
        message: String,
    },

    /// A transport-level network failure with no HTTP status at all.
    #[error("network error: {message}")]
    Network {
        /// Human-readable description.
        message: String,
    },

    /// A tool dispatch exceeded its deadline.
    #[error("tool dispatch timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the deadline fired.
        elapsed_ms: u64,
    },

    /// The tool boundary reported a failure that maps to no other variant.
    /// Permanent: never retried.
    #[error("tool invocation error: {message}")]
    Invocation {
        /// Human-readable description.
        message: String,
    },

    /// The turn was cancelled while a dispatch was in flight. Cancellation
    /// is "stop waiting", not "undo" — the call stays in `executing`.
    #[error("turn cancelled")]
    Cancelled,
}

/// HTTP statuses treated as transient.
const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

impl EngineError {
    /// Returns `true` if the error is transient and the dispatch may
    /// succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Http { status, .. } => status
                .map(|s| TRANSIENT_STATUSES.contains(&s.as_u16()))
                .unwrap_or(true),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}
