//! Error types for resilience executions.
//!
//! The taxonomy distinguishes failures produced by the library (rejections,
//! cancellations, validation) from failures produced by user callbacks, which
//! pass through strategies untransformed.

use crate::circuit_breaker::CircuitState;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The error type surfaced by every strategy execution.
///
/// Variants are cloneable so a circuit breaker can retain the outcome that
/// caused it to break and hand it back to later callers.
#[derive(Debug, Clone, Error)]
pub enum ResilienceError {
    /// A bad argument was passed to a pool or API surface.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// Option validation failed while building a pipeline.
    #[error("invalid options: `{field}`: {reason}")]
    InvalidOptions {
        /// The offending option field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The outer cancellation signal fired during execution.
    #[error("operation cancelled: {reason}")]
    OperationCancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// The per-call deadline elapsed before the callback completed.
    #[error("operation timed out after {timeout:?}")]
    TimeoutRejected {
        /// The deadline that elapsed.
        timeout: Duration,
        /// The cancellation cause observed by the callback.
        cause: String,
    },

    /// Execution was blocked by a circuit breaker.
    #[error("circuit is {state}, calls are blocked")]
    BrokenCircuit {
        /// The breaker state that blocked the call.
        state: CircuitState,
        /// The failure that broke the circuit, when one exists.
        cause: Option<Arc<ResilienceError>>,
    },

    /// A callback failure, passed through unchanged.
    #[error("{0}")]
    UserFailure(Arc<dyn StdError + Send + Sync>),
}

impl ResilienceError {
    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Creates an invalid-options error for a named field.
    #[must_use]
    pub fn invalid_options(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            field,
            reason: reason.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::OperationCancelled {
            reason: reason.into(),
        }
    }

    /// Wraps a user error as a pass-through callback failure.
    #[must_use]
    pub fn user<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::UserFailure(Arc::new(error))
    }

    /// Creates a pass-through callback failure from a plain message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::UserFailure(Arc::new(MessageError(message.into())))
    }

    /// Returns the stable variant label used as a telemetry tag.
    #[must_use]
    pub fn exception_name(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::InvalidOptions { .. } => "InvalidOptions",
            Self::OperationCancelled { .. } => "OperationCancelled",
            Self::TimeoutRejected { .. } => "TimeoutRejected",
            Self::BrokenCircuit { .. } => "BrokenCircuit",
            Self::UserFailure(_) => "UserFailure",
        }
    }

    /// Returns true for cancellation failures.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::OperationCancelled { .. })
    }

    /// Returns true for callback failures passed through by strategies.
    #[must_use]
    pub fn is_user_failure(&self) -> bool {
        matches!(self, Self::UserFailure(_))
    }
}

/// A plain-text user failure used where no richer error type exists.
#[derive(Debug, Clone)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}
