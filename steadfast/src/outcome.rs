//! Callback outcome type inspected by strategies.

use crate::errors::ResilienceError;

/// The result of invoking a user callback: a success value or a failure.
///
/// Strategies observe outcomes without transforming them; the original
/// outcome always flows back to the caller.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The callback completed with a value.
    Success(T),
    /// The callback failed.
    Failure(ResilienceError),
}

impl<T> Outcome<T> {
    /// Builds an outcome from a callback result.
    #[must_use]
    pub fn from_result(result: Result<T, ResilienceError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }

    /// Converts the outcome back into a result.
    pub fn into_result(self) -> Result<T, ResilienceError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(error) => Err(error),
        }
    }

    /// Returns true if the callback succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if the callback failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns the failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ResilienceError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Returns the telemetry label of the failure, if any.
    #[must_use]
    pub fn exception_name(&self) -> Option<&'static str> {
        self.error().map(ResilienceError::exception_name)
    }
}

impl<T: Clone> Clone for Outcome<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Success(value) => Self::Success(value.clone()),
            Self::Failure(error) => Self::Failure(error.clone()),
        }
    }
}
