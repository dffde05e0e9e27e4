//! Error types for retrying calls
use crate::backoff::BackoffError;

/// Failure reported by a call attempt.
///
/// Transport errors are carried verbatim in [`CallError::Transport`]; the other variants are
/// lifecycle conditions of the call contract itself.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// The call was canceled before it produced an outcome.
    #[error("call canceled")]
    Canceled,
    /// The call had already been started once; calls are single-use.
    #[error("call already executed")]
    AlreadyExecuted,
    /// The transport could not complete the request.
    #[error("transport failure: {0}")]
    Transport(#[source] E),
}

impl<E> CallError<E> {
    /// Check if this error is a cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Check if this error wraps a transport failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Borrow the transport error if present.
    pub fn as_transport(&self) -> Option<&E> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// Get the transport error if this is a `Transport` variant.
    pub fn into_transport(self) -> Option<E> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors produced while building retry parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    /// A backoff configuration was rejected.
    #[error("invalid backoff: {0}")]
    InvalidBackoff(#[from] BackoffError),
    /// The builder was finished without a policy.
    #[error("a retry policy is required")]
    MissingPolicy,
    /// The builder was finished without a delay scheduler.
    #[error("a delay scheduler is required")]
    MissingScheduler,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn transport_error_display_and_source() {
        let err: CallError<io::Error> =
            CallError::Transport(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.to_string(), "transport failure: reset");
        assert!(err.source().is_some());
        assert!(err.is_transport());
        assert!(!err.is_canceled());
        assert_eq!(err.into_transport().unwrap().kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn lifecycle_errors_have_no_source() {
        let canceled: CallError<io::Error> = CallError::Canceled;
        assert!(canceled.is_canceled());
        assert!(canceled.source().is_none());
        assert!(canceled.as_transport().is_none());

        let again: CallError<io::Error> = CallError::AlreadyExecuted;
        assert_eq!(again.to_string(), "call already executed");
    }

    #[test]
    fn build_error_wraps_backoff_error() {
        let err: BuildError = BackoffError::MaxMustBePositive.into();
        assert!(matches!(err, BuildError::InvalidBackoff(BackoffError::MaxMustBePositive)));
        assert!(err.to_string().contains("max must be greater than zero"));
        assert_eq!(
            BuildError::InvalidMaxAttempts(0).to_string(),
            "max_attempts must be > 0 (got 0)"
        );
    }
}
