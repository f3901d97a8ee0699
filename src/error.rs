//! Error types
//!
//! Structural errors (registry, report bookkeeping, control state) are kept apart
//! from backend errors. Backend errors never escape an assertion: the runner turns
//! them into `error` verdicts.

use thiserror::Error;

/// Registry errors - configuration mistakes, not runtime conditions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("resource type '{0}' is already registered")]
    DuplicateType(String),

    #[error("unknown resource type '{0}'")]
    UnknownResourceType(String),
}

/// Failure talking to the backend behind a resource provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("identifier '{identifier}' matched {count} entities")]
    Ambiguous { identifier: String, count: usize },

    #[error("provider panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Resolution errors - either structural (unknown type) or a backend failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Matcher construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatcherError {
    #[error("unknown matcher '{0}'")]
    UnknownMatcher(String),

    #[error("matcher '{0}' requires an attribute")]
    MissingAttribute(String),

    #[error("matcher '{0}' requires an expected value")]
    MissingExpected(String),

    #[error("matcher '{matcher}' expects {wanted}, got {got}")]
    InvalidExpected {
        matcher: String,
        wanted: &'static str,
        got: String,
    },
}

/// Control construction errors; fatal for that control only
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("assertion #{index}: {source}")]
    InvalidMatcher {
        index: usize,
        #[source]
        source: MatcherError,
    },
}

/// Control lifecycle violations (Pending -> Running -> Completed)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("control #{control} cannot move from {from} to {to}")]
    InvalidTransition {
        control: usize,
        from: &'static str,
        to: &'static str,
    },
}

/// Report bookkeeping errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("assertion {control}.{assertion} already has a verdict")]
    AlreadyRecorded { control: usize, assertion: usize },

    #[error("assertion {control}.{assertion} was never declared")]
    OutOfRange { control: usize, assertion: usize },

    #[error(transparent)]
    State(#[from] StateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_reason_is_bare() {
        assert_eq!(BackendError::Timeout.to_string(), "timeout");
        assert_eq!(BackendError::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_resolve_error_is_transparent() {
        let err = ResolveError::from(RegistryError::UnknownResourceType("s3_bucket".into()));
        assert_eq!(err.to_string(), "unknown resource type 's3_bucket'");
    }
}
