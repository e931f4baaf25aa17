//! Shared error types for the services crate.

use thiserror::Error;

use testprep_core::model::{SessionStateError, SessionStatus, describe_out_of_range};

use crate::sink::TransportError;

/// Errors emitted by `TestSessionRunner`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunnerError {
    #[error("invalid session: {0}")]
    InvalidSession(#[source] SessionStateError),
    #[error("{}", describe_out_of_range(.index, .len))]
    OutOfRange { index: Option<usize>, len: usize },
    #[error("cannot {operation} while the session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },
    #[error("submission failed: {0}")]
    SubmissionFailed(#[source] TransportError),
}

impl From<SessionStateError> for RunnerError {
    fn from(err: SessionStateError) -> Self {
        match err {
            SessionStateError::OutOfRange { index, len } => Self::OutOfRange { index, len },
            SessionStateError::InvalidState { operation, status } => {
                Self::InvalidState { operation, status }
            }
            other => Self::InvalidSession(other),
        }
    }
}

/// Errors emitted by `SessionDriver`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    #[error("command channel closed before the session completed")]
    CommandsClosed,
    #[error("auto-submit gave up after {attempts} attempts: {source}")]
    AutoSubmitExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Errors emitted while building `HttpSubmissionSink` from configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HttpSinkConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid API base url {raw:?}: {source}")]
    InvalidBaseUrl {
        raw: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid timeout {raw:?}")]
    InvalidTimeout { raw: String },
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}
