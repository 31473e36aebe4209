//! Error taxonomy shared by the session engine and its transport

use crate::llm::LlmError;
use crate::state_machine::TransitionError;
use crate::stream::FrameError;
use thiserror::Error;

/// Failures surfaced to callers of the session engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Operation is not valid for the session's current state
    #[error("{0}")]
    InvalidState(String),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    /// Upstream model provider failed mid-exchange
    #[error("Stream error: {0}")]
    Stream(String),
    /// A malformed frame. The decoder logs and skips these itself; this
    /// variant is what a `FrameError` becomes if a caller hands one on.
    #[error("Malformed frame: {0}")]
    Parse(String),
    #[error("Transcript contains no user turns to evaluate")]
    NoTranscript,
    /// Unknown scenario
    #[error("Scenario not found: {0}")]
    NotFound(String),
}

impl From<TransitionError> for SessionError {
    fn from(e: TransitionError) -> Self {
        SessionError::InvalidState(e.to_string())
    }
}

impl From<FrameError> for SessionError {
    fn from(e: FrameError) -> Self {
        SessionError::Parse(e.to_string())
    }
}

impl From<LlmError> for SessionError {
    fn from(e: LlmError) -> Self {
        SessionError::Stream(e.message)
    }
}
