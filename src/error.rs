use std::time::Duration;

use thiserror::Error;

use crate::proposal::{ProposalId, ProposalStatus};

/// The intent extractor could not produce a usable intent. Never reaches a caller: the
/// scheduler substitutes the default intent and records a warning instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntentError {
    #[error("Extractor returned a malformed intent: {0}")]
    Malformed(String),
    #[error("Extractor unavailable: {0}")]
    Unavailable(String),
    #[error("Extractor did not answer within {0:?}")]
    Timeout(Duration),
}

/// A calendar lookup failed for one identity. Absorbed by the scheduler, which treats the
/// identity as free for the whole window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Calendar for {identity} unavailable: {reason}")]
    Unavailable { identity: String, reason: String },
    #[error("Calendar for {identity} did not answer within {timeout:?}")]
    Timeout { identity: String, timeout: Duration },
    #[error("Calendar returned an invalid event: {0}")]
    InvalidEvent(String),
}

/// The incoming request payload is unusable. Raised before any pipeline stage runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Invalid datetime `{0}`, expected DD-MM-YYYYTHH:MM:SS")]
    InvalidDatetime(String),
}

impl ValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "MISSING_REQUIRED_FIELD",
            ValidationError::InvalidEmail(_) => "INVALID_EMAIL",
            ValidationError::InvalidDatetime(_) => "INVALID_DATETIME_FORMAT",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProposalError {
    #[error("Proposal not found: {0}")]
    NotFound(String),
    #[error("Proposal {id} is {from}, cannot become {to}")]
    InvalidTransition {
        id: ProposalId,
        from: ProposalStatus,
        to: ProposalStatus,
    },
}

impl ProposalError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ProposalError::NotFound(_) => "PROPOSAL_NOT_FOUND",
            ProposalError::InvalidTransition { .. } => "INVALID_PROPOSAL_TRANSITION",
        }
    }
}

/// Everything the scheduler surfaces to its caller. All other failure modes are absorbed into
/// a degraded but successful result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Proposal(#[from] ProposalError),
}

impl SchedulingError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SchedulingError::Validation(e) => e.error_code(),
            SchedulingError::Proposal(e) => e.error_code(),
        }
    }
}
