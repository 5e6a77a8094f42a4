//! Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::{Identifier, StudentId};

/// Result type alias for enrollment operations
pub type Result<T> = std::result::Result<T, EnrollError>;

/// Which half of the flow failed.
///
/// This is the only distinction callers are expected to branch on; the
/// variants of [`EnrollError`] exist for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Registration,
    Enrollment,
}

impl FailureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureStage::Registration => "registration",
            FailureStage::Enrollment => "enrollment",
        }
    }
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enrollment error types
#[derive(Error, Debug)]
pub enum EnrollError {
    /// Neither the total-count endpoint nor the listing fallback answered
    #[error("LMS unavailable: {0}")]
    UpstreamUnavailable(String),

    /// LMS refused the registration for a reason other than a collision
    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    /// Every candidate identifier collided
    #[error("Registration retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    /// Student exists in the LMS but is not enrolled in the purchased courses
    #[error("Enrollment failed for student {student_id}: {reason}")]
    EnrollmentFailed {
        student_id: StudentId,
        identifier: Option<Identifier>,
        reason: String,
    },

    /// Unit token could not be obtained
    #[error("Unit token unavailable: {0}")]
    Token(String),

    /// Name, contact or courses missing
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport or parse failure talking to the LMS
    #[error("LMS error: {0}")]
    Lms(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EnrollError {
    /// Stage at which the flow stopped
    pub fn stage(&self) -> FailureStage {
        match self {
            EnrollError::EnrollmentFailed { .. } => FailureStage::Enrollment,
            _ => FailureStage::Registration,
        }
    }

    /// Generic message safe to show to the buyer.
    ///
    /// Never includes attempt counts or upstream response bodies.
    pub fn user_message(&self) -> &'static str {
        match self {
            EnrollError::InvalidRequest(_) => {
                "Name, contact and at least one course are required."
            }
            EnrollError::Config(_) => "Service configuration error.",
            _ => match self.stage() {
                FailureStage::Registration => {
                    "Could not complete enrollment: student registration failed."
                }
                FailureStage::Enrollment => {
                    "Could not complete enrollment: course enrollment failed."
                }
            },
        }
    }
}
