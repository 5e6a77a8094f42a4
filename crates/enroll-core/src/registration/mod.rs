//! Registration Retry Driver
//!
//! Creates a student in the LMS, walking candidate identifiers until one is
//! accepted. The loop is an explicit state machine:
//!
//! ```text
//!              collision (i + 1 < max)
//!            ┌──────────────────────┐
//!            ▼                      │
//!   ┌────────────────┐   created   ┌┴─────────────┐
//!   │ Attempting(i)  │────────────▶│  Succeeded   │
//!   └──────┬───┬─────┘             └──────────────┘
//!          │   │ collision (i + 1 == max)
//!          │   └─────────────────▶ Exhausted
//!          │ rejected / transport / count unavailable
//!          └─────────────────────▶ Aborted
//! ```
//!
//! Only a collision continues the loop. Every transition is reported to a
//! [`RegistrationObserver`].

mod classify;

pub use classify::{CollisionMatcher, DEFAULT_COLLISION_PHRASES};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::allocator::SequenceAllocator;
use crate::error::{EnrollError, Result};
use crate::identifier::{Identifier, IdentifierPrefix, StudentId, UnitToken};
use crate::lms::{LmsClient, RegistrationForm, RegistrationReply, StudentProfile};

/// Attempt ceiling used by the production deployment
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Domain used for generated login e-mails
pub const DEFAULT_EMAIL_DOMAIN: &str = "cedbrasilia.com.br";

/// Registration settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationConfig {
    /// Organizational code every identifier starts with
    pub prefix: IdentifierPrefix,

    /// Domain for `{identifier}@{domain}` login e-mails
    pub email_domain: String,

    /// Maximum candidates tried per registration (at least 1)
    pub max_attempts: u32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            prefix: IdentifierPrefix::default(),
            email_domain: DEFAULT_EMAIL_DOMAIN.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RegistrationConfig {
    /// Read `CPF_PREFIX`, `LMS_EMAIL_DOMAIN` and `LMS_MAX_ATTEMPTS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, test map, ...)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let prefix = match lookup("CPF_PREFIX") {
            Some(value) => IdentifierPrefix::new(value)?,
            None => defaults.prefix,
        };

        let email_domain = lookup("LMS_EMAIL_DOMAIN")
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or(defaults.email_domain);

        let max_attempts = match lookup("LMS_MAX_ATTEMPTS") {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    EnrollError::Config(format!(
                        "LMS_MAX_ATTEMPTS must be a positive integer, got '{value}'"
                    ))
                })?,
            None => defaults.max_attempts,
        };

        Ok(Self {
            prefix,
            email_domain,
            max_attempts,
        })
    }
}

/// Student confirmed by the LMS
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredStudent {
    pub student_id: StudentId,
    pub identifier: Identifier,
    pub email: String,
}

/// Why the driver stopped without success
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// Student count could not be read
    CountUnavailable(String),

    /// LMS refused the candidate for a non-collision reason
    Rejected(String),

    /// Network error, timeout or unreadable answer
    Transport(String),
}

/// Driver state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptState {
    /// About to try the candidate at this offset
    Attempting(u32),

    Succeeded(RegisteredStudent),

    /// Every allowed candidate collided
    Exhausted { attempts: u32 },

    Aborted { attempt: u32, reason: AbortReason },
}

impl From<AbortReason> for EnrollError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::CountUnavailable(msg) => EnrollError::UpstreamUnavailable(msg),
            AbortReason::Rejected(msg) | AbortReason::Transport(msg) => {
                EnrollError::RegistrationRejected(msg)
            }
        }
    }
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptState::Attempting(_))
    }
}

/// Hook notified on every state transition
pub trait RegistrationObserver: Send + Sync {
    fn on_transition(&self, from: &AttemptState, to: &AttemptState);
}

/// Logs transitions through `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl RegistrationObserver for TracingObserver {
    fn on_transition(&self, from: &AttemptState, to: &AttemptState) {
        match to {
            AttemptState::Attempting(next) => {
                tracing::info!(from = ?from, attempt = next + 1, "Identifier in use, retrying");
            }
            AttemptState::Succeeded(student) => {
                tracing::info!(
                    student_id = %student.student_id,
                    identifier = %student.identifier,
                    "Student registered"
                );
            }
            AttemptState::Exhausted { attempts } => {
                tracing::error!(attempts, "Every candidate identifier was in use");
            }
            AttemptState::Aborted { attempt, reason } => {
                tracing::error!(attempt = attempt + 1, reason = ?reason, "Registration aborted");
            }
        }
    }
}

/// Registration retry driver
pub struct RegistrationDriver {
    lms: Arc<dyn LmsClient>,
    allocator: SequenceAllocator,
    email_domain: String,
    max_attempts: u32,
    observer: Arc<dyn RegistrationObserver>,
}

impl RegistrationDriver {
    pub fn new(
        lms: Arc<dyn LmsClient>,
        allocator: SequenceAllocator,
        config: &RegistrationConfig,
    ) -> Self {
        Self {
            lms,
            allocator,
            email_domain: config.email_domain.clone(),
            max_attempts: config.max_attempts.max(1),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Login e-mail the LMS account was created with
    pub fn login_email(&self, identifier: &Identifier) -> String {
        identifier.email(&self.email_domain)
    }

    /// Replace the transition observer
    pub fn with_observer(mut self, observer: Arc<dyn RegistrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Register a student, retrying only on identifier collisions
    pub async fn register(
        &self,
        profile: &StudentProfile,
        token: &UnitToken,
    ) -> Result<RegisteredStudent> {
        let mut state = AttemptState::Attempting(0);

        loop {
            state = match state {
                AttemptState::Attempting(attempt) => {
                    let next = self.step(attempt, profile, token).await;
                    self.observer
                        .on_transition(&AttemptState::Attempting(attempt), &next);
                    next
                }
                AttemptState::Succeeded(student) => return Ok(student),
                AttemptState::Exhausted { attempts } => {
                    return Err(EnrollError::RetriesExhausted(attempts));
                }
                AttemptState::Aborted { reason, .. } => return Err(reason.into()),
            };
        }
    }

    /// One transition out of `Attempting(attempt)`
    async fn step(
        &self,
        attempt: u32,
        profile: &StudentProfile,
        token: &UnitToken,
    ) -> AttemptState {
        let candidate = match self.allocator.next_candidate(attempt).await {
            Ok(candidate) => candidate,
            Err(e) => {
                return AttemptState::Aborted {
                    attempt,
                    reason: AbortReason::CountUnavailable(e.to_string()),
                };
            }
        };

        let form = RegistrationForm::new(profile, &candidate, &self.email_domain);
        tracing::debug!(
            attempt = attempt + 1,
            max = self.max_attempts,
            candidate = %candidate,
            "Submitting registration"
        );

        match self.lms.create_student(&form, token).await {
            Ok(RegistrationReply::Created(student_id)) => AttemptState::Succeeded(RegisteredStudent {
                student_id,
                identifier: candidate,
                email: form.email,
            }),
            Ok(RegistrationReply::Collision) if attempt + 1 < self.max_attempts => {
                AttemptState::Attempting(attempt + 1)
            }
            Ok(RegistrationReply::Collision) => AttemptState::Exhausted {
                attempts: attempt + 1,
            },
            Ok(RegistrationReply::Rejected(reason)) => AttemptState::Aborted {
                attempt,
                reason: AbortReason::Rejected(reason),
            },
            Err(e) => AttemptState::Aborted {
                attempt,
                reason: AbortReason::Transport(e.to_string()),
            },
        }
    }
}
