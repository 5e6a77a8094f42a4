//! Mock LMS Client
//!
//! In-memory roster for tests and demo mode. Identifiers already present
//! are rejected the way the real LMS rejects them, with a free-text `info`
//! that goes through the same [`CollisionMatcher`].

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{EnrollmentReply, LmsClient, RegistrationForm, RegistrationReply, StudentRecord};
use crate::error::{EnrollError, Result};
use crate::identifier::{Identifier, StudentId, UnitToken};
use crate::registration::CollisionMatcher;

/// Text the LMS returns when a CPF/login is taken
pub const COLLISION_INFO: &str = "Este CPF já está em uso.";

/// Forced answer for the next student-creation call
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    /// Accept regardless of the roster
    Accept,

    /// Answer with this `info` text; classified by the collision matcher
    Info(String),

    /// Fail at the transport level
    Transport(String),
}

impl ScriptedReply {
    /// The canonical "already in use" answer
    pub fn collision() -> Self {
        ScriptedReply::Info(COLLISION_INFO.into())
    }
}

#[derive(Default)]
struct MockState {
    /// Students that existed before the mock was created
    preexisting: u64,
    taken: BTreeSet<Identifier>,
    created: Vec<(StudentId, Identifier)>,
    script: VecDeque<ScriptedReply>,
    total_override: Option<i64>,
    total_fails: bool,
    listing_fails: bool,
    token_fails: bool,
    enroll_refusal: Option<String>,
    next_id: u64,
    submitted: Vec<Identifier>,
    enrollments: Vec<(StudentId, Vec<u64>)>,
    total_calls: usize,
    listing_calls: usize,
}

impl MockState {
    fn count(&self) -> u64 {
        self.preexisting + self.created.len() as u64
    }
}

/// Mock LMS client with an in-memory roster
pub struct MockLms {
    state: Mutex<MockState>,
    matcher: CollisionMatcher,
}

impl Default for MockLms {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLms {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 1000,
                ..MockState::default()
            }),
            matcher: CollisionMatcher::default(),
        }
    }

    /// Start with `count` students already registered
    pub fn with_student_count(self, count: u64) -> Self {
        self.state().preexisting = count;
        self
    }

    /// Mark identifiers as taken without changing the reported count,
    /// as happens when another process registers between queries
    pub fn with_taken<I, S>(self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .taken
            .extend(identifiers.into_iter().map(Identifier::from_raw));
        self
    }

    /// Queue forced answers for the next registration calls
    pub fn with_script(self, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        self.state().script.extend(replies);
        self
    }

    /// Make the total-count endpoint report this value
    pub fn with_total_override(self, total: i64) -> Self {
        self.state().total_override = Some(total);
        self
    }

    /// Make the total-count endpoint fail
    pub fn failing_total(self) -> Self {
        self.state().total_fails = true;
        self
    }

    /// Make the listing endpoint fail
    pub fn failing_listing(self) -> Self {
        self.state().listing_fails = true;
        self
    }

    /// Make token issuance fail
    pub fn failing_token(self) -> Self {
        self.state().token_fails = true;
        self
    }

    /// Refuse every enrollment with this reason
    pub fn refusing_enrollment(self, reason: impl Into<String>) -> Self {
        self.state().enroll_refusal = Some(reason.into());
        self
    }

    /// Stop refusing enrollments (the LMS recovered)
    pub fn accept_enrollments(&self) {
        self.state().enroll_refusal = None;
    }

    pub fn with_matcher(mut self, matcher: CollisionMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Identifiers submitted to `create_student`, in call order
    pub fn submitted(&self) -> Vec<Identifier> {
        self.state().submitted.clone()
    }

    /// Students created through this mock
    pub fn created(&self) -> Vec<(StudentId, Identifier)> {
        self.state().created.clone()
    }

    /// Enrollment calls that succeeded
    pub fn enrollments(&self) -> Vec<(StudentId, Vec<u64>)> {
        self.state().enrollments.clone()
    }

    pub fn total_calls(&self) -> usize {
        self.state().total_calls
    }

    pub fn listing_calls(&self) -> usize {
        self.state().listing_calls
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LmsClient for MockLms {
    async fn unit_token(&self) -> Result<UnitToken> {
        if self.state().token_fails {
            return Err(EnrollError::Token("mock token endpoint down".into()));
        }
        Ok(UnitToken::new("mock-token"))
    }

    async fn total_students(&self) -> Result<i64> {
        let mut state = self.state();
        state.total_calls += 1;

        if state.total_fails {
            return Err(EnrollError::Lms("total endpoint returned 500".into()));
        }
        if let Some(total) = state.total_override {
            return Ok(total);
        }
        i64::try_from(state.count()).map_err(|e| EnrollError::Lms(e.to_string()))
    }

    async fn list_students(&self, prefix: &str) -> Result<Vec<StudentRecord>> {
        let mut state = self.state();
        state.listing_calls += 1;

        if state.listing_fails {
            return Err(EnrollError::Lms("listing endpoint returned 500".into()));
        }

        let preexisting = (0..state.preexisting).map(|n| StudentRecord {
            id: StudentId::new(format!("pre-{n}")),
            identifier: None,
            name: None,
        });
        let created = state
            .created
            .iter()
            .filter(|(_, identifier)| identifier.as_str().starts_with(prefix))
            .map(|(id, identifier)| StudentRecord {
                id: id.clone(),
                identifier: Some(identifier.clone()),
                name: None,
            });

        Ok(preexisting.chain(created).collect())
    }

    async fn create_student(
        &self,
        form: &RegistrationForm,
        _token: &UnitToken,
    ) -> Result<RegistrationReply> {
        let mut state = self.state();
        state.submitted.push(form.identifier.clone());

        let forced = state.script.pop_front();
        let info = match forced {
            Some(ScriptedReply::Transport(reason)) => return Err(EnrollError::Lms(reason)),
            Some(ScriptedReply::Info(info)) => Some(info),
            Some(ScriptedReply::Accept) => None,
            None if state.taken.contains(&form.identifier) => Some(COLLISION_INFO.to_string()),
            None => None,
        };

        if let Some(info) = info {
            return Ok(self.matcher.classify(&info));
        }

        let id = StudentId::new(state.next_id.to_string());
        state.next_id += 1;
        state.taken.insert(form.identifier.clone());
        state.created.push((id.clone(), form.identifier.clone()));

        Ok(RegistrationReply::Created(id))
    }

    async fn enroll(
        &self,
        student_id: &StudentId,
        course_ids: &[u64],
        _token: &UnitToken,
    ) -> Result<EnrollmentReply> {
        let mut state = self.state();
        if let Some(reason) = &state.enroll_refusal {
            return Ok(EnrollmentReply::Refused(reason.clone()));
        }
        state
            .enrollments
            .push((student_id.clone(), course_ids.to_vec()));
        Ok(EnrollmentReply::Enrolled)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "MockLms"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lms::StudentProfile;

    fn form(identifier: &str) -> RegistrationForm {
        let profile = StudentProfile::new("Maria", "61999990000").unwrap();
        RegistrationForm::new(&profile, &Identifier::from_raw(identifier), "example.com")
    }

    #[tokio::test]
    async fn test_mock_roster() {
        let lms = MockLms::new().with_student_count(41);
        let token = lms.unit_token().await.unwrap();

        assert_eq!(lms.total_students().await.unwrap(), 41);

        let reply = lms.create_student(&form("20254158042"), &token).await.unwrap();
        assert!(matches!(reply, RegistrationReply::Created(_)));
        assert_eq!(lms.total_students().await.unwrap(), 42);

        let again = lms.create_student(&form("20254158042"), &token).await.unwrap();
        assert_eq!(again, RegistrationReply::Collision);
    }

    #[tokio::test]
    async fn test_scripted_replies() {
        let lms = MockLms::new().with_script([
            ScriptedReply::Info("CEP inválido".into()),
            ScriptedReply::Transport("timeout".into()),
        ]);
        let token = lms.unit_token().await.unwrap();

        let first = lms.create_student(&form("20254158001"), &token).await.unwrap();
        assert_eq!(first, RegistrationReply::Rejected("CEP inválido".into()));

        assert!(lms.create_student(&form("20254158001"), &token).await.is_err());
        assert_eq!(lms.submitted().len(), 2);
    }
}
