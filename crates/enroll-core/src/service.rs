//! Enrollment Service
//!
//! The single entry point the checkout layer calls: token, registration,
//! course enrollment. A failed enrollment is not rolled back; the student
//! stays registered and [`EnrollmentService::retry_enrollment`] can finish
//! the job later.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::allocator::{CriticalSection, MutexSection, SequenceAllocator};
use crate::error::{EnrollError, Result};
use crate::identifier::{Identifier, StudentId, UnitToken};
use crate::lms::{EnrollmentReply, LmsClient, StudentProfile};
use crate::registration::{
    RegisteredStudent, RegistrationConfig, RegistrationDriver, RegistrationObserver,
    TracingObserver,
};

/// Registered and enrolled student
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrolledStudent {
    pub student_id: StudentId,
    pub identifier: Identifier,
    pub email: String,
    pub course_ids: Vec<u64>,
    pub enrolled_at: DateTime<Utc>,
}

/// Registration plus enrollment against one LMS unit
pub struct EnrollmentService {
    lms: Arc<dyn LmsClient>,
    driver: RegistrationDriver,
}

impl EnrollmentService {
    pub fn builder(lms: Arc<dyn LmsClient>) -> EnrollmentServiceBuilder {
        EnrollmentServiceBuilder::new(lms)
    }

    /// Service with default configuration and a process-wide lock
    pub fn with_defaults(lms: Arc<dyn LmsClient>) -> Self {
        Self::builder(lms).build()
    }

    pub fn lms(&self) -> &Arc<dyn LmsClient> {
        &self.lms
    }

    pub fn login_email(&self, identifier: &Identifier) -> String {
        self.driver.login_email(identifier)
    }

    /// Register a buyer and enroll them in `course_ids`
    pub async fn register_student(
        &self,
        name: &str,
        contact: &str,
        course_ids: &[u64],
    ) -> Result<EnrolledStudent> {
        let profile = StudentProfile::new(name, contact)?;
        if course_ids.is_empty() {
            return Err(EnrollError::InvalidRequest("no courses selected".into()));
        }

        let token = self.fresh_token().await?;
        let student = self.driver.register(&profile, &token).await?;

        self.enroll(&student, course_ids, &token).await?;

        tracing::info!(
            student_id = %student.student_id,
            identifier = %student.identifier,
            courses = ?course_ids,
            "Student enrolled"
        );

        Ok(EnrolledStudent {
            student_id: student.student_id,
            identifier: student.identifier,
            email: student.email,
            course_ids: course_ids.to_vec(),
            enrolled_at: Utc::now(),
        })
    }

    /// Enroll an already registered student again, for students left
    /// registered but unenrolled by an earlier failure
    pub async fn retry_enrollment(&self, student_id: &StudentId, course_ids: &[u64]) -> Result<()> {
        if course_ids.is_empty() {
            return Err(EnrollError::InvalidRequest("no courses selected".into()));
        }

        let token = self.fresh_token().await?;
        self.send_enrollment(student_id, None, course_ids, &token)
            .await?;

        tracing::info!(student_id = %student_id, courses = ?course_ids, "Enrollment retried");
        Ok(())
    }

    /// Unit tokens expire quickly; every flow fetches its own
    async fn fresh_token(&self) -> Result<UnitToken> {
        self.lms.unit_token().await.map_err(|e| match e {
            EnrollError::Token(_) => e,
            other => EnrollError::Token(other.to_string()),
        })
    }

    async fn enroll(
        &self,
        student: &RegisteredStudent,
        course_ids: &[u64],
        token: &UnitToken,
    ) -> Result<()> {
        self.send_enrollment(
            &student.student_id,
            Some(&student.identifier),
            course_ids,
            token,
        )
        .await
        .inspect_err(|e| {
            tracing::error!(
                student_id = %student.student_id,
                identifier = %student.identifier,
                error = %e,
                "Student registered but not enrolled"
            );
        })
    }

    async fn send_enrollment(
        &self,
        student_id: &StudentId,
        identifier: Option<&Identifier>,
        course_ids: &[u64],
        token: &UnitToken,
    ) -> Result<()> {
        let failed = |reason: String| EnrollError::EnrollmentFailed {
            student_id: student_id.clone(),
            identifier: identifier.cloned(),
            reason,
        };

        match self.lms.enroll(student_id, course_ids, token).await {
            Ok(EnrollmentReply::Enrolled) => Ok(()),
            Ok(EnrollmentReply::Refused(reason)) => Err(failed(reason)),
            Err(e) => Err(failed(e.to_string())),
        }
    }
}

/// Builder for [`EnrollmentService`]
pub struct EnrollmentServiceBuilder {
    lms: Arc<dyn LmsClient>,
    config: RegistrationConfig,
    section: Arc<dyn CriticalSection>,
    observer: Arc<dyn RegistrationObserver>,
}

impl EnrollmentServiceBuilder {
    pub fn new(lms: Arc<dyn LmsClient>) -> Self {
        Self {
            lms,
            config: RegistrationConfig::default(),
            section: Arc::new(MutexSection::new()),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn config(mut self, config: RegistrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Critical section guarding count-and-propose
    pub fn section(mut self, section: Arc<dyn CriticalSection>) -> Self {
        self.section = section;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RegistrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> EnrollmentService {
        let allocator =
            SequenceAllocator::new(self.lms.clone(), self.config.prefix.clone(), self.section);
        let driver = RegistrationDriver::new(self.lms.clone(), allocator, &self.config)
            .with_observer(self.observer);

        EnrollmentService {
            lms: self.lms,
            driver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::NoopSection;
    use crate::error::FailureStage;
    use crate::lms::{MockLms, ScriptedReply};

    fn service(lms: Arc<MockLms>) -> EnrollmentService {
        EnrollmentService::builder(lms)
            .section(Arc::new(NoopSection))
            .build()
    }

    #[tokio::test]
    async fn test_register_and_enroll() {
        let lms = Arc::new(
            MockLms::new()
                .with_student_count(41)
                .with_script([ScriptedReply::collision()]),
        );
        let student = service(lms.clone())
            .register_student("Maria Silva", "61999990000", &[12, 15])
            .await
            .unwrap();

        assert_eq!(student.identifier.as_str(), "20254158043");
        assert_eq!(student.course_ids, vec![12, 15]);
        assert_eq!(
            service(lms.clone()).login_email(&student.identifier),
            student.email
        );
        assert_eq!(
            lms.enrollments(),
            vec![(student.student_id.clone(), vec![12, 15])]
        );
    }

    #[tokio::test]
    async fn test_enrollment_failure_keeps_registration() {
        let lms = Arc::new(MockLms::new().refusing_enrollment("curso inexistente"));
        let err = service(lms.clone())
            .register_student("Maria", "61999990000", &[99])
            .await
            .unwrap_err();

        assert_eq!(err.stage(), FailureStage::Enrollment);
        match err {
            EnrollError::EnrollmentFailed {
                student_id,
                identifier,
                ..
            } => {
                let created = lms.created();
                assert_eq!(created.len(), 1);
                assert_eq!(created[0].0, student_id);
                assert_eq!(identifier, Some(created[0].1.clone()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_token_failure_is_registration_stage() {
        let lms = Arc::new(MockLms::new().failing_token());
        let err = service(lms.clone())
            .register_student("Maria", "61999990000", &[1])
            .await
            .unwrap_err();

        assert!(matches!(err, EnrollError::Token(_)));
        assert_eq!(err.stage(), FailureStage::Registration);
        assert!(lms.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_courses() {
        let lms = Arc::new(MockLms::new());
        let err = service(lms.clone())
            .register_student("Maria", "61999990000", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, EnrollError::InvalidRequest(_)));
        assert_eq!(lms.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_retry_enrollment() {
        let lms = Arc::new(MockLms::new());
        let svc = service(lms.clone());

        svc.retry_enrollment(&StudentId::new("1000"), &[3])
            .await
            .unwrap();
        assert_eq!(lms.enrollments(), vec![(StudentId::new("1000"), vec![3])]);
    }
}
