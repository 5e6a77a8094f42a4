//! LMS Collaborator Strategy Pattern
//!
//! Defines the operations this crate needs from the learning-management
//! system. The HTTP implementation lives in `enroll-runtime`; [`MockLms`]
//! keeps an in-memory roster for tests and demo deployments.

mod mock;

pub use mock::{MockLms, ScriptedReply};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EnrollError, Result};
use crate::identifier::{Identifier, StudentId, UnitToken};

/// Buyer data collected at checkout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub name: String,
    pub contact: String,
}

impl StudentProfile {
    /// Trim and validate the buyer fields
    pub fn new(name: &str, contact: &str) -> Result<Self> {
        let name = name.trim();
        let contact = contact.trim();

        if name.is_empty() {
            return Err(EnrollError::InvalidRequest("name is empty".into()));
        }
        if contact.is_empty() {
            return Err(EnrollError::InvalidRequest("contact is empty".into()));
        }

        Ok(Self {
            name: name.to_string(),
            contact: contact.to_string(),
        })
    }
}

/// Fields submitted to the LMS student-creation endpoint.
///
/// Demographic fields the checkout never collects are filled with fixed
/// placeholders accepted by the LMS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub contact: String,
    pub identifier: Identifier,
}

impl RegistrationForm {
    pub const BIRTH_DATE: &'static str = "2000-01-01";
    pub const RG: &'static str = "000000000";
    pub const COUNTRY: &'static str = "Brasil";
    pub const STATE: &'static str = "DF";
    pub const CITY: &'static str = "Brasília";
    pub const ADDRESS: &'static str = "Não informado";
    pub const DISTRICT: &'static str = "Centro";
    pub const POSTAL_CODE: &'static str = "70000-000";

    pub fn new(profile: &StudentProfile, identifier: &Identifier, email_domain: &str) -> Self {
        Self {
            name: profile.name.clone(),
            email: identifier.email(email_domain),
            contact: profile.contact.clone(),
            identifier: identifier.clone(),
        }
    }

    /// Form-encoded field pairs, in the LMS field vocabulary
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("nome", self.name.clone()),
            ("email", self.email.clone()),
            ("whatsapp", self.contact.clone()),
            ("fone", self.contact.clone()),
            ("celular", self.contact.clone()),
            ("data_nascimento", Self::BIRTH_DATE.into()),
            ("doc_cpf", self.identifier.to_string()),
            ("doc_rg", Self::RG.into()),
            ("pais", Self::COUNTRY.into()),
            ("uf", Self::STATE.into()),
            ("cidade", Self::CITY.into()),
            ("endereco", Self::ADDRESS.into()),
            ("complemento", String::new()),
            ("bairro", Self::DISTRICT.into()),
            ("cep", Self::POSTAL_CODE.into()),
        ]
    }
}

/// A student row from the LMS listing endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: StudentId,
    #[serde(default)]
    pub identifier: Option<Identifier>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Parsed outcome of a student-creation call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationReply {
    /// Student created
    Created(StudentId),

    /// The submitted identifier is already assigned to another record
    Collision,

    /// Any other refusal; retrying with a new identifier will not help
    Rejected(String),
}

/// Parsed outcome of an enrollment call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrollmentReply {
    Enrolled,
    Refused(String),
}

/// LMS client trait (Strategy pattern)
///
/// Transport failures and timeouts are returned as `Err`; answers the LMS
/// actually gave are returned as replies.
#[async_trait]
pub trait LmsClient: Send + Sync {
    /// Fetch a fresh unit token for write operations
    async fn unit_token(&self) -> Result<UnitToken>;

    /// Total registered students for the unit.
    ///
    /// Signed so a nonsensical negative answer can be detected by callers.
    async fn total_students(&self) -> Result<i64>;

    /// Students of the unit whose identifier starts with `prefix`
    async fn list_students(&self, prefix: &str) -> Result<Vec<StudentRecord>>;

    /// Create a student
    async fn create_student(
        &self,
        form: &RegistrationForm,
        token: &UnitToken,
    ) -> Result<RegistrationReply>;

    /// Enroll an existing student in the given courses
    async fn enroll(
        &self,
        student_id: &StudentId,
        course_ids: &[u64],
        token: &UnitToken,
    ) -> Result<EnrollmentReply>;

    /// Check if the LMS answers
    async fn health_check(&self) -> bool;

    /// Client name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_validation() {
        let profile = StudentProfile::new("  Maria Silva ", " 61999990000").unwrap();
        assert_eq!(profile.name, "Maria Silva");
        assert_eq!(profile.contact, "61999990000");

        assert!(StudentProfile::new("", "61999990000").is_err());
        assert!(StudentProfile::new("Maria", "   ").is_err());
    }

    #[test]
    fn test_form_fields() {
        let profile = StudentProfile::new("Maria", "61999990000").unwrap();
        let id = Identifier::from_raw("20254158042");
        let form = RegistrationForm::new(&profile, &id, "cedbrasilia.com.br");
        let fields = form.fields();

        let get = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("doc_cpf"), Some("20254158042"));
        assert_eq!(get("email"), Some("20254158042@cedbrasilia.com.br"));
        assert_eq!(get("celular"), Some("61999990000"));
        assert_eq!(get("cep"), Some("70000-000"));
        assert_eq!(get("complemento"), Some(""));
    }
}
