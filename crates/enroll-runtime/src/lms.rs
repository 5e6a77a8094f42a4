//! HTTP LMS Client
//!
//! Implementation of `LmsClient` for the unit's REST API. Every response
//! uses the same envelope: `{"status": "true" | "false", "data": ..., "info": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use enroll_core::{
    CollisionMatcher, EnrollError, EnrollmentReply, Identifier, LmsClient, RegistrationForm,
    RegistrationReply, Result, StudentId, StudentRecord, UnitToken,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

/// LMS client configuration
#[derive(Clone, Debug)]
pub struct LmsConfig {
    /// API root, e.g. `https://meuappdecursos.com.br/ws/v2`
    pub base_url: String,

    /// Pre-encoded Basic credentials
    pub basic_auth: String,

    /// Organizational unit all queries are scoped to
    pub unit_id: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Collision phrases for registration answers
    pub collision: CollisionMatcher,
}

impl LmsConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

    pub fn new(
        base_url: impl Into<String>,
        basic_auth: impl Into<String>,
        unit_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            basic_auth: basic_auth.into(),
            unit_id: unit_id.into(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            collision: CollisionMatcher::default(),
        }
    }

    /// Read `OM_BASE`, `BASIC_B64`, `UNIDADE_ID`, `LMS_TIMEOUT_SECS` and
    /// `LMS_COLLISION_PHRASES`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| EnrollError::Config(format!("{key} not set")))
        };

        let mut config = Self::new(
            required("OM_BASE")?,
            required("BASIC_B64")?,
            required("UNIDADE_ID")?,
        );

        if let Some(timeout) = lookup("LMS_TIMEOUT_SECS") {
            config.timeout_secs = timeout
                .trim()
                .parse()
                .ok()
                .filter(|secs: &u64| *secs > 0)
                .ok_or_else(|| {
                    EnrollError::Config(format!(
                        "LMS_TIMEOUT_SECS must be a positive number, got '{timeout}'"
                    ))
                })?;
        }
        if let Some(phrases) = lookup("LMS_COLLISION_PHRASES") {
            config.collision = CollisionMatcher::from_list(&phrases);
        }

        Ok(config)
    }
}

/// `status` arrives as `"true"` on most endpoints and as a bool on some
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusFlag {
    Bool(bool),
    Text(String),
}

impl StatusFlag {
    fn is_true(&self) -> bool {
        match self {
            StatusFlag::Bool(b) => *b,
            StatusFlag::Text(s) => s.trim().eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<StatusFlag>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    info: Option<String>,
}

impl Envelope {
    fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| EnrollError::Lms(format!("malformed LMS response: {e}")))
    }

    fn is_ok(&self) -> bool {
        self.status.as_ref().is_some_and(StatusFlag::is_true)
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(name))
    }

    /// `info` text, or the HTTP status when the LMS gave none
    fn reason(&self, http: StatusCode) -> String {
        self.info
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("HTTP {http}"), str::to_string)
    }
}

/// Number or numeric string
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Ids come back as numbers or strings depending on the endpoint
fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn interpret_token(http: StatusCode, body: &str) -> Result<UnitToken> {
    let envelope = Envelope::parse(body)?;
    if http.is_success() && envelope.is_ok() {
        if let Some(token) = envelope.field("token").and_then(Value::as_str) {
            return Ok(UnitToken::new(token));
        }
    }
    Err(EnrollError::Token(envelope.reason(http)))
}

fn interpret_total(http: StatusCode, body: &str) -> Result<i64> {
    let envelope = Envelope::parse(body)?;
    if !(http.is_success() && envelope.is_ok()) {
        return Err(EnrollError::Lms(format!("total endpoint: {}", envelope.reason(http))));
    }
    envelope
        .field("total")
        .and_then(as_integer)
        .ok_or_else(|| EnrollError::Lms("total endpoint: unparseable total".into()))
}

/// Only the row count matters to the allocator, so rows are read leniently
/// and never rejected for missing or oddly typed fields
fn interpret_listing(http: StatusCode, body: &str) -> Result<Vec<StudentRecord>> {
    let envelope = Envelope::parse(body)?;
    if !(http.is_success() && envelope.is_ok()) {
        return Err(EnrollError::Lms(format!("listing endpoint: {}", envelope.reason(http))));
    }

    let rows = match &envelope.data {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(rows)) => rows,
        Some(_) => return Err(EnrollError::Lms("listing endpoint: data is not a list".into())),
    };

    Ok(rows
        .iter()
        .map(|row| StudentRecord {
            id: StudentId::new(row.get("id").and_then(as_id).unwrap_or_default()),
            identifier: row.get("doc_cpf").and_then(as_id).map(Identifier::from_raw),
            name: row.get("nome").and_then(Value::as_str).map(str::to_string),
        })
        .collect())
}

fn interpret_registration(
    http: StatusCode,
    body: &str,
    matcher: &CollisionMatcher,
) -> Result<RegistrationReply> {
    let envelope = Envelope::parse(body)?;

    if http.is_success() && envelope.is_ok() {
        return envelope
            .field("id")
            .and_then(as_id)
            .map(|id| RegistrationReply::Created(StudentId::new(id)))
            .ok_or_else(|| EnrollError::Lms("registration succeeded without a student id".into()));
    }

    // Collisions are reported with a non-success status too
    let info = envelope.info.as_deref().unwrap_or_default();
    match matcher.classify(info) {
        RegistrationReply::Rejected(_) => Ok(RegistrationReply::Rejected(envelope.reason(http))),
        reply => Ok(reply),
    }
}

fn interpret_enrollment(http: StatusCode, body: &str) -> Result<EnrollmentReply> {
    let envelope = Envelope::parse(body)?;
    if http.is_success() && envelope.is_ok() {
        Ok(EnrollmentReply::Enrolled)
    } else {
        Ok(EnrollmentReply::Refused(envelope.reason(http)))
    }
}

/// LMS client over HTTP
pub struct HttpLmsClient {
    http: reqwest::Client,
    config: LmsConfig,
}

impl HttpLmsClient {
    /// Create from configuration
    pub fn from_config(config: LmsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnrollError::Config(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(LmsConfig::from_env()?)
    }

    pub fn config(&self) -> &LmsConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self) -> String {
        format!("Basic {}", self.config.basic_auth)
    }

    /// Send and return status plus raw body
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String)> {
        let response = request
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .send()
            .await
            .map_err(|e| EnrollError::Lms(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EnrollError::Lms(e.to_string()))?;

        Ok((status, body))
    }
}

#[async_trait]
impl LmsClient for HttpLmsClient {
    async fn unit_token(&self) -> Result<UnitToken> {
        let url = self.url(&format!("unidades/token/{}", self.config.unit_id));
        let (status, body) = self
            .send(self.http.get(url))
            .await
            .map_err(|e| EnrollError::Token(e.to_string()))?;

        let token = interpret_token(status, &body);
        match &token {
            Ok(_) => tracing::debug!("Unit token refreshed"),
            Err(e) => tracing::warn!(status = %status, error = %e, "Unit token request failed"),
        }
        token
    }

    async fn total_students(&self) -> Result<i64> {
        let url = self.url(&format!("alunos/total/{}", self.config.unit_id));
        let (status, body) = self.send(self.http.get(url)).await?;
        interpret_total(status, &body)
    }

    async fn list_students(&self, prefix: &str) -> Result<Vec<StudentRecord>> {
        let request = self.http.get(self.url("alunos")).query(&[
            ("unidade_id", self.config.unit_id.as_str()),
            ("cpf_like", prefix),
        ]);
        let (status, body) = self.send(request).await?;
        interpret_listing(status, &body)
    }

    async fn create_student(
        &self,
        form: &RegistrationForm,
        token: &UnitToken,
    ) -> Result<RegistrationReply> {
        let mut fields = form.fields();
        fields.insert(0, ("token", token.as_str().to_string()));

        let (status, body) = self
            .send(self.http.post(self.url("alunos")).form(&fields))
            .await?;
        tracing::debug!(status = %status, body = %body, identifier = %form.identifier, "Registration response");

        interpret_registration(status, &body, &self.config.collision)
    }

    async fn enroll(
        &self,
        student_id: &StudentId,
        course_ids: &[u64],
        token: &UnitToken,
    ) -> Result<EnrollmentReply> {
        let courses = course_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let fields = [("token", token.as_str()), ("cursos", courses.as_str())];

        let url = self.url(&format!("alunos/matricula/{student_id}"));
        let (status, body) = self.send(self.http.post(url).form(&fields)).await?;
        tracing::debug!(status = %status, body = %body, student_id = %student_id, "Enrollment response");

        interpret_enrollment(status, &body)
    }

    async fn health_check(&self) -> bool {
        match self.total_students().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("LMS health check failed: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        "HttpLms"
    }
}
