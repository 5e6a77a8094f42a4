//! Identifiers exchanged with the LMS.

use serde::{Deserialize, Serialize};

use crate::error::{EnrollError, Result};

/// Organizational code used by the production unit
pub const DEFAULT_PREFIX: &str = "20254158";

/// Width of the zero-padded sequence suffix
pub const SUFFIX_WIDTH: usize = 3;

/// Organizational code every identifier starts with
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentifierPrefix(String);

impl IdentifierPrefix {
    /// Parse a prefix; only ASCII digits are accepted
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EnrollError::Config(format!(
                "identifier prefix must be numeric, got '{value}'"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IdentifierPrefix {
    fn default() -> Self {
        Self(DEFAULT_PREFIX.to_string())
    }
}

impl TryFrom<String> for IdentifierPrefix {
    type Error = EnrollError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<IdentifierPrefix> for String {
    fn from(prefix: IdentifierPrefix) -> Self {
        prefix.0
    }
}

impl std::fmt::Display for IdentifierPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candidate or confirmed student login (also used as the CPF document field)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// `prefix + zero_pad(sequence, 3)`.
    ///
    /// Sequences of 1000 and above keep all their digits, so the result is
    /// longer than the nominal width.
    pub fn compose(prefix: &IdentifierPrefix, sequence: u64) -> Self {
        Self(format!("{prefix}{sequence:0width$}", width = SUFFIX_WIDTH))
    }

    /// Wrap an identifier received from elsewhere (LMS listing, storage)
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the suffix still fits the fixed three-digit width
    pub fn is_nominal_width(&self, prefix: &IdentifierPrefix) -> bool {
        self.0.len() == prefix.as_str().len() + SUFFIX_WIDTH
    }

    /// Login e-mail derived from the identifier
    pub fn email(&self, domain: &str) -> String {
        format!("{}@{}", self.0, domain)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Student id assigned by the LMS
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short-lived unit token required by the LMS write endpoints
#[derive(Clone, PartialEq, Eq)]
pub struct UnitToken(String);

impl UnitToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for UnitToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UnitToken(***)")
    }
}
