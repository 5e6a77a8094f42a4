//! Collision classification for LMS registration answers.
//!
//! The LMS reports a taken CPF/login only through free text in its `info`
//! field. That text is matched here and nowhere else.

use serde::{Deserialize, Serialize};

use crate::lms::RegistrationReply;

/// Phrases the LMS uses for a taken identifier (Portuguese and English builds)
pub const DEFAULT_COLLISION_PHRASES: [&str; 2] = ["já está em uso", "already in use"];

/// Case-insensitive substring matcher for collision answers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionMatcher {
    phrases: Vec<String>,
}

impl Default for CollisionMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_COLLISION_PHRASES)
    }
}

impl CollisionMatcher {
    /// Build from phrases; blank entries are ignored
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// Parse a comma-separated list; falls back to the default when empty
    pub fn from_list(list: &str) -> Self {
        let matcher = Self::new(list.split(','));
        if matcher.phrases.is_empty() {
            Self::default()
        } else {
            matcher
        }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Whether the `info` text reports the identifier as already taken
    pub fn is_collision(&self, info: &str) -> bool {
        let info = info.to_lowercase();
        self.phrases.iter().any(|p| info.contains(p.as_str()))
    }

    /// Translate a failed registration's `info` text into a reply
    pub fn classify(&self, info: &str) -> RegistrationReply {
        if self.is_collision(info) {
            RegistrationReply::Collision
        } else {
            RegistrationReply::Rejected(info.trim().to_string())
        }
    }
}
