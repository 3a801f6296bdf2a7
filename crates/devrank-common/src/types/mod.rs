//! Common types used across devrank

use serde::{Deserialize, Serialize};

use crate::error::{DevrankError, Result};

/// Longest login the upstream platform accepts.
pub const MAX_SUBJECT_KEY_LEN: usize = 39;

/// Identity key of a harvested subject (an upstream login).
///
/// Logins compare case-insensitively upstream, so the key is stored
/// lower-cased. Construction validates the upstream login grammar: 1-39
/// ASCII alphanumerics or single hyphens, never leading or trailing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectKey(String);

impl SubjectKey {
    /// Parse and normalize a raw login
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let invalid = |reason| DevrankError::InvalidSubjectKey {
            key: raw.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if trimmed.len() > MAX_SUBJECT_KEY_LEN {
            return Err(invalid("must be at most 39 characters"));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid("may only contain alphanumerics and hyphens"));
        }
        if trimmed.starts_with('-') || trimmed.ends_with('-') {
            return Err(invalid("must not start or end with a hyphen"));
        }
        if trimmed.contains("--") {
            return Err(invalid("must not contain consecutive hyphens"));
        }

        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SubjectKey {
    type Err = DevrankError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SubjectKey {
    type Error = DevrankError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SubjectKey> for String {
    fn from(key: SubjectKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SubjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Kind of harvest to run for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// First harvest of an unknown subject
    Full,
    /// Re-harvest of a subject whose data went stale
    Refresh,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Full => "full",
            JobKind::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = DevrankError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(JobKind::Full),
            "refresh" => Ok(JobKind::Refresh),
            other => Err(DevrankError::InvalidJobKind(other.to_string())),
        }
    }
}

/// A validated request to harvest one subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HarvestRequest {
    pub subject: SubjectKey,
    pub kind: JobKind,
}

impl HarvestRequest {
    pub fn new(subject: SubjectKey, kind: JobKind) -> Self {
        Self { subject, kind }
    }

    /// Parse both parts from raw input
    pub fn parse(subject: &str, kind: &str) -> Result<Self> {
        Ok(Self::new(SubjectKey::parse(subject)?, kind.parse()?))
    }

    /// Deduplication key stored with the queued job
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.kind, self.subject)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let key = SubjectKey::parse("  Octo-Cat ").unwrap();
        assert_eq!(key.as_str(), "octo-cat");
    }

    #[test]
    fn test_parse_rejects_bad_logins() {
        let too_long = "x".repeat(40);
        for raw in ["", "-abc", "abc-", "a--b", "a_b", "a b", too_long.as_str()] {
            assert!(SubjectKey::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let key: SubjectKey = serde_json::from_str("\"TorValds\"").unwrap();
        assert_eq!(key.as_str(), "torvalds");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"torvalds\"");
        assert!(serde_json::from_str::<SubjectKey>("\"--\"").is_err());
    }

    #[test]
    fn test_job_kind_parse() {
        assert_eq!("Full".parse::<JobKind>().unwrap(), JobKind::Full);
        assert_eq!(" refresh".parse::<JobKind>().unwrap(), JobKind::Refresh);
        assert!(matches!(
            "partial".parse::<JobKind>(),
            Err(DevrankError::InvalidJobKind(ref k)) if k == "partial"
        ));
    }

    #[test]
    fn test_idempotency_key() {
        let request = HarvestRequest::parse("Octocat", "refresh").unwrap();
        assert_eq!(request.idempotency_key(), "refresh:octocat");
    }

    proptest! {
        #[test]
        fn prop_valid_logins_parse(raw in "[A-Za-z0-9]{1,10}(-[A-Za-z0-9]{1,10}){0,2}") {
            let key = SubjectKey::parse(&raw).unwrap();
            prop_assert_eq!(key.as_str(), raw.to_ascii_lowercase());
        }
    }
}
