//! Verdict vocabulary and normalization.
//!
//! Each reviewer namespace spells its outcomes differently:
//!
//! | Namespace   | Proceed            | FixCycle        | Escalate      |
//! |-------------|--------------------|-----------------|---------------|
//! | REVIEW      | `PASS`             | `CONCERN`       | `BLOCK`       |
//! | SEC         | `PASS`             | `CONCERN`       | `BLOCK`       |
//! | QA          | `QA_PASS`          | `QA_CONCERN`    | `QA_BLOCK`    |
//! | STYLE_AUDIT | `STYLE_PASS`       | `STYLE_CONCERN` | `STYLE_BLOCK` |
//! | MILESTONE   | `MILESTONE_COMPLETE` | `FIXABLE`     | `BLOCKED`     |
//!
//! Parsing also accepts the forms agents actually print (`REVIEW_PASS`,
//! `SEC_BLOCK`, `MILESTONE_FIXABLE`, `VERDICT: PASS`), case-insensitively.
//! A spelling from another namespace is rejected.

use crate::errors::GateError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical gate outcome, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Canonical {
    #[default]
    Proceed,
    FixCycle,
    Escalate,
}

impl Canonical {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "PROCEED",
            Self::FixCycle => "FIX_CYCLE",
            Self::Escalate => "ESCALATE",
        }
    }
}

impl fmt::Display for Canonical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reviewer namespace a verdict was emitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Namespace {
    Review,
    Sec,
    Qa,
    StyleAudit,
    Milestone,
}

impl Namespace {
    pub fn all() -> &'static [Namespace] {
        &[
            Namespace::Review,
            Namespace::Sec,
            Namespace::Qa,
            Namespace::StyleAudit,
            Namespace::Milestone,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "REVIEW",
            Self::Sec => "SEC",
            Self::Qa => "QA",
            Self::StyleAudit => "STYLE_AUDIT",
            Self::Milestone => "MILESTONE",
        }
    }

    /// This namespace's spelling of a canonical outcome.
    pub fn spelling(&self, outcome: Canonical) -> &'static str {
        use Canonical::*;
        match (self, outcome) {
            (Self::Review | Self::Sec, Proceed) => "PASS",
            (Self::Review | Self::Sec, FixCycle) => "CONCERN",
            (Self::Review | Self::Sec, Escalate) => "BLOCK",
            (Self::Qa, Proceed) => "QA_PASS",
            (Self::Qa, FixCycle) => "QA_CONCERN",
            (Self::Qa, Escalate) => "QA_BLOCK",
            (Self::StyleAudit, Proceed) => "STYLE_PASS",
            (Self::StyleAudit, FixCycle) => "STYLE_CONCERN",
            (Self::StyleAudit, Escalate) => "STYLE_BLOCK",
            (Self::Milestone, Proceed) => "MILESTONE_COMPLETE",
            (Self::Milestone, FixCycle) => "FIXABLE",
            (Self::Milestone, Escalate) => "BLOCKED",
        }
    }

    /// Normalize a raw outcome string emitted under this namespace.
    pub fn parse_outcome(&self, raw: &str) -> Result<Canonical, GateError> {
        let mut token = raw.trim().to_uppercase().replace(['-', ' '], "_");
        if let Some(rest) = token.strip_prefix("VERDICT:") {
            token = rest.trim_start_matches('_').trim().to_string();
        }
        let own_prefix = format!("{}_", self.as_str());

        [Canonical::Proceed, Canonical::FixCycle, Canonical::Escalate]
            .into_iter()
            .find(|outcome| {
                let spelling = self.spelling(*outcome);
                token == spelling
                    || token
                        .strip_prefix(&own_prefix)
                        .is_some_and(|rest| rest == spelling)
            })
            .ok_or_else(|| GateError::UnknownOutcome {
                namespace: self.as_str().to_string(),
                outcome: raw.trim().to_string(),
            })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Namespace {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace(['-', ' '], "_").as_str() {
            "REVIEW" => Ok(Self::Review),
            "SEC" | "SECURITY" => Ok(Self::Sec),
            "QA" => Ok(Self::Qa),
            "STYLE_AUDIT" | "STYLE" => Ok(Self::StyleAudit),
            "MILESTONE" => Ok(Self::Milestone),
            _ => Err(GateError::UnknownNamespace(s.to_string())),
        }
    }
}

/// Finding severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CRITICAL" => Ok(Self::Critical),
            "HIGH" | "MAJOR" => Ok(Self::High),
            "MEDIUM" | "MINOR" => Ok(Self::Medium),
            "LOW" | "INFO" => Ok(Self::Low),
            _ => Err(GateError::UnknownSeverity(s.to_string())),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = GateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A single issue reported by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    #[serde(default)]
    pub location: String,
    pub description: String,
}

impl Finding {
    pub fn new(severity: Severity, location: &str, description: &str) -> Self {
        Self {
            severity,
            location: location.to_string(),
            description: description.to_string(),
        }
    }
}

/// A normalized reviewer verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub namespace: Namespace,
    /// Namespace spelling of the outcome
    pub outcome: String,
    pub canonical: Canonical,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub evidence_complete: bool,
    pub agent: String,
}

impl Verdict {
    /// Parse a raw outcome under `namespace`.
    pub fn new(namespace: Namespace, outcome: &str, agent: &str) -> Result<Self, GateError> {
        let canonical = namespace.parse_outcome(outcome)?;
        Ok(Self {
            namespace,
            outcome: namespace.spelling(canonical).to_string(),
            canonical,
            findings: Vec::new(),
            evidence_complete: true,
            agent: agent.to_string(),
        })
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_evidence_complete(mut self, complete: bool) -> Self {
        self.evidence_complete = complete;
        self
    }
}

/// Verdict as printed by an agent, before normalization.
///
/// `namespace` may be omitted; the gate kind supplies a default.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVerdict {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(alias = "verdict")]
    pub outcome: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default = "default_evidence_complete")]
    pub evidence_complete: bool,
    #[serde(default = "default_agent")]
    pub agent: String,
}

fn default_evidence_complete() -> bool {
    true
}

fn default_agent() -> String {
    "unknown".to_string()
}

impl RawVerdict {
    pub fn normalize(self, default_namespace: Namespace) -> Result<Verdict, GateError> {
        let namespace = match self.namespace {
            Some(ref ns) => ns.parse()?,
            None => default_namespace,
        };
        Ok(Verdict::new(namespace, &self.outcome, &self.agent)?
            .with_findings(self.findings)
            .with_evidence_complete(self.evidence_complete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_spellings_parse() {
        for ns in Namespace::all() {
            for outcome in [Canonical::Proceed, Canonical::FixCycle, Canonical::Escalate] {
                assert_eq!(ns.parse_outcome(ns.spelling(outcome)).unwrap(), outcome);
            }
        }
    }

    #[test]
    fn test_prefixed_forms() {
        assert_eq!(
            Namespace::Review.parse_outcome("REVIEW_PASS").unwrap(),
            Canonical::Proceed
        );
        assert_eq!(
            Namespace::Sec.parse_outcome("sec_block").unwrap(),
            Canonical::Escalate
        );
        assert_eq!(
            Namespace::Milestone.parse_outcome("MILESTONE_FIXABLE").unwrap(),
            Canonical::FixCycle
        );
        assert_eq!(
            Namespace::Review.parse_outcome("VERDICT: PASS").unwrap(),
            Canonical::Proceed
        );
        assert_eq!(
            Namespace::Qa.parse_outcome("Verdict: qa_concern").unwrap(),
            Canonical::FixCycle
        );
    }

    #[test]
    fn test_foreign_spelling_rejected() {
        assert!(Namespace::Qa.parse_outcome("PASS").is_err());
        assert!(Namespace::Review.parse_outcome("QA_PASS").is_err());
        assert!(Namespace::Review.parse_outcome("FIXABLE").is_err());
        assert!(Namespace::Review.parse_outcome("SEC_PASS").is_err());
        assert!(matches!(
            Namespace::Milestone.parse_outcome("PASS"),
            Err(GateError::UnknownOutcome { .. })
        ));
    }

    #[test]
    fn test_severity_vocabulary() {
        assert_eq!("major".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!("MINOR".parse::<Severity>().unwrap(), Severity::Medium);
        assert_eq!("Info".parse::<Severity>().unwrap(), Severity::Low);
        assert!("urgent".parse::<Severity>().is_err());
        assert!(Severity::Critical < Severity::Low);
    }

    #[test]
    fn test_raw_verdict_json() {
        let raw: RawVerdict = serde_json::from_str(
            r#"{"verdict": "REVIEW_CONCERN", "agent": "reviewer",
                "findings": [{"severity": "MAJOR", "location": "src/a.rs:3", "description": "unwrap"}]}"#,
        )
        .unwrap();
        let verdict = raw.normalize(Namespace::Review).unwrap();
        assert_eq!(verdict.canonical, Canonical::FixCycle);
        assert_eq!(verdict.outcome, "CONCERN");
        assert_eq!(verdict.findings[0].severity, Severity::High);
        assert!(verdict.evidence_complete);
    }

    #[test]
    fn test_raw_verdict_explicit_namespace() {
        let raw: RawVerdict =
            serde_json::from_str(r#"{"namespace": "sec", "outcome": "BLOCK"}"#).unwrap();
        let verdict = raw.normalize(Namespace::Review).unwrap();
        assert_eq!(verdict.namespace, Namespace::Sec);
        assert_eq!(verdict.canonical, Canonical::Escalate);
    }
}
