//! Verdict aggregation.
//!
//! The most severe canonical outcome wins, independent of input order.
//! Incomplete evidence and missing reviewer slots can only make the result
//! stricter: they downgrade a PROCEED to FIX_CYCLE.

use super::verdict::{Canonical, Finding, Severity, Verdict};
use serde::{Deserialize, Serialize};

/// Finding counts per canonical severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// Combined result of every verdict for one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub outcome: Canonical,
    /// Most severe outcome among the verdicts themselves
    pub strictest_verdict: Option<Canonical>,
    pub verdict_count: usize,
    /// Reviewers that did not answer within budget
    pub missing: Vec<String>,
    /// Agents that reported incomplete evidence
    pub incomplete: Vec<String>,
    pub findings: Vec<Finding>,
    pub severity_counts: SeverityCounts,
}

impl Aggregate {
    /// Whether PROCEED was withheld only because of missing or partial evidence.
    pub fn downgraded(&self) -> bool {
        self.strictest_verdict == Some(Canonical::Proceed) && self.outcome != Canonical::Proceed
    }

    /// One-line explanation suitable for logs and escalation messages.
    pub fn reason(&self) -> String {
        if self.verdict_count == 0 && self.missing.is_empty() {
            return "no verdicts received".to_string();
        }
        let mut parts = vec![format!(
            "{} verdict(s), strictest {}",
            self.verdict_count,
            self.strictest_verdict
                .map_or("none".to_string(), |c| c.to_string())
        )];
        if !self.missing.is_empty() {
            parts.push(format!("missing: {}", self.missing.join(", ")));
        }
        if !self.incomplete.is_empty() {
            parts.push(format!("incomplete evidence: {}", self.incomplete.join(", ")));
        }
        if self.severity_counts.total() > 0 {
            let c = &self.severity_counts;
            parts.push(format!(
                "findings: {} critical, {} high, {} medium, {} low",
                c.critical, c.high, c.medium, c.low
            ));
        }
        parts.join("; ")
    }
}

/// Aggregate verdicts for one gate. `missing` names reviewers that timed out
/// or failed.
pub fn aggregate(verdicts: &[Verdict], missing: &[String]) -> Aggregate {
    let strictest_verdict = verdicts.iter().map(|v| v.canonical).max();
    let incomplete: Vec<String> = verdicts
        .iter()
        .filter(|v| !v.evidence_complete)
        .map(|v| v.agent.clone())
        .collect();

    let outcome = match strictest_verdict {
        None => Canonical::FixCycle,
        Some(Canonical::Proceed) if !incomplete.is_empty() || !missing.is_empty() => {
            Canonical::FixCycle
        }
        Some(outcome) => outcome,
    };

    let mut severity_counts = SeverityCounts::default();
    let findings: Vec<Finding> = verdicts
        .iter()
        .flat_map(|v| v.findings.iter().cloned())
        .collect();
    for finding in &findings {
        severity_counts.add(finding.severity);
    }

    Aggregate {
        outcome,
        strictest_verdict,
        verdict_count: verdicts.len(),
        missing: missing.to_vec(),
        incomplete,
        findings,
        severity_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::verdict::Namespace;

    fn verdict(ns: Namespace, outcome: &str) -> Verdict {
        Verdict::new(ns, outcome, "agent").unwrap()
    }

    #[test]
    fn test_most_severe_wins() {
        let verdicts = vec![
            verdict(Namespace::Review, "PASS"),
            verdict(Namespace::Sec, "BLOCK"),
            verdict(Namespace::Qa, "QA_CONCERN"),
        ];
        assert_eq!(aggregate(&verdicts, &[]).outcome, Canonical::Escalate);

        let mut reversed = verdicts.clone();
        reversed.reverse();
        assert_eq!(aggregate(&reversed, &[]).outcome, Canonical::Escalate);
    }

    #[test]
    fn test_all_pass_proceeds() {
        let verdicts = vec![
            verdict(Namespace::Review, "PASS"),
            verdict(Namespace::StyleAudit, "STYLE_PASS"),
        ];
        let agg = aggregate(&verdicts, &[]);
        assert_eq!(agg.outcome, Canonical::Proceed);
        assert!(!agg.downgraded());
    }

    #[test]
    fn test_empty_is_fix_cycle() {
        let agg = aggregate(&[], &[]);
        assert_eq!(agg.outcome, Canonical::FixCycle);
        assert_eq!(agg.reason(), "no verdicts received");
    }

    #[test]
    fn test_incomplete_evidence_downgrades_pass() {
        let verdicts = vec![
            verdict(Namespace::Review, "PASS"),
            verdict(Namespace::Sec, "PASS").with_evidence_complete(false),
        ];
        let agg = aggregate(&verdicts, &[]);
        assert_eq!(agg.outcome, Canonical::FixCycle);
        assert!(agg.downgraded());
        assert!(agg.reason().contains("incomplete evidence"));
    }

    #[test]
    fn test_missing_slot_downgrades_pass() {
        let verdicts = vec![verdict(Namespace::Review, "PASS")];
        let agg = aggregate(&verdicts, &["security".to_string()]);
        assert_eq!(agg.outcome, Canonical::FixCycle);
        assert!(agg.reason().contains("missing: security"));
    }

    #[test]
    fn test_incomplete_evidence_never_softens_block() {
        let verdicts = vec![verdict(Namespace::Sec, "BLOCK").with_evidence_complete(false)];
        assert_eq!(aggregate(&verdicts, &[]).outcome, Canonical::Escalate);
    }

    #[test]
    fn test_findings_concatenated_and_counted() {
        let verdicts = vec![
            verdict(Namespace::Review, "CONCERN").with_findings(vec![
                Finding::new(Severity::High, "src/a.rs", "panics"),
                Finding::new(Severity::Low, "src/a.rs", "naming"),
            ]),
            verdict(Namespace::Sec, "PASS")
                .with_findings(vec![Finding::new(Severity::Critical, "src/b.rs", "secret")]),
        ];
        let agg = aggregate(&verdicts, &[]);
        assert_eq!(agg.findings.len(), 3);
        assert_eq!(agg.findings[2].description, "secret");
        assert_eq!(agg.severity_counts.critical, 1);
        assert_eq!(agg.severity_counts.high, 1);
        assert_eq!(agg.severity_counts.total(), 3);
    }
}
