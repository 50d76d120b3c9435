//! Concurrent reviewer fan-out.
//!
//! Every expected reviewer runs concurrently and the gate waits for all of
//! them. A reviewer that errors or overruns the budget becomes a missing slot
//! rather than a verdict, which the aggregator treats as incomplete evidence.

use super::controller::GateId;
use super::verdict::{Canonical, Finding, Namespace, RawVerdict, Severity, Verdict};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Something that can review a gate and return a verdict.
#[async_trait]
pub trait Reviewer: Send + Sync {
    fn name(&self) -> &str;

    async fn review(&self, gate: &GateId) -> Result<Verdict>;
}

/// Verdicts plus the names of reviewers that produced none.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub verdicts: Vec<Verdict>,
    pub missing: Vec<String>,
}

/// Run every reviewer concurrently under a shared time budget.
pub async fn collect(reviewers: &[Box<dyn Reviewer>], gate: &GateId, budget: Duration) -> Collected {
    let futures: Vec<_> = reviewers
        .iter()
        .map(|reviewer| async move {
            let outcome = tokio::time::timeout(budget, reviewer.review(gate)).await;
            (reviewer.name(), outcome)
        })
        .collect();

    let mut collected = Collected::default();
    for (name, outcome) in join_all(futures).await {
        match outcome {
            Ok(Ok(verdict)) => {
                debug!(reviewer = name, verdict = %verdict.canonical, "Reviewer answered");
                collected.verdicts.push(verdict);
            }
            Ok(Err(e)) => {
                warn!(reviewer = name, error = %e, "Reviewer failed");
                collected.missing.push(name.to_string());
            }
            Err(_) => {
                warn!(reviewer = name, budget_secs = budget.as_secs_f64(), "Reviewer timed out");
                collected.missing.push(name.to_string());
            }
        }
    }
    collected
}

/// A reviewer backed by an external command (a lint, type or security tool,
/// or an agent wrapper).
///
/// A verdict JSON object on stdout is used as-is. Otherwise the exit status
/// picks the namespace's spelling: 0 is PROCEED, 1 is FIX_CYCLE, and any
/// other status (or death by signal) is ESCALATE. A failing status carries
/// the stderr tail as a finding.
pub struct CommandReviewer {
    name: String,
    command: String,
    namespace: Namespace,
}

impl CommandReviewer {
    pub fn new(command: &str, namespace: Namespace) -> Self {
        let name = command
            .split_whitespace()
            .next()
            .unwrap_or(command)
            .to_string();
        Self {
            name,
            command: command.to_string(),
            namespace,
        }
    }
}

#[async_trait]
impl Reviewer for CommandReviewer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn review(&self, gate: &GateId) -> Result<Verdict> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("WAYPOINT_GATE", gate.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run reviewer command: {}", self.command))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Ok(raw) = serde_json::from_str::<RawVerdict>(stdout.trim()) {
            let mut raw = raw;
            if raw.agent == "unknown" {
                raw.agent = self.name.clone();
            }
            return Ok(raw.normalize(self.namespace)?);
        }

        let canonical = exit_outcome(output.status.code());
        let mut verdict = Verdict::new(self.namespace, self.namespace.spelling(canonical), &self.name)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let description = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
            let severity = match canonical {
                Canonical::Escalate => Severity::High,
                _ => Severity::Medium,
            };
            verdict = verdict.with_findings(vec![Finding::new(
                severity,
                &self.name,
                &format!("exited with {}: {}", output.status, description),
            )]);
        }
        Ok(verdict)
    }
}

fn exit_outcome(code: Option<i32>) -> Canonical {
    match code {
        Some(0) => Canonical::Proceed,
        Some(1) => Canonical::FixCycle,
        _ => Canonical::Escalate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedReviewer {
        name: String,
        outcome: &'static str,
        delay: Duration,
        fail: bool,
    }

    impl FixedReviewer {
        fn boxed(name: &str, outcome: &'static str, delay_ms: u64, fail: bool) -> Box<dyn Reviewer> {
            Box::new(Self {
                name: name.to_string(),
                outcome,
                delay: Duration::from_millis(delay_ms),
                fail,
            })
        }
    }

    #[async_trait]
    impl Reviewer for FixedReviewer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn review(&self, _gate: &GateId) -> Result<Verdict> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("reviewer crashed");
            }
            Ok(Verdict::new(Namespace::Review, self.outcome, &self.name)?)
        }
    }

    #[tokio::test]
    async fn test_collect_all_answer() {
        let reviewers = vec![
            FixedReviewer::boxed("a", "PASS", 0, false),
            FixedReviewer::boxed("b", "CONCERN", 10, false),
        ];
        let gate = GateId::Task("T1".into());
        let collected = collect(&reviewers, &gate, Duration::from_secs(5)).await;
        assert_eq!(collected.verdicts.len(), 2);
        assert!(collected.missing.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_and_failure_become_missing() {
        let reviewers = vec![
            FixedReviewer::boxed("fast", "PASS", 0, false),
            FixedReviewer::boxed("slow", "PASS", 10_000, false),
            FixedReviewer::boxed("broken", "PASS", 0, true),
        ];
        let gate = GateId::Task("T1".into());
        let collected = collect(&reviewers, &gate, Duration::from_millis(100)).await;
        assert_eq!(collected.verdicts.len(), 1);
        assert_eq!(collected.missing, vec!["slow", "broken"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_reviewer_exit_status() {
        let gate = GateId::Task("T1".into());
        let pass = CommandReviewer::new("true", Namespace::Qa);
        assert_eq!(pass.review(&gate).await.unwrap().outcome, "QA_PASS");

        let fail = CommandReviewer::new("echo boom >&2; exit 1", Namespace::Review);
        let verdict = fail.review(&gate).await.unwrap();
        assert_eq!(verdict.canonical, Canonical::FixCycle);
        assert!(verdict.findings[0].description.contains("boom"));

        let crash = CommandReviewer::new("exit 3", Namespace::Sec);
        let verdict = crash.review(&gate).await.unwrap();
        assert_eq!(verdict.canonical, Canonical::Escalate);
        assert_eq!(verdict.outcome, "BLOCK");
        assert_eq!(verdict.findings[0].severity, Severity::High);
    }

    #[test]
    fn test_exit_outcome_mapping() {
        assert_eq!(exit_outcome(Some(0)), Canonical::Proceed);
        assert_eq!(exit_outcome(Some(1)), Canonical::FixCycle);
        assert_eq!(exit_outcome(Some(2)), Canonical::Escalate);
        assert_eq!(exit_outcome(None), Canonical::Escalate);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_reviewer_json_verdict() {
        let gate = GateId::Milestone("M1".into());
        let reviewer = CommandReviewer::new(
            r#"echo '{"outcome": "MILESTONE_FIXABLE", "evidence_complete": false}'"#,
            Namespace::Milestone,
        );
        let verdict = reviewer.review(&gate).await.unwrap();
        assert_eq!(verdict.canonical, Canonical::FixCycle);
        assert!(!verdict.evidence_complete);
        assert_eq!(verdict.agent, "echo");
    }
}
