//! Pipeline phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The forward sequence of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Define,
    SpecialistRounds,
    Synthesize,
    Decompose,
    ExecuteTasks,
    MilestoneReview,
    QaPass,
    Done,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Discovery,
            Stage::Define,
            Stage::SpecialistRounds,
            Stage::Synthesize,
            Stage::Decompose,
            Stage::ExecuteTasks,
            Stage::MilestoneReview,
            Stage::QaPass,
            Stage::Done,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Define => "define",
            Stage::SpecialistRounds => "specialist_rounds",
            Stage::Synthesize => "synthesize",
            Stage::Decompose => "decompose",
            Stage::ExecuteTasks => "execute_tasks",
            Stage::MilestoneReview => "milestone_review",
            Stage::QaPass => "qa_pass",
            Stage::Done => "done",
        }
    }

    /// Stages entered by `advance`. Execution stages move only through gates.
    pub fn manual_successor(&self) -> Option<Stage> {
        match self {
            Stage::Discovery => Some(Stage::Define),
            Stage::Define => Some(Stage::SpecialistRounds),
            Stage::SpecialistRounds => Some(Stage::Synthesize),
            Stage::Synthesize => Some(Stage::Decompose),
            Stage::Decompose => Some(Stage::ExecuteTasks),
            Stage::ExecuteTasks | Stage::MilestoneReview | Stage::QaPass | Stage::Done => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("Unknown pipeline stage '{}'", s))
    }
}

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Active { stage: Stage },
    /// Halted on an escalation; `resume` re-enters `resume_to`
    BlockedOnUser { resume_to: Stage },
    Aborted,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Active {
            stage: Stage::Discovery,
        }
    }
}

impl Phase {
    pub fn at(stage: Stage) -> Self {
        Phase::Active { stage }
    }

    /// The active stage, if the run is not halted.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Phase::Active { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn is(&self, stage: Stage) -> bool {
        self.stage() == Some(stage)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Aborted
                | Phase::Active {
                    stage: Stage::Done
                }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Active { stage } => stage.as_str(),
            Phase::BlockedOnUser { .. } => "blocked_on_user",
            Phase::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::BlockedOnUser { resume_to } => {
                write!(f, "blocked_on_user (resume to {})", resume_to)
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_successors() {
        let mut stage = Stage::Discovery;
        let mut visited = vec![stage];
        while let Some(next) = stage.manual_successor() {
            visited.push(next);
            stage = next;
        }
        assert_eq!(stage, Stage::ExecuteTasks);
        assert_eq!(visited.len(), 6);
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("qa_pass".parse::<Stage>().unwrap(), Stage::QaPass);
        assert!("shipping".parse::<Stage>().is_err());
    }

    #[test]
    fn test_phase_serde() {
        let phase = Phase::BlockedOnUser {
            resume_to: Stage::MilestoneReview,
        };
        let json = serde_json::to_string(&phase).unwrap();
        assert_eq!(json, r#"{"phase":"blocked_on_user","resume_to":"milestone_review"}"#);
        assert_eq!(serde_json::from_str::<Phase>(&json).unwrap(), phase);
        assert!(Phase::Aborted.is_terminal());
        assert!(!phase.is_terminal());
    }
}
