//! Pipeline status mirror (`pipeline-status.json`).
//!
//! Written after every mutating command. Besides the per-phase overview read
//! by dashboards and hooks, it carries what a later invocation needs to resume
//! the run: the exact phase, the milestone under review and the gate fix-cycle
//! counters.

use super::phase::{Phase, Stage};
use crate::atomic::write_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    Active,
    Complete,
    Skipped,
    Blocked,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub name: String,
    pub status: PhaseState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub run_id: Uuid,
    pub pipeline_type: String,
    pub current_phase: String,
    pub phase: Phase,
    pub phases: Vec<PhaseEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_milestone: Option<String>,
    #[serde(default)]
    pub fix_cycles: BTreeMap<String, u32>,
    /// Last stage reached before an abort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<Stage>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineStatus {
    pub fn new(pipeline_type: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_type: pipeline_type.to_string(),
            current_phase: Phase::default().name().to_string(),
            phase: Phase::default(),
            phases: phase_entries(Phase::default(), None, false),
            active_task: None,
            active_milestone: None,
            fix_cycles: BTreeMap::new(),
            last_stage: None,
            updated_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).context("Failed to read pipeline status")?;
        let status = serde_json::from_str(&content).context("Failed to parse pipeline status")?;
        Ok(Some(status))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize pipeline status")?;
        write_atomic(path, json).context("Failed to write pipeline status")
    }
}

/// Per-stage overview for a phase.
pub fn phase_entries(phase: Phase, last_stage: Option<Stage>, qa_enabled: bool) -> Vec<PhaseEntry> {
    let (current, current_state) = match phase {
        Phase::Active { stage: Stage::Done } => (Stage::Done, PhaseState::Complete),
        Phase::Active { stage } => (stage, PhaseState::Active),
        Phase::BlockedOnUser { resume_to } => (resume_to, PhaseState::Blocked),
        Phase::Aborted => (last_stage.unwrap_or(Stage::Discovery), PhaseState::Aborted),
    };

    Stage::all()
        .iter()
        .map(|&stage| {
            let status = if stage == Stage::QaPass && !qa_enabled {
                PhaseState::Skipped
            } else if stage < current {
                PhaseState::Complete
            } else if stage == current {
                current_state
            } else {
                PhaseState::Pending
            };
            PhaseEntry {
                name: stage.as_str().to_string(),
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn status_of<'a>(entries: &'a [PhaseEntry], name: &str) -> &'a PhaseState {
        &entries.iter().find(|e| e.name == name).unwrap().status
    }

    #[test]
    fn test_entries_mid_run() {
        let entries = phase_entries(Phase::at(Stage::ExecuteTasks), None, false);
        assert_eq!(entries.len(), 9);
        assert_eq!(*status_of(&entries, "decompose"), PhaseState::Complete);
        assert_eq!(*status_of(&entries, "execute_tasks"), PhaseState::Active);
        assert_eq!(*status_of(&entries, "milestone_review"), PhaseState::Pending);
        assert_eq!(*status_of(&entries, "qa_pass"), PhaseState::Skipped);
    }

    #[test]
    fn test_entries_blocked_and_aborted() {
        let blocked = phase_entries(
            Phase::BlockedOnUser {
                resume_to: Stage::MilestoneReview,
            },
            None,
            true,
        );
        assert_eq!(*status_of(&blocked, "milestone_review"), PhaseState::Blocked);
        assert_eq!(*status_of(&blocked, "qa_pass"), PhaseState::Pending);

        let aborted = phase_entries(Phase::Aborted, Some(Stage::Synthesize), false);
        assert_eq!(*status_of(&aborted, "synthesize"), PhaseState::Aborted);
        assert_eq!(*status_of(&aborted, "define"), PhaseState::Complete);
    }

    #[test]
    fn test_done_marks_everything_complete() {
        let entries = phase_entries(Phase::at(Stage::Done), None, true);
        assert!(entries.iter().all(|e| e.status == PhaseState::Complete));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline-status.json");
        let mut status = PipelineStatus::new("default");
        status.fix_cycles.insert("task:T1".into(), 2);
        status.save(&path).unwrap();
        assert_eq!(PipelineStatus::load(&path).unwrap().unwrap(), status);
    }
}
