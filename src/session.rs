//! Specialist session record (`specialist-session.json`).
//!
//! A specialist round drafts decisions before they are flushed into the
//! decision store, so an interrupted round can be picked up again.

use crate::atomic::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftDecision {
    pub prefix: String,
    pub text: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistSession {
    pub specialist: String,
    pub focus_area: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub draft_decisions: Vec<DraftDecision>,
    #[serde(default)]
    pub last_gate: Option<String>,
    #[serde(default)]
    pub pending_questions: Vec<String>,
}

impl SpecialistSession {
    pub fn new(specialist: &str, focus_area: &str) -> Self {
        Self {
            specialist: specialist.to_string(),
            focus_area: focus_area.to_string(),
            ..Default::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).context("Failed to read specialist session")?;
        let session = serde_json::from_str(&content).context("Failed to parse specialist session")?;
        Ok(Some(session))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize specialist session")?;
        write_atomic(path, json).context("Failed to write specialist session")
    }
}
