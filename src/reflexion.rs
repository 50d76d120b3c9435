//! Tagged lessons learned (`reflexion/index.json`).
//!
//! After an escalation or a painful fix cycle, agents record what happened
//! and the lesson. Later tasks look lessons up by tag.

use crate::atomic::write_atomic;
use crate::gate::Severity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub tags: BTreeSet<String>,
    pub severity: Severity,
    pub what_happened: String,
    pub lesson: String,
}

/// Lesson as submitted, before an id is assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLesson {
    #[serde(default)]
    pub tags: Vec<String>,
    pub severity: Severity,
    pub what_happened: String,
    pub lesson: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflexionIndex {
    entries: Vec<Lesson>,
}

impl ReflexionIndex {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).context("Failed to read reflexion index")?;
        serde_json::from_str(&content).context("Failed to parse reflexion index")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create reflexion directory")?;
        }
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize reflexion index")?;
        write_atomic(path, json).context("Failed to write reflexion index")
    }

    /// Record a lesson. Tags are lowercased.
    pub fn add(&mut self, lesson: NewLesson) -> &Lesson {
        let id = format!("L-{:03}", self.entries.len() + 1);
        self.entries.push(Lesson {
            id,
            tags: lesson
                .tags
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            severity: lesson.severity,
            what_happened: lesson.what_happened,
            lesson: lesson.lesson,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Lessons sharing any of `tags` (all lessons when empty), most severe first.
    pub fn search(&self, tags: &[String]) -> Vec<&Lesson> {
        let wanted: BTreeSet<String> = tags.iter().map(|t| t.trim().to_lowercase()).collect();
        let mut found: Vec<&Lesson> = self
            .entries
            .iter()
            .filter(|l| wanted.is_empty() || !l.tags.is_disjoint(&wanted))
            .collect();
        found.sort_by_key(|l| l.severity);
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
