//! Task and milestone definitions.

use crate::artifacts::ArtifactType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    InProgress,
    /// Escalated; waits for a human to re-queue it
    Blocked,
    Done,
    /// Set aside; dependents stay blocked until re-queued
    Deferred,
}

impl TaskState {
    /// Marker used in the task queue document.
    pub fn marker(&self) -> char {
        match self {
            TaskState::Pending => ' ',
            TaskState::InProgress => '~',
            TaskState::Done => 'x',
            TaskState::Blocked => '!',
            TaskState::Deferred => '-',
        }
    }

    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            ' ' => Some(TaskState::Pending),
            '~' => Some(TaskState::InProgress),
            'x' | 'X' => Some(TaskState::Done),
            '!' => Some(TaskState::Blocked),
            '-' => Some(TaskState::Deferred),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Blocked => "blocked",
            TaskState::Done => "done",
            TaskState::Deferred => "deferred",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a task touches a file, as declared in its `**Files:**` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Modify,
    Test,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Create => "Create",
            FileAction::Modify => "Modify",
            FileAction::Test => "Test",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "create" => Some(FileAction::Create),
            "modify" => Some(FileAction::Modify),
            "test" => Some(FileAction::Test),
            _ => None,
        }
    }
}

/// A file (or pattern) a task is allowed to edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileScope {
    pub action: FileAction,
    pub path: String,
}

impl FileScope {
    pub fn new(action: FileAction, path: &str) -> Self {
        Self {
            action,
            path: path.to_string(),
        }
    }
}

/// A unit of work in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub decision_refs: BTreeSet<String>,
    #[serde(default)]
    pub artifact_refs: BTreeSet<ArtifactType>,
    /// Declared file scope, in document order
    #[serde(default)]
    pub allowed_files: Vec<FileScope>,
    /// Dependencies, in document order
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred_reason: Option<String>,
}

impl Task {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            decision_refs: BTreeSet::new(),
            artifact_refs: BTreeSet::new(),
            allowed_files: Vec::new(),
            depends_on: Vec::new(),
            state: TaskState::Pending,
            milestone: None,
            deferred_reason: None,
        }
    }

    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_file(mut self, action: FileAction, path: &str) -> Self {
        self.allowed_files.push(FileScope::new(action, path));
        self
    }

    pub fn with_milestone(mut self, milestone: &str) -> Self {
        self.milestone = Some(milestone.to_string());
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    pub fn with_decision(mut self, id: &str) -> Self {
        self.decision_refs.insert(id.to_string());
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactType) -> Self {
        self.artifact_refs.insert(artifact);
        self
    }

    /// File paths and patterns only.
    pub fn allowed_paths(&self) -> impl Iterator<Item = &str> {
        self.allowed_files.iter().map(|f| f.path.as_str())
    }
}

/// Lifecycle state of a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneState {
    #[default]
    Pending,
    Active,
    Complete,
    /// Milestone review asked for fixes
    Fixable,
    /// Escalated; needs human resolution
    Blocked,
}

impl MilestoneState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneState::Pending => "pending",
            MilestoneState::Active => "active",
            MilestoneState::Complete => "complete",
            MilestoneState::Fixable => "fixable",
            MilestoneState::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for MilestoneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MilestoneState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(MilestoneState::Pending),
            "active" => Ok(MilestoneState::Active),
            "complete" => Ok(MilestoneState::Complete),
            "fixable" => Ok(MilestoneState::Fixable),
            "blocked" => Ok(MilestoneState::Blocked),
            _ => anyhow::bail!(
                "Invalid milestone state '{}'. Valid values: pending, active, complete, fixable, blocked",
                s
            ),
        }
    }
}

/// An ordered group of tasks with its own completion gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub title: String,
    /// Task ids in queue order
    pub tasks: Vec<String>,
    #[serde(default)]
    pub state: MilestoneState,
}

impl Milestone {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            tasks: Vec::new(),
            state: MilestoneState::Pending,
        }
    }
}
