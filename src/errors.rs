//! Typed error hierarchy for the waypoint engine.
//!
//! One enum per subsystem:
//! - `DecisionError`: decision ledger guards
//! - `QueueError`: task queue load validation and lifecycle guards
//! - `CheckpointError`: rollback targets
//! - `GateError`: verdict parsing and escalation
//! - `WorkspaceError`: workspace discovery and locking
//! - `PipelineError`: phase state machine transitions
//!
//! Structural errors (`CyclicDependency`, `MalformedQueue`) reject a whole
//! load. Guard errors (`AlreadyRunning`, `DependencyNotSatisfied`) are returned
//! before anything is mutated.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the decision store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    /// Advisory: the rationale already exists under this prefix. Nothing was stored.
    #[error("Duplicate rationale under prefix {prefix}: already recorded as {existing}")]
    DuplicateRationale { prefix: String, existing: String },

    #[error("Invalid decision prefix '{0}': expected uppercase letters/digits starting with a letter")]
    InvalidPrefix(String),

    #[error("Decision {0} not found")]
    UnknownDecision(String),

    #[error("Decision {id} is already superseded by {by}")]
    AlreadySuperseded { id: String, by: String },

    #[error("Malformed decision file {file}: {message}")]
    Malformed { file: String, message: String },
}

impl DecisionError {
    /// Duplicate rationale is a warning surfaced to the caller, not a failure.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::DuplicateRationale { .. })
    }
}

/// Errors from the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Cyclic dependency between tasks: {}", .tasks.join(", "))]
    CyclicDependency { tasks: Vec<String> },

    #[error("Task {task} cannot start: dependency {dependency} is not done")]
    DependencyNotSatisfied { task: String, dependency: String },

    #[error("Task {requested} cannot start: task {running} is already in progress")]
    AlreadyRunning { running: String, requested: String },

    #[error("Task {0} not found")]
    UnknownTask(String),

    #[error("Milestone {0} not found")]
    UnknownMilestone(String),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task {task} cannot move from {from} to {to}")]
    InvalidTransition { task: String, from: String, to: String },

    #[error("Malformed task queue: {0}")]
    MalformedQueue(String),
}

impl QueueError {
    /// Guard failures are local to one call and leave the queue untouched.
    pub fn is_guard_failure(&self) -> bool {
        matches!(
            self,
            Self::DependencyNotSatisfied { .. }
                | Self::AlreadyRunning { .. }
                | Self::InvalidTransition { .. }
        )
    }
}

/// Errors from the checkpoint manager.
///
/// Retention overflow is handled by eviction and has no variant here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("No checkpoints to roll back to")]
    NoCheckpoints,

    #[error("Checkpoint {0} is not retained")]
    UnknownCheckpoint(u64),

    #[error("Checkpoint {seq} holds an invalid task queue: {source}")]
    InvalidQueue { seq: u64, source: QueueError },
}

/// Errors from the gate controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("Unknown verdict namespace '{0}'")]
    UnknownNamespace(String),

    #[error("'{outcome}' is not a {namespace} outcome")]
    UnknownOutcome { namespace: String, outcome: String },

    #[error("Unknown finding severity '{0}'")]
    UnknownSeverity(String),

    #[error("Escalation required at gate {gate}: {reason}")]
    EscalationRequired { gate: String, reason: String },
}

/// Errors from the on-disk workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("No waypoint workspace at {0}. Run 'waypoint init' first.")]
    NotInitialized(PathBuf),

    #[error("Workspace is locked by another waypoint process: {0}")]
    Locked(PathBuf),
}

/// Errors from the phase state machine.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Missing required input for {phase}: {input}")]
    MissingRequiredInput { phase: String, input: String },

    #[error("Escalation required at gate {gate}: {reason}")]
    EscalationRequired { gate: String, reason: String },

    #[error("Cannot {action} while pipeline is in {phase}")]
    InvalidPhase { action: String, phase: String },

    #[error("Cannot abort while task {0} is in progress")]
    AbortMidTask(String),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether this error is the user-visible terminal failure of a gate.
    pub fn is_escalation(&self) -> bool {
        matches!(
            self,
            Self::EscalationRequired { .. } | Self::Gate(GateError::EscalationRequired { .. })
        )
    }
}
