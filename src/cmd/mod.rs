//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                                              |
//! |-------------|---------------------------------------------------------------|
//! | `project`   | `Init`, `Status`, `Config`                                    |
//! | `run`       | `Advance`, `Resume`, `Abort`, `Checkpoint`, `Rollback`        |
//! | `decisions` | `StoreDecisions`, `Decisions`, `Supersede`, `StoreArtifact`, `StoreSummary`, `Specialist` |
//! | `tasks`     | `Next`, `Begin`, `Defer`, `Requeue`, `ScopeCheck`             |
//! | `gate`      | `Gate`                                                        |
//! | `lessons`   | `Lessons`, `Learn`                                            |
//!
//! Exit codes: 0 on success, 2 when the command blocks (escalation, guard
//! failure, malformed input) and 1 for anything else.

pub mod decisions;
pub mod gate;
pub mod lessons;
pub mod project;
pub mod run;
pub mod tasks;

pub use decisions::{
    cmd_decisions, cmd_specialist, cmd_store_artifact, cmd_store_decisions, cmd_store_summary,
    cmd_supersede,
};
pub use gate::cmd_gate;
pub use lessons::{cmd_learn, cmd_lessons};
pub use project::{cmd_config, cmd_init, cmd_status};
pub use run::{cmd_abort, cmd_advance, cmd_checkpoint, cmd_resume, cmd_rollback};
pub use tasks::{cmd_begin, cmd_defer, cmd_next, cmd_requeue, cmd_scope_check};

use super::{Cli, Commands};
use anyhow::{Context, Result};
use std::io::Read;
use thiserror::Error;
use waypoint::config::{WaypointConfig, resolve_project_dir};
use waypoint::errors::{
    CheckpointError, DecisionError, GateError, PipelineError, QueueError, WorkspaceError,
};
use waypoint::pipeline::ActivePipelineRun;
use waypoint::workspace::Workspace;

/// Input on stdin or in arguments that could not be understood.
#[derive(Debug, Error)]
#[error("Malformed input: {0}")]
pub struct MalformedInput(pub String);

pub async fn dispatch(cli: &Cli) -> Result<()> {
    let project_dir = resolve_project_dir(cli.project_dir.clone())?;
    let config = WaypointConfig::new(project_dir)?.with_cli_max_fix_cycles(cli.max_fix_cycles);

    match &cli.command {
        Commands::Init => cmd_init(&config)?,
        Commands::Status => cmd_status(config)?,
        Commands::Config { command } => cmd_config(&config, command.clone())?,
        Commands::Advance => cmd_advance(config)?,
        Commands::Resume => cmd_resume(config)?,
        Commands::Abort => cmd_abort(config)?,
        Commands::Checkpoint { label } => cmd_checkpoint(config, label.as_deref())?,
        Commands::Rollback { seq } => cmd_rollback(config, *seq)?,
        Commands::StoreDecisions => cmd_store_decisions(config, &read_stdin()?)?,
        Commands::Decisions { prefix, all } => cmd_decisions(config, prefix.as_deref(), *all)?,
        Commands::Supersede { id, text } => cmd_supersede(config, id, text)?,
        Commands::StoreArtifact { artifact_type } => {
            cmd_store_artifact(config, artifact_type, &read_stdin()?)?
        }
        Commands::StoreSummary { text } => cmd_store_summary(config, text)?,
        Commands::Specialist { command } => cmd_specialist(config, command)?,
        Commands::Next => cmd_next(config)?,
        Commands::Begin { id } => cmd_begin(config, id)?,
        Commands::Defer { id, reason } => cmd_defer(config, id, reason)?,
        Commands::Requeue { id } => cmd_requeue(config, id)?,
        Commands::Gate {
            task,
            milestone,
            qa,
            reviewers,
        } => cmd_gate(config, task.as_deref(), milestone.as_deref(), *qa, reviewers).await?,
        Commands::ScopeCheck { path } => cmd_scope_check(config, path),
        Commands::Lessons { tags } => cmd_lessons(config, tags)?,
        Commands::Learn => cmd_learn(config, &read_stdin()?)?,
    }
    Ok(())
}

/// Map an error to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    let blocks = err.chain().any(|cause| {
        cause.is::<MalformedInput>()
            || cause.is::<DecisionError>()
            || cause.is::<QueueError>()
            || cause.is::<CheckpointError>()
            || cause.is::<GateError>()
            || cause.is::<WorkspaceError>()
            || cause
                .downcast_ref::<PipelineError>()
                .is_some_and(|e| !matches!(e, PipelineError::Other(_)))
    });
    if blocks { 2 } else { 1 }
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read stdin")?;
    Ok(input)
}

/// Parse JSON input, reporting failures as malformed input.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(input: &str, what: &str) -> Result<T> {
    serde_json::from_str(input.trim())
        .map_err(|e| MalformedInput(format!("{}: {}", what, e)).into())
}

/// Load the run under the writer lock, apply `f`, and save.
///
/// Nothing is saved when `f` fails, so guard failures leave the workspace
/// as it was.
pub(crate) fn with_run<T>(
    config: WaypointConfig,
    f: impl FnOnce(&mut ActivePipelineRun) -> Result<T>,
) -> Result<T> {
    let workspace = Workspace::open_locked(config)?;
    let mut run = workspace.load_run()?;
    let value = f(&mut run)?;
    workspace.save_run(&run)?;
    Ok(value)
}
