//! Task lifecycle: `next`, `begin`, `defer`, `requeue`, plus the advisory
//! `scope-check` run by edit hooks.

use anyhow::Result;
use console::style;
use tracing::{debug, warn};
use waypoint::config::WaypointConfig;
use waypoint::queue::{Task, load_queue};
use waypoint::scope;

use super::with_run;

fn print_started(task: &Task) {
    println!("{} {} {}", style("Started").green(), style(&task.id).bold(), task.title);
    if let Some(ref milestone) = task.milestone {
        println!("  Milestone: {}", milestone);
    }
    if !task.decision_refs.is_empty() {
        let refs: Vec<&str> = task.decision_refs.iter().map(String::as_str).collect();
        println!("  Decisions: {}", refs.join(", "));
    }
    if !task.artifact_refs.is_empty() {
        let refs: Vec<&str> = task.artifact_refs.iter().map(|a| a.as_str()).collect();
        println!("  Artifacts: {}", refs.join(", "));
    }
    for file in &task.allowed_files {
        println!("  {}: {}", file.action.as_str(), file.path);
    }
}

pub fn cmd_next(config: WaypointConfig) -> Result<()> {
    let (started, finished) = with_run(config, |run| {
        let started = run.start_next_task()?;
        Ok((started, run.queue().is_finished()))
    })?;
    match started {
        Some(task) => print_started(&task),
        None if finished => println!("All tasks are done"),
        None => println!("No eligible task: remaining tasks are blocked, deferred or waiting on dependencies"),
    }
    Ok(())
}

pub fn cmd_begin(config: WaypointConfig, id: &str) -> Result<()> {
    let task = with_run(config, |run| Ok(run.begin_task(id)?))?;
    print_started(&task);
    Ok(())
}

pub fn cmd_defer(config: WaypointConfig, id: &str, reason: &str) -> Result<()> {
    with_run(config, |run| Ok(run.defer_task(id, reason)?))?;
    println!("Deferred {}: {}", id, reason);
    Ok(())
}

pub fn cmd_requeue(config: WaypointConfig, id: &str) -> Result<()> {
    with_run(config, |run| Ok(run.requeue_task(id)?))?;
    println!("Re-queued {}", id);
    Ok(())
}

/// Advisory only: never fails, whatever state the workspace is in.
pub fn cmd_scope_check(config: WaypointConfig, path: &str) {
    if !config.scope_enabled() {
        debug!("Scope checking disabled");
        return;
    }
    let queue = match load_queue(&config.tasks_file()) {
        Ok(queue) => queue,
        Err(e) => {
            warn!(error = %e, "Scope check skipped: task queue unreadable");
            return;
        }
    };
    let relative = std::path::Path::new(path)
        .strip_prefix(&config.project_dir)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string());

    if let Some(message) = scope::check(&relative, queue.active()).message() {
        eprintln!("{} {}", style("scope:").yellow(), message);
    }
}
