//! Workspace setup and inspection: `init`, `status`, `config`.

use anyhow::Result;
use console::style;
use waypoint::config::WaypointConfig;
use waypoint::pipeline::{PhaseState, Stage};
use waypoint::queue::TaskState;
use waypoint::workspace::{Workspace, init_workspace};

use super::super::ConfigCommands;

pub fn cmd_init(config: &WaypointConfig) -> Result<()> {
    let result = init_workspace(&config.project_dir)?;
    if result.created {
        println!(
            "Initialized waypoint workspace at {}",
            result.waypoint_dir.display()
        );
    } else {
        println!(
            "Waypoint workspace already exists at {}",
            result.waypoint_dir.display()
        );
    }
    if let Some(run_id) = result.restarted {
        println!(
            "Aborted run {} archived under runs/; started a new run",
            run_id
        );
    }
    Ok(())
}

pub fn cmd_status(config: WaypointConfig) -> Result<()> {
    let workspace = Workspace::open(config)?;
    let run = workspace.load_run()?;
    let status = run.status();

    println!();
    println!("Waypoint Pipeline Status");
    println!("========================");
    println!();
    println!("Run:      {}", status.run_id);
    println!("Pipeline: {}", status.pipeline_type);
    println!("Phase:    {}", style(run.phase()).bold());
    println!();

    for entry in &status.phases {
        let marker = match entry.status {
            PhaseState::Complete => style("✓").green(),
            PhaseState::Active => style("▶").cyan(),
            PhaseState::Blocked => style("!").red(),
            PhaseState::Aborted => style("✗").red(),
            PhaseState::Skipped => style("-").dim(),
            PhaseState::Pending => style("·").dim(),
        };
        println!("  {} {}", marker, entry.name);
    }
    println!();

    let queue = run.queue();
    if !queue.is_empty() {
        let progress = queue.progress();
        println!(
            "Tasks: {}/{} done ({:.0}%), {} pending, {} blocked, {} deferred",
            progress.done,
            progress.total,
            progress.percent_done(),
            progress.pending,
            progress.blocked,
            progress.deferred
        );
        for milestone in queue.milestones() {
            println!("  Milestone {}: {} [{}]", milestone.id, milestone.title, milestone.state);
        }
        if let Some(task) = run.active_task() {
            println!("Active task: {} {}", style(&task.id).bold(), task.title);
        } else if run.phase().is(Stage::ExecuteTasks)
            && let Some(next) = queue.next_eligible()
        {
            println!("Next task:   {} {}", next.id, next.title);
        }
        let blocked: Vec<&str> = queue
            .tasks()
            .iter()
            .filter(|t| t.state == TaskState::Blocked)
            .map(|t| t.id.as_str())
            .collect();
        if !blocked.is_empty() {
            println!("Blocked:     {}", style(blocked.join(", ")).red());
        }
        println!();
    }

    if let Some(milestone) = run.active_milestone() {
        println!("Milestone under review: {}", milestone);
    }
    for (gate, cycles) in run.gates().counters() {
        println!("Fix cycles at {}: {}", gate, cycles);
    }

    println!(
        "Decisions: {} current, {} total",
        run.decisions().current(None).len(),
        run.decisions().len()
    );
    match run.checkpoints().latest() {
        Some(cp) => println!(
            "Checkpoints: {}/{} retained, latest #{} ({})",
            run.checkpoints().len(),
            run.checkpoints().retention(),
            cp.seq,
            cp.label
        ),
        None => println!("Checkpoints: none"),
    }
    if let Some(session) = run.session().filter(|s| s.is_active()) {
        println!(
            "Specialist: {} ({}), {} draft decision(s)",
            session.specialist,
            session.focus_area,
            session.draft_decisions.len()
        );
    }
    println!();
    Ok(())
}

pub fn cmd_config(config: &WaypointConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Waypoint Configuration");
            println!("======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No waypoint.toml found, using defaults");
            }
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();

            let policy = config.fix_cycle_policy();
            println!("Effective values (with env/CLI overrides):");
            println!("  max_task_fix_cycles = {}", policy.max_task);
            println!("  max_milestone_fix_cycles = {}", policy.max_milestone);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{} Configuration is valid", style("✓").green());
            } else {
                for warning in &warnings {
                    println!("{} {}", style("⚠").yellow(), warning);
                }
            }
        }
    }
    Ok(())
}
