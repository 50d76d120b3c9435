//! Decisions, artifacts, summaries and specialist rounds.

use anyhow::Result;
use console::style;
use waypoint::artifacts::ArtifactType;
use waypoint::config::WaypointConfig;
use waypoint::decisions::Decision;
use waypoint::pipeline::BatchReport;
use waypoint::session::DraftDecision;
use waypoint::workspace::Workspace;

use super::super::SpecialistCommands;
use super::{MalformedInput, parse_json, with_run};

pub fn cmd_store_decisions(config: WaypointConfig, input: &str) -> Result<()> {
    let drafts: Vec<DraftDecision> = parse_json(input, "expected a JSON array of decisions")?;
    let report = with_run(config, |run| Ok(run.store_decisions(&drafts)?))?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &BatchReport) {
    for id in &report.stored {
        println!("{} {}", style("stored").green(), id);
    }
    for warning in &report.warnings {
        eprintln!("{} {}", style("warning:").yellow(), warning);
    }
}

pub fn cmd_decisions(config: WaypointConfig, prefix: Option<&str>, all: bool) -> Result<()> {
    let workspace = Workspace::open(config)?;
    let run = workspace.load_run()?;
    let store = run.decisions();
    let decisions = if all {
        store.history(prefix)
    } else {
        store.current(prefix)
    };

    if decisions.is_empty() {
        println!("No decisions recorded");
        return Ok(());
    }
    for decision in decisions {
        print_decision(decision, store.retired().iter().any(|d| d.id == decision.id));
    }
    Ok(())
}

fn print_decision(decision: &Decision, retired: bool) {
    let mut line = format!("{:<9} {}", style(&decision.id).bold(), decision.text);
    if let Some(ref by) = decision.superseded_by {
        line.push_str(&format!(" {}", style(format!("(superseded by {})", by)).dim()));
    }
    if retired {
        line.push_str(&format!(" {}", style("(rolled back)").dim()));
    }
    println!("{}", line);
    println!("          {}", style(&decision.rationale).dim());
}

pub fn cmd_supersede(config: WaypointConfig, id: &str, text: &str) -> Result<()> {
    let new_id = with_run(config, |run| Ok(run.supersede_decision(id, text)?))?;
    println!("{} superseded by {}", id, style(new_id).bold());
    Ok(())
}

pub fn cmd_store_artifact(config: WaypointConfig, artifact_type: &str, content: &str) -> Result<()> {
    let artifact_type: ArtifactType = artifact_type
        .parse()
        .map_err(|e: anyhow::Error| MalformedInput(e.to_string()))?;
    if content.trim().is_empty() {
        return Err(MalformedInput("artifact content on stdin is empty".to_string()).into());
    }
    let version = with_run(config, |run| Ok(run.store_artifact(artifact_type, content)))?;
    println!("Stored {} v{}", artifact_type, version);
    Ok(())
}

pub fn cmd_store_summary(config: WaypointConfig, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(MalformedInput("summary text is empty".to_string()).into());
    }
    let workspace = Workspace::open_locked(config)?;
    workspace.append_summary(text)?;
    println!("Summary recorded");
    Ok(())
}

pub fn cmd_specialist(config: WaypointConfig, command: &SpecialistCommands) -> Result<()> {
    match command {
        SpecialistCommands::Begin { name, focus } => {
            let drafts = with_run(config, |run| {
                Ok(run.begin_specialist(name, focus)?.draft_decisions.len())
            })?;
            println!("Specialist {} active ({}), {} draft(s)", name, focus, drafts);
        }
        SpecialistCommands::Draft {
            prefix,
            text,
            rationale,
        } => {
            let count = with_run(config, |run| Ok(run.draft_decision(prefix, text, rationale)?))?;
            println!("Drafted {} decision ({} in session)", prefix, count);
        }
        SpecialistCommands::Ask { question } => {
            with_run(config, |run| Ok(run.ask_question(question)?))?;
            println!("Question recorded");
        }
        SpecialistCommands::Finish => {
            let report = with_run(config, |run| Ok(run.finish_specialist()?))?;
            print_report(&report);
            println!("Specialist session complete");
        }
    }
    Ok(())
}
