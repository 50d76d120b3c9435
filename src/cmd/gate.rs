//! `gate`: evaluate a task, milestone or QA gate.

use anyhow::Result;
use console::style;
use serde::Deserialize;
use waypoint::config::WaypointConfig;
use waypoint::gate::{Canonical, CommandReviewer, GateId, Namespace, RawVerdict, Reviewer, Verdict};
use waypoint::pipeline::GateOutcome;
use waypoint::workspace::Workspace;

use super::{MalformedInput, parse_json, read_stdin};

/// Verdicts as accepted on stdin.
#[derive(Deserialize)]
#[serde(untagged)]
enum GateInput {
    List(Vec<RawVerdict>),
    Full {
        verdicts: Vec<RawVerdict>,
        #[serde(default)]
        missing: Vec<String>,
    },
    Single(RawVerdict),
}

fn parse_verdicts(input: &str, default_ns: Namespace) -> Result<(Vec<Verdict>, Vec<String>)> {
    let parsed: GateInput = parse_json(input, "expected verdict JSON")?;
    let (raw, missing) = match parsed {
        GateInput::List(raw) => (raw, Vec::new()),
        GateInput::Full { verdicts, missing } => (verdicts, missing),
        GateInput::Single(raw) => (vec![raw], Vec::new()),
    };
    let verdicts = raw
        .into_iter()
        .map(|r| r.normalize(default_ns))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((verdicts, missing))
}

/// `SEC=bandit -r src` runs under SEC; a command without a namespace prefix
/// runs under the gate's default namespace.
fn parse_reviewer(spec: &str, default_ns: Namespace) -> Box<dyn Reviewer> {
    if let Some((ns, command)) = spec.split_once('=')
        && let Ok(namespace) = ns.trim().parse::<Namespace>()
    {
        return Box::new(CommandReviewer::new(command.trim(), namespace));
    }
    Box::new(CommandReviewer::new(spec, default_ns))
}

pub async fn cmd_gate(
    config: WaypointConfig,
    task: Option<&str>,
    milestone: Option<&str>,
    qa: bool,
    reviewers: &[String],
) -> Result<()> {
    let (gate, default_ns) = match (task, milestone, qa) {
        (Some(id), None, false) => (GateId::Task(id.to_string()), Namespace::Review),
        (None, Some(id), false) => (GateId::Milestone(id.to_string()), Namespace::Milestone),
        (None, None, true) => (GateId::Qa, Namespace::Qa),
        _ => {
            return Err(MalformedInput(
                "specify exactly one of --task, --milestone or --qa".to_string(),
            )
            .into());
        }
    };

    let budget = config.reviewer_timeout();
    let workspace = Workspace::open_locked(config)?;
    let mut run = workspace.load_run()?;

    let outcome = if reviewers.is_empty() {
        let (verdicts, missing) = parse_verdicts(&read_stdin()?, default_ns)?;
        run.submit_verdicts(&gate, verdicts, missing)?
    } else {
        let reviewers: Vec<Box<dyn Reviewer>> = reviewers
            .iter()
            .map(|spec| parse_reviewer(spec, default_ns))
            .collect();
        run.review(&gate, &reviewers, budget).await?
    };
    workspace.save_run(&run)?;

    print_outcome(&outcome);
    outcome.into_result()?;
    Ok(())
}

fn print_outcome(outcome: &GateOutcome) {
    let decision = &outcome.decision;
    let label = match decision.action {
        Canonical::Proceed => style("PROCEED").green().bold(),
        Canonical::FixCycle => style("FIX_CYCLE").yellow().bold(),
        Canonical::Escalate => style("ESCALATE").red().bold(),
    };
    println!("{} {}: {}", label, decision.gate, decision.reason());
    if let Some(instruction) = outcome.fix_instruction() {
        println!("{}", instruction);
    }
    if let Some(seq) = outcome.checkpoint {
        println!("Checkpoint #{} created", seq);
    }
    println!("Phase: {}", outcome.phase);
}
