use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about = "Workflow orchestration engine for prompt-driven development")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root (CLAUDE_PROJECT_DIR takes precedence)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Task fix-cycle cap. Overrides WAYPOINT_MAX_FIX_CYCLES and waypoint.toml.
    #[arg(long, global = true)]
    pub max_fix_cycles: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .waypoint workspace
    Init,
    /// Show pipeline phase, queue progress and checkpoints
    Status,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Move to the next planning phase
    Advance,
    /// Continue after an escalation was resolved
    Resume,
    /// Abort the run, restoring the last checkpoint
    Abort,
    /// Store decisions read as a JSON array from stdin
    StoreDecisions,
    /// List decisions
    Decisions {
        #[arg(long)]
        prefix: Option<String>,
        /// Include superseded and rolled-back decisions
        #[arg(long)]
        all: bool,
    },
    /// Replace a decision with a new one under the same prefix
    Supersede {
        id: String,
        #[arg(long)]
        text: String,
    },
    /// Store an artifact read from stdin
    StoreArtifact {
        /// brand-guide, style-guide, competition-analysis or domain-knowledge
        #[arg(long = "type")]
        artifact_type: String,
    },
    /// Append a run summary
    StoreSummary {
        #[arg(long)]
        text: String,
    },
    /// Specialist rounds
    Specialist {
        #[command(subcommand)]
        command: SpecialistCommands,
    },
    /// Start the next eligible task
    Next,
    /// Start a specific task
    Begin { id: String },
    /// Set a task aside
    Defer {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Return a deferred or blocked task to the queue
    Requeue { id: String },
    /// Evaluate a review gate
    ///
    /// Verdicts come from --reviewer commands run concurrently, or from a JSON
    /// array (or {"verdicts": [...], "missing": [...]}) on stdin.
    Gate {
        #[arg(long, group = "target")]
        task: Option<String>,
        #[arg(long, group = "target")]
        milestone: Option<String>,
        #[arg(long, group = "target")]
        qa: bool,
        /// Reviewer command, optionally prefixed with a namespace (SEC=bandit -r src)
        #[arg(long = "reviewer")]
        reviewers: Vec<String>,
    },
    /// Check an edited path against the active task's declared files
    ScopeCheck { path: String },
    /// Snapshot decisions, tasks and artifact versions
    Checkpoint {
        #[arg(long)]
        label: Option<String>,
    },
    /// Restore a checkpoint (the latest by default)
    Rollback {
        #[arg(long)]
        seq: Option<u64>,
    },
    /// Search recorded lessons
    Lessons {
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Record a lesson read as JSON from stdin
    Learn,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate waypoint.toml
    Validate,
}

#[derive(Subcommand, Clone)]
pub enum SpecialistCommands {
    /// Open a specialist session
    Begin {
        name: String,
        #[arg(long)]
        focus: String,
    },
    /// Draft a decision in the open session
    Draft {
        #[arg(long)]
        prefix: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        rationale: String,
    },
    /// Record a question for the human
    Ask { question: String },
    /// Store the drafts and close the session
    Finish,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("WAYPOINT_LOG")
        .unwrap_or_else(|_| if verbose { "debug".into() } else { "info".into() });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cmd::dispatch(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            ExitCode::from(cmd::exit_code(&e))
        }
    }
}
