//! On-disk workspace under `<project>/.waypoint/`.
//!
//! ```text
//! .waypoint/
//! ├── waypoint.toml            # Configuration
//! ├── tasks.md                 # Task queue document
//! ├── decisions/               # <PREFIX>.md files + counters.json
//! ├── artifacts/               # index.json + <type>/v<N>.md
//! ├── checkpoints.json         # Retained checkpoints
//! ├── pipeline-status.json     # Phase overview and run state
//! ├── specialist-session.json  # Open specialist round
//! ├── state-chain/chain.json   # Verdict audit log
//! ├── reflexion/index.json     # Tagged lessons
//! ├── summaries.md             # Run summaries
//! ├── runs/<run_id>/           # Archived state of aborted runs
//! └── run.lock                 # Writer lock
//! ```
//!
//! Every command loads the stores it needs, acts, and saves them back. Commands
//! that mutate state hold an exclusive lock on `run.lock` for their duration.

use crate::artifacts::ArtifactStore;
use crate::chain::StateChain;
use crate::checkpoint::CheckpointManager;
use crate::config::{WAYPOINT_DIR, WaypointConfig, WaypointToml};
use crate::decisions;
use crate::errors::WorkspaceError;
use crate::pipeline::{ActivePipelineRun, Phase, PipelineStatus, RunStores};
use crate::queue::{load_queue, save_queue};
use crate::reflexion::ReflexionIndex;
use crate::session::SpecialistSession;
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Result of initializing a workspace.
#[derive(Debug)]
pub struct InitResult {
    pub waypoint_dir: PathBuf,
    /// False when the workspace already existed
    pub created: bool,
    /// Aborted run archived to make room for a fresh one
    pub restarted: Option<Uuid>,
}

/// Files that belong to a single run rather than to the project.
const RUN_FILES: &[&str] = &[
    "tasks.md",
    "checkpoints.json",
    "specialist-session.json",
    "pipeline-status.json",
];

/// Create `.waypoint/` under `project_dir`, filling in anything missing.
///
/// Existing files are left untouched, except that an aborted run is moved to
/// `runs/<run_id>/` and a fresh run starts in `discovery`. Decisions,
/// artifacts, lessons and the state chain carry over.
pub fn init_workspace(project_dir: &Path) -> Result<InitResult> {
    let waypoint_dir = project_dir.join(WAYPOINT_DIR);
    let created = !waypoint_dir.exists();

    for dir in [
        waypoint_dir.clone(),
        waypoint_dir.join("decisions"),
        waypoint_dir.join("artifacts"),
        waypoint_dir.join("state-chain"),
        waypoint_dir.join("reflexion"),
    ] {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config = WaypointConfig::new(project_dir.to_path_buf())?;
    let config_file = config.config_file();
    if !config_file.exists() {
        WaypointToml::default().save(&config_file)?;
    }
    let status_file = config.status_file();
    let restarted = match PipelineStatus::load(&status_file)? {
        Some(status) if status.phase == Phase::Aborted => {
            Some(archive_aborted_run(&config, status.run_id)?)
        }
        Some(_) => None,
        None => {
            PipelineStatus::new(&config.toml.pipeline.pipeline_type).save(&status_file)?;
            None
        }
    };

    Ok(InitResult {
        waypoint_dir: config.waypoint_dir,
        created,
        restarted,
    })
}

fn archive_aborted_run(config: &WaypointConfig, run_id: Uuid) -> Result<Uuid> {
    let workspace = Workspace::open_locked(config.clone())?;
    let archive = workspace.config.waypoint_dir.join("runs").join(run_id.to_string());
    fs::create_dir_all(&archive)
        .with_context(|| format!("Failed to create run archive: {}", archive.display()))?;

    for name in RUN_FILES {
        let from = workspace.config.waypoint_dir.join(name);
        if from.exists() {
            fs::rename(&from, archive.join(name))
                .with_context(|| format!("Failed to archive {}", from.display()))?;
        }
    }

    let fresh = PipelineStatus::new(&workspace.config.toml.pipeline.pipeline_type);
    fresh.save(&workspace.config.status_file())?;
    info!(aborted = %run_id, run = %fresh.run_id, "Started a new run after abort");
    Ok(run_id)
}

/// An initialized workspace, optionally holding the writer lock.
pub struct Workspace {
    config: WaypointConfig,
    lock: Option<File>,
}

impl Workspace {
    /// Open a workspace for reading.
    pub fn open(config: WaypointConfig) -> Result<Self> {
        if !config.waypoint_dir.is_dir() {
            return Err(WorkspaceError::NotInitialized(config.project_dir.clone()).into());
        }
        Ok(Self { config, lock: None })
    }

    /// Open a workspace for writing, taking the exclusive run lock.
    pub fn open_locked(config: WaypointConfig) -> Result<Self> {
        let mut workspace = Self::open(config)?;
        let path = workspace.config.lock_file();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        file.try_lock_exclusive()
            .map_err(|_| WorkspaceError::Locked(path.clone()))?;
        debug!(path = %path.display(), "Workspace lock acquired");
        workspace.lock = Some(file);
        Ok(workspace)
    }

    pub fn config(&self) -> &WaypointConfig {
        &self.config
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Load every store and resume the run (or start one).
    pub fn load_run(&self) -> Result<ActivePipelineRun> {
        let config = &self.config;
        let stores = RunStores {
            decisions: decisions::load_from_dir(&config.decisions_dir())?,
            artifacts: ArtifactStore::load(&config.artifacts_dir())?,
            queue: load_queue(&config.tasks_file())?,
            checkpoints: CheckpointManager::load(
                &config.checkpoints_file(),
                config.checkpoint_retention(),
            )?,
            session: SpecialistSession::load(&config.session_file())?,
            chain: StateChain::open(&config.chain_file())?,
        };
        let policy = config.fix_cycle_policy();
        let qa_enabled = config.qa_enabled();

        let run = match PipelineStatus::load(&config.status_file())? {
            Some(status) => ActivePipelineRun::resume_from(status, stores, policy, qa_enabled),
            None => ActivePipelineRun::start(
                &config.toml.pipeline.pipeline_type,
                stores,
                policy,
                qa_enabled,
            ),
        };
        Ok(run)
    }

    /// Persist every store of a run. The state chain persists itself.
    pub fn save_run(&self, run: &ActivePipelineRun) -> Result<()> {
        let config = &self.config;
        decisions::save_to_dir(run.decisions(), &config.decisions_dir())?;
        run.artifacts().save(&config.artifacts_dir())?;

        let tasks_file = config.tasks_file();
        if !run.queue().is_empty() || tasks_file.exists() {
            save_queue(run.queue(), &tasks_file)?;
        }
        run.checkpoints().save(&config.checkpoints_file())?;
        if let Some(session) = run.session() {
            session.save(&config.session_file())?;
        }
        run.status().save(&config.status_file())?;
        debug!(phase = %run.phase(), "Workspace saved");
        Ok(())
    }

    /// Append a timestamped entry to `summaries.md`.
    pub fn append_summary(&self, text: &str) -> Result<()> {
        let path = self.config.summaries_file();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open summaries: {}", path.display()))?;
        writeln!(file, "## {}\n\n{}\n", Utc::now().to_rfc3339(), text.trim())
            .context("Failed to write summary")?;
        Ok(())
    }

    pub fn load_lessons(&self) -> Result<ReflexionIndex> {
        ReflexionIndex::load(&self.config.reflexion_file())
    }

    pub fn save_lessons(&self, index: &ReflexionIndex) -> Result<()> {
        index.save(&self.config.reflexion_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactType;
    use crate::pipeline::Stage;
    use crate::session::DraftDecision;
    use tempfile::tempdir;

    fn config(dir: &Path) -> WaypointConfig {
        WaypointConfig::new(dir.to_path_buf()).unwrap()
    }

    #[test]
    fn test_init_creates_layout() {
        let dir = tempdir().unwrap();
        let result = init_workspace(dir.path()).unwrap();
        assert!(result.created);
        assert!(result.waypoint_dir.join("waypoint.toml").exists());
        assert!(result.waypoint_dir.join("pipeline-status.json").exists());
        assert!(result.waypoint_dir.join("decisions").is_dir());
        assert!(result.waypoint_dir.join("state-chain").is_dir());

        let again = init_workspace(dir.path()).unwrap();
        assert!(!again.created);
    }

    #[test]
    fn test_init_restarts_aborted_run() {
        let dir = tempdir().unwrap();
        init_workspace(dir.path()).unwrap();
        let ws = Workspace::open_locked(config(dir.path())).unwrap();
        let mut run = ws.load_run().unwrap();
        let old_id = run.run_id();
        run.store_decisions(&[DraftDecision {
            prefix: "GEN".into(),
            text: "Ship a CLI".into(),
            rationale: "Terminal users".into(),
        }])
        .unwrap();
        run.checkpoint("before abort");
        run.abort().unwrap();
        ws.save_run(&run).unwrap();
        drop(ws);

        let result = init_workspace(dir.path()).unwrap();
        assert_eq!(result.restarted, Some(old_id));
        let archive = result.waypoint_dir.join("runs").join(old_id.to_string());
        assert!(archive.join("pipeline-status.json").exists());
        assert!(archive.join("checkpoints.json").exists());

        let ws = Workspace::open_locked(config(dir.path())).unwrap();
        let mut run = ws.load_run().unwrap();
        assert_ne!(run.run_id(), old_id);
        assert!(run.phase().is(Stage::Discovery));
        assert!(run.checkpoints().is_empty());
        assert_eq!(run.decisions().current(None).len(), 1);
        assert_eq!(run.advance().unwrap(), Stage::Define);

        let again = init_workspace(dir.path()).unwrap();
        assert_eq!(again.restarted, None);
    }

    #[test]
    fn test_open_requires_init() {
        let dir = tempdir().unwrap();
        let err = Workspace::open(config(dir.path())).err().unwrap();
        assert!(err.downcast_ref::<WorkspaceError>().is_some());
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        init_workspace(dir.path()).unwrap();
        let first = Workspace::open_locked(config(dir.path())).unwrap();
        assert!(first.is_locked());
        let err = Workspace::open_locked(config(dir.path())).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<WorkspaceError>(),
            Some(WorkspaceError::Locked(_))
        ));
        drop(first);
        assert!(Workspace::open_locked(config(dir.path())).is_ok());
    }

    #[test]
    fn test_run_survives_save_and_load() {
        let dir = tempdir().unwrap();
        init_workspace(dir.path()).unwrap();
        let ws = Workspace::open_locked(config(dir.path())).unwrap();

        let mut run = ws.load_run().unwrap();
        let run_id = run.run_id();
        run.advance().unwrap();
        run.store_decisions(&[DraftDecision {
            prefix: "GEN".into(),
            text: "Ship a CLI".into(),
            rationale: "Terminal users".into(),
        }])
        .unwrap();
        run.store_artifact(ArtifactType::DomainKnowledge, "Glossary");
        run.checkpoint("manual");
        ws.save_run(&run).unwrap();
        assert!(!ws.config().tasks_file().exists());

        let run = ws.load_run().unwrap();
        assert_eq!(run.run_id(), run_id);
        assert!(run.phase().is(Stage::Define));
        assert_eq!(run.decisions().current(None).len(), 1);
        assert!(run.artifacts().has(ArtifactType::DomainKnowledge));
        assert_eq!(run.checkpoints().len(), 1);
        assert_eq!(run.chain().entries().len(), 1);
    }

    #[test]
    fn test_append_summary() {
        let dir = tempdir().unwrap();
        init_workspace(dir.path()).unwrap();
        let ws = Workspace::open(config(dir.path())).unwrap();
        ws.append_summary("First run").unwrap();
        ws.append_summary("Second run").unwrap();
        let content = fs::read_to_string(ws.config().summaries_file()).unwrap();
        assert!(content.contains("First run"));
        assert_eq!(content.matches("## ").count(), 2);
    }
}
