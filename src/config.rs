//! Configuration for waypoint.
//!
//! Settings live in `.waypoint/waypoint.toml` and are layered
//! file → environment → CLI:
//!
//! ```toml
//! [pipeline]
//! type = "default"
//! qa_enabled = false
//!
//! [gates]
//! max_task_fix_cycles = 3
//! max_milestone_fix_cycles = 2
//! reviewer_timeout_secs = 600
//!
//! [checkpoints]
//! retention = 10
//!
//! [scope]
//! enabled = true
//! ```
//!
//! Environment: `CLAUDE_PROJECT_DIR` selects the project root and
//! `WAYPOINT_MAX_FIX_CYCLES` overrides the task fix-cycle cap.

use crate::atomic::write_atomic;
use crate::checkpoint::DEFAULT_RETENTION;
use crate::gate::{DEFAULT_MAX_MILESTONE_FIX_CYCLES, DEFAULT_MAX_TASK_FIX_CYCLES, FixCyclePolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the workspace directory under the project root.
pub const WAYPOINT_DIR: &str = ".waypoint";
pub const CONFIG_FILE: &str = "waypoint.toml";
pub const PROJECT_DIR_ENV: &str = "CLAUDE_PROJECT_DIR";
pub const MAX_FIX_CYCLES_ENV: &str = "WAYPOINT_MAX_FIX_CYCLES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Free-form label recorded in the pipeline status
    #[serde(default = "default_pipeline_type", rename = "type")]
    pub pipeline_type: String,
    /// Run a QA pass after the last milestone
    #[serde(default)]
    pub qa_enabled: bool,
}

fn default_pipeline_type() -> String {
    "default".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            pipeline_type: default_pipeline_type(),
            qa_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatesSection {
    #[serde(default = "default_max_task_fix_cycles")]
    pub max_task_fix_cycles: u32,
    #[serde(default = "default_max_milestone_fix_cycles")]
    pub max_milestone_fix_cycles: u32,
    /// Budget for each reviewer when gates fan out to external reviewers
    #[serde(default = "default_reviewer_timeout_secs")]
    pub reviewer_timeout_secs: u64,
}

fn default_max_task_fix_cycles() -> u32 {
    DEFAULT_MAX_TASK_FIX_CYCLES
}

fn default_max_milestone_fix_cycles() -> u32 {
    DEFAULT_MAX_MILESTONE_FIX_CYCLES
}

fn default_reviewer_timeout_secs() -> u64 {
    600
}

impl Default for GatesSection {
    fn default() -> Self {
        Self {
            max_task_fix_cycles: default_max_task_fix_cycles(),
            max_milestone_fix_cycles: default_max_milestone_fix_cycles(),
            reviewer_timeout_secs: default_reviewer_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointsSection {
    #[serde(default = "default_retention")]
    pub retention: usize,
}

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

impl Default for CheckpointsSection {
    fn default() -> Self {
        Self {
            retention: default_retention(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSection {
    #[serde(default = "default_scope_enabled")]
    pub enabled: bool,
}

fn default_scope_enabled() -> bool {
    true
}

impl Default for ScopeSection {
    fn default() -> Self {
        Self {
            enabled: default_scope_enabled(),
        }
    }
}

/// Contents of `waypoint.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaypointToml {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub checkpoints: CheckpointsSection,
    #[serde(default)]
    pub scope: ScopeSection,
}

impl WaypointToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse waypoint.toml")
    }

    /// Load from `<waypoint_dir>/waypoint.toml`, or defaults when absent.
    pub fn load_or_default(waypoint_dir: &Path) -> Result<Self> {
        let path = waypoint_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize waypoint.toml")?;
        write_atomic(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.gates.max_task_fix_cycles == 0 {
            warnings.push(
                "gates.max_task_fix_cycles is 0: every task CONCERN will escalate".to_string(),
            );
        }
        if self.gates.max_milestone_fix_cycles == 0 {
            warnings.push(
                "gates.max_milestone_fix_cycles is 0: every FIXABLE milestone will escalate"
                    .to_string(),
            );
        }
        if self.gates.reviewer_timeout_secs == 0 {
            warnings.push(
                "gates.reviewer_timeout_secs is 0: every reviewer will time out".to_string(),
            );
        }
        if self.checkpoints.retention == 0 {
            warnings.push("checkpoints.retention is 0: treated as 1".to_string());
        }
        warnings
    }
}

/// Parse a fix-cycle override from the environment.
pub fn parse_fix_cycle_override(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|v| v.trim().parse().ok())
}

/// Resolve the project root: `CLAUDE_PROJECT_DIR`, else the CLI flag, else
/// the current directory.
pub fn resolve_project_dir(cli_dir: Option<PathBuf>) -> Result<PathBuf> {
    let env_dir = std::env::var(PROJECT_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    match env_dir.or(cli_dir) {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to determine current directory"),
    }
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct WaypointConfig {
    pub project_dir: PathBuf,
    pub waypoint_dir: PathBuf,
    pub toml: WaypointToml,
    /// Task fix-cycle cap from `WAYPOINT_MAX_FIX_CYCLES`
    pub env_max_fix_cycles: Option<u32>,
    /// Task fix-cycle cap from the command line
    pub cli_max_fix_cycles: Option<u32>,
}

impl WaypointConfig {
    /// Load the config for a project root. The root must exist.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory: {}", project_dir.display()))?;
        let waypoint_dir = project_dir.join(WAYPOINT_DIR);
        let toml = WaypointToml::load_or_default(&waypoint_dir)?;
        let env_max_fix_cycles =
            parse_fix_cycle_override(std::env::var(MAX_FIX_CYCLES_ENV).ok().as_deref());

        Ok(Self {
            project_dir,
            waypoint_dir,
            toml,
            env_max_fix_cycles,
            cli_max_fix_cycles: None,
        })
    }

    pub fn with_cli_max_fix_cycles(mut self, max: Option<u32>) -> Self {
        self.cli_max_fix_cycles = max;
        self
    }

    /// Fix-cycle caps (task cap: CLI → env → file).
    pub fn fix_cycle_policy(&self) -> FixCyclePolicy {
        FixCyclePolicy {
            max_task: self
                .cli_max_fix_cycles
                .or(self.env_max_fix_cycles)
                .unwrap_or(self.toml.gates.max_task_fix_cycles),
            max_milestone: self.toml.gates.max_milestone_fix_cycles,
        }
    }

    pub fn reviewer_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.gates.reviewer_timeout_secs)
    }

    pub fn checkpoint_retention(&self) -> usize {
        self.toml.checkpoints.retention
    }

    pub fn qa_enabled(&self) -> bool {
        self.toml.pipeline.qa_enabled
    }

    pub fn scope_enabled(&self) -> bool {
        self.toml.scope.enabled
    }

    pub fn config_file(&self) -> PathBuf {
        self.waypoint_dir.join(CONFIG_FILE)
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.waypoint_dir.join("tasks.md")
    }

    pub fn decisions_dir(&self) -> PathBuf {
        self.waypoint_dir.join("decisions")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.waypoint_dir.join("artifacts")
    }

    pub fn checkpoints_file(&self) -> PathBuf {
        self.waypoint_dir.join("checkpoints.json")
    }

    pub fn status_file(&self) -> PathBuf {
        self.waypoint_dir.join("pipeline-status.json")
    }

    pub fn session_file(&self) -> PathBuf {
        self.waypoint_dir.join("specialist-session.json")
    }

    pub fn chain_file(&self) -> PathBuf {
        self.waypoint_dir.join("state-chain").join("chain.json")
    }

    pub fn reflexion_file(&self) -> PathBuf {
        self.waypoint_dir.join("reflexion").join("index.json")
    }

    pub fn summaries_file(&self) -> PathBuf {
        self.waypoint_dir.join("summaries.md")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.waypoint_dir.join("run.lock")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_empty() {
        let config = WaypointToml::parse("").unwrap();
        assert_eq!(config.gates.max_task_fix_cycles, 3);
        assert_eq!(config.gates.max_milestone_fix_cycles, 2);
        assert_eq!(config.checkpoints.retention, 10);
        assert!(config.scope.enabled);
        assert!(!config.pipeline.qa_enabled);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let config = WaypointToml::parse(
            r#"
[pipeline]
type = "greenfield"
qa_enabled = true

[gates]
max_task_fix_cycles = 5

[checkpoints]
retention = 4
"#,
        )
        .unwrap();
        assert_eq!(config.pipeline.pipeline_type, "greenfield");
        assert!(config.pipeline.qa_enabled);
        assert_eq!(config.gates.max_task_fix_cycles, 5);
        assert_eq!(config.gates.max_milestone_fix_cycles, 2);
        assert_eq!(config.checkpoints.retention, 4);
    }

    #[test]
    fn test_validate_warnings() {
        let config = WaypointToml::parse("[gates]\nmax_task_fix_cycles = 0\n[checkpoints]\nretention = 0\n").unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("max_task_fix_cycles"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(WaypointToml::parse("[gates\nbroken").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = WaypointToml::default();
        config.gates.reviewer_timeout_secs = 30;
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(WaypointToml::load_or_default(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_fix_cycle_layering() {
        let dir = tempdir().unwrap();
        let mut config = WaypointConfig::new(dir.path().to_path_buf()).unwrap();
        config.env_max_fix_cycles = Some(5);
        assert_eq!(config.fix_cycle_policy().max_task, 5);
        let config = config.with_cli_max_fix_cycles(Some(1));
        assert_eq!(config.fix_cycle_policy().max_task, 1);
        assert_eq!(config.fix_cycle_policy().max_milestone, 2);
    }

    #[test]
    fn test_parse_fix_cycle_override() {
        assert_eq!(parse_fix_cycle_override(Some(" 4 ")), Some(4));
        assert_eq!(parse_fix_cycle_override(Some("many")), None);
        assert_eq!(parse_fix_cycle_override(None), None);
    }
}
