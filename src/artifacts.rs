//! Versioned artifact store.
//!
//! Artifacts are the long-form documents specialists produce and tasks
//! reference: brand guide, style guide, competition analysis and domain
//! knowledge. Each store of a type adds a new version; older versions are kept
//! so a checkpoint can point the "current" version back at them.

use crate::atomic::write_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// The kinds of artifact the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    BrandGuide,
    StyleGuide,
    CompetitionAnalysis,
    DomainKnowledge,
}

impl ArtifactType {
    pub fn all() -> &'static [ArtifactType] {
        &[
            ArtifactType::BrandGuide,
            ArtifactType::StyleGuide,
            ArtifactType::CompetitionAnalysis,
            ArtifactType::DomainKnowledge,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::BrandGuide => "brand-guide",
            ArtifactType::StyleGuide => "style-guide",
            ArtifactType::CompetitionAnalysis => "competition-analysis",
            ArtifactType::DomainKnowledge => "domain-knowledge",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "brand-guide" => Ok(ArtifactType::BrandGuide),
            "style-guide" => Ok(ArtifactType::StyleGuide),
            "competition-analysis" => Ok(ArtifactType::CompetitionAnalysis),
            "domain-knowledge" => Ok(ArtifactType::DomainKnowledge),
            _ => anyhow::bail!(
                "Invalid artifact type '{}'. Valid values: brand-guide, style-guide, competition-analysis, domain-knowledge",
                s
            ),
        }
    }
}

/// One stored version of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub version: u32,
    /// Content is kept out of the index and written to its own file.
    #[serde(skip)]
    pub content: String,
    pub sha256: String,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ArtifactSeries {
    /// Version that readers see as current
    current: u32,
    versions: Vec<Artifact>,
}

/// Versioned blob store with one current version per type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStore {
    series: BTreeMap<ArtifactType, ArtifactSeries>,
}

/// Current version pointer per type, captured by checkpoints.
pub type ArtifactVersions = BTreeMap<ArtifactType, u32>;

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store new content for a type and return the new version number.
    ///
    /// Versions continue from the highest stored version, even when a
    /// rollback moved the current pointer back.
    pub fn store(&mut self, artifact_type: ArtifactType, content: &str) -> u32 {
        let series = self.series.entry(artifact_type).or_default();
        let version = series.versions.last().map_or(1, |a| a.version + 1);
        series.versions.push(Artifact {
            artifact_type,
            version,
            content: content.to_string(),
            sha256: digest(content),
            stored_at: Utc::now(),
        });
        series.current = version;
        info!(artifact = %artifact_type, version, "Artifact stored");
        version
    }

    /// The current version of a type, if any was stored.
    pub fn current(&self, artifact_type: ArtifactType) -> Option<&Artifact> {
        let series = self.series.get(&artifact_type)?;
        series.versions.iter().find(|a| a.version == series.current)
    }

    /// A specific retained version.
    pub fn version(&self, artifact_type: ArtifactType, version: u32) -> Option<&Artifact> {
        self.series
            .get(&artifact_type)?
            .versions
            .iter()
            .find(|a| a.version == version)
    }

    /// Every retained version of a type, oldest first.
    pub fn history(&self, artifact_type: ArtifactType) -> &[Artifact] {
        self.series
            .get(&artifact_type)
            .map_or(&[], |s| s.versions.as_slice())
    }

    pub fn has(&self, artifact_type: ArtifactType) -> bool {
        self.current(artifact_type).is_some()
    }

    /// Current version pointers.
    pub fn versions(&self) -> ArtifactVersions {
        self.series
            .iter()
            .filter(|(_, s)| s.current > 0)
            .map(|(t, s)| (*t, s.current))
            .collect()
    }

    /// Point each type back at the version recorded in a checkpoint.
    ///
    /// Types absent from the checkpoint have no current version afterwards.
    /// Stored versions are never dropped.
    pub fn restore_versions(&mut self, versions: &ArtifactVersions) {
        for (artifact_type, series) in self.series.iter_mut() {
            series.current = versions.get(artifact_type).copied().unwrap_or(0);
        }
    }

    /// Load the index and every version's content from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let index_path = dir.join("index.json");
        if !index_path.exists() {
            return Ok(Self::new());
        }
        let content =
            fs::read_to_string(&index_path).context("Failed to read artifact index")?;
        let mut store: ArtifactStore =
            serde_json::from_str(&content).context("Failed to parse artifact index")?;

        for (artifact_type, series) in store.series.iter_mut() {
            for artifact in series.versions.iter_mut() {
                let path = version_path(dir, *artifact_type, artifact.version);
                artifact.content = fs::read_to_string(&path).with_context(|| {
                    format!("Failed to read artifact content: {}", path.display())
                })?;
            }
        }
        Ok(store)
    }

    /// Save the index and any version files not yet on disk.
    pub fn save(&self, dir: &Path) -> Result<()> {
        for (artifact_type, series) in &self.series {
            let type_dir = dir.join(artifact_type.as_str());
            fs::create_dir_all(&type_dir).with_context(|| {
                format!("Failed to create artifact directory: {}", type_dir.display())
            })?;
            for artifact in &series.versions {
                let path = version_path(dir, *artifact_type, artifact.version);
                if !path.exists() {
                    write_atomic(&path, &artifact.content).with_context(|| {
                        format!("Failed to write artifact content: {}", path.display())
                    })?;
                }
            }
        }
        let index = serde_json::to_string_pretty(self).context("Failed to serialize artifact index")?;
        fs::create_dir_all(dir).context("Failed to create artifacts directory")?;
        write_atomic(&dir.join("index.json"), index).context("Failed to write artifact index")?;
        Ok(())
    }
}

fn version_path(dir: &Path, artifact_type: ArtifactType, version: u32) -> std::path::PathBuf {
    dir.join(artifact_type.as_str()).join(format!("v{}.md", version))
}

fn digest(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_increments_version() {
        let mut store = ArtifactStore::new();
        assert_eq!(store.store(ArtifactType::BrandGuide, "v1"), 1);
        assert_eq!(store.store(ArtifactType::BrandGuide, "v2"), 2);
        assert_eq!(store.store(ArtifactType::StyleGuide, "s1"), 1);

        assert_eq!(store.current(ArtifactType::BrandGuide).unwrap().content, "v2");
        assert_eq!(store.version(ArtifactType::BrandGuide, 1).unwrap().content, "v1");
        assert_eq!(store.history(ArtifactType::BrandGuide).len(), 2);
    }

    #[test]
    fn test_restore_versions_moves_pointer_only() {
        let mut store = ArtifactStore::new();
        store.store(ArtifactType::DomainKnowledge, "first");
        let pointers = store.versions();
        store.store(ArtifactType::DomainKnowledge, "second");
        store.store(ArtifactType::CompetitionAnalysis, "rivals");

        store.restore_versions(&pointers);
        assert_eq!(
            store.current(ArtifactType::DomainKnowledge).unwrap().content,
            "first"
        );
        assert!(!store.has(ArtifactType::CompetitionAnalysis));
        assert_eq!(store.history(ArtifactType::DomainKnowledge).len(), 2);

        // New stores never reuse a version number.
        assert_eq!(store.store(ArtifactType::DomainKnowledge, "third"), 3);
    }

    #[test]
    fn test_digest_is_recorded() {
        let mut store = ArtifactStore::new();
        store.store(ArtifactType::StyleGuide, "abc");
        assert_eq!(
            store.current(ArtifactType::StyleGuide).unwrap().sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut store = ArtifactStore::new();
        store.store(ArtifactType::BrandGuide, "# Brand\nBold colors");
        store.store(ArtifactType::BrandGuide, "# Brand\nMuted colors");
        store.save(dir.path()).unwrap();

        assert!(dir.path().join("brand-guide/v1.md").exists());
        let loaded = ArtifactStore::load(dir.path()).unwrap();
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_artifact_type_from_str() {
        assert_eq!(
            "brand-guide".parse::<ArtifactType>().unwrap(),
            ArtifactType::BrandGuide
        );
        assert_eq!(
            "DOMAIN_KNOWLEDGE".parse::<ArtifactType>().unwrap(),
            ArtifactType::DomainKnowledge
        );
        assert!("logo".parse::<ArtifactType>().is_err());
    }
}
