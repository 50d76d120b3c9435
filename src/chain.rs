//! Append-only state chain (`state-chain/chain.json`).
//!
//! Every verdict a gate receives, and every task start, is recorded here in
//! arrival order. Entries are never rewritten, including across rollback.

use crate::atomic::write_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub seq: u64,
    /// Task or milestone id the entry belongs to
    pub task_id: String,
    pub stage: String,
    pub agent: String,
    pub verdict: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChainFile {
    entries: Vec<ChainEntry>,
}

pub struct StateChain {
    path: PathBuf,
    chain: ChainFile,
}

impl StateChain {
    /// Open the chain at `path`, reading existing entries if present.
    pub fn open(path: &Path) -> Result<Self> {
        let chain = if path.exists() {
            let content = fs::read_to_string(path).context("Failed to read state chain")?;
            serde_json::from_str(&content).context("Failed to parse state chain")?
        } else {
            ChainFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            chain,
        })
    }

    /// Append an entry and persist the chain.
    pub fn append(&mut self, task_id: &str, stage: &str, agent: &str, verdict: &str) -> Result<u64> {
        let seq = self.chain.entries.last().map_or(1, |e| e.seq + 1);
        self.chain.entries.push(ChainEntry {
            seq,
            task_id: task_id.to_string(),
            stage: stage.to_string(),
            agent: agent.to_string(),
            verdict: verdict.to_string(),
            recorded_at: Utc::now(),
        });
        self.save()?;
        Ok(seq)
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.chain.entries
    }

    pub fn for_task<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a ChainEntry> {
        self.chain.entries.iter().filter(move |e| e.task_id == task_id)
    }

    pub fn last(&self) -> Option<&ChainEntry> {
        self.chain.entries.last()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state chain directory: {}", parent.display())
            })?;
        }
        let json =
            serde_json::to_string_pretty(&self.chain).context("Failed to serialize state chain")?;
        write_atomic(&self.path, json).context("Failed to write state chain")?;
        Ok(())
    }
}
