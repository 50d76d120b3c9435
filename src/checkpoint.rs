//! Bounded checkpoint history with rollback.
//!
//! A checkpoint is a pure copy of the decision ledger, the task queue and the
//! current artifact pointers. The newest `retention` checkpoints are kept;
//! inserting past the bound evicts the oldest. Sequence numbers keep counting
//! across evictions, so a `seq` always names the same checkpoint.

use crate::atomic::write_atomic;
use crate::artifacts::{ArtifactStore, ArtifactVersions};
use crate::decisions::{DecisionSnapshot, DecisionStore};
use crate::errors::CheckpointError;
use crate::queue::{QueueSnapshot, TaskQueue};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_RETENTION: usize = 10;

/// State captured by a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub decisions: DecisionSnapshot,
    pub queue: QueueSnapshot,
    #[serde(default)]
    pub artifacts: ArtifactVersions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub seq: u64,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManager {
    #[serde(skip, default = "default_retention")]
    retention: usize,
    next_seq: u64,
    checkpoints: VecDeque<Checkpoint>,
}

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl CheckpointManager {
    /// A retention of zero is treated as one.
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            next_seq: 1,
            checkpoints: VecDeque::new(),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Copy current state into a new checkpoint, evicting the oldest first
    /// when the history is full.
    pub fn snapshot(
        &mut self,
        decisions: &DecisionStore,
        queue: &TaskQueue,
        artifacts: &ArtifactStore,
        label: &str,
    ) -> &Checkpoint {
        while self.checkpoints.len() >= self.retention {
            if let Some(evicted) = self.checkpoints.pop_front() {
                debug!(seq = evicted.seq, "Checkpoint evicted");
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.checkpoints.push_back(Checkpoint {
            seq,
            label: label.to_string(),
            created_at: Utc::now(),
            snapshot: Snapshot {
                decisions: decisions.snapshot(),
                queue: queue.snapshot(),
                artifacts: artifacts.versions(),
            },
        });
        info!(seq, label, "Checkpoint created");
        &self.checkpoints[self.checkpoints.len() - 1]
    }

    /// Restore state from checkpoint `seq` (the latest when `None`) and drop
    /// every newer checkpoint. Returns the restored sequence number.
    ///
    /// Nothing is mutated when the target is unknown or invalid.
    pub fn rollback(
        &mut self,
        seq: Option<u64>,
        decisions: &mut DecisionStore,
        queue: &mut TaskQueue,
        artifacts: &mut ArtifactStore,
    ) -> Result<u64, CheckpointError> {
        let target = match seq {
            Some(seq) => self.get(seq).ok_or(CheckpointError::UnknownCheckpoint(seq))?,
            None => self.latest().ok_or(CheckpointError::NoCheckpoints)?,
        };
        let seq = target.seq;
        let restored_queue = TaskQueue::from_snapshot(&target.snapshot.queue)
            .map_err(|source| CheckpointError::InvalidQueue { seq, source })?;

        decisions.restore(&target.snapshot.decisions);
        artifacts.restore_versions(&target.snapshot.artifacts);
        *queue = restored_queue;

        let before = self.checkpoints.len();
        self.checkpoints.retain(|c| c.seq <= seq);
        info!(
            seq,
            dropped = before - self.checkpoints.len(),
            "Rolled back to checkpoint"
        );
        Ok(seq)
    }

    pub fn latest(&self) -> Option<&Checkpoint> {
        self.checkpoints.back()
    }

    pub fn get(&self, seq: u64) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.seq == seq)
    }

    /// Retained checkpoints, oldest first.
    pub fn list(&self) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Load `checkpoints.json`, applying the configured retention.
    pub fn load(path: &Path, retention: usize) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(retention));
        }
        let content = fs::read_to_string(path).context("Failed to read checkpoints")?;
        let mut manager: CheckpointManager =
            serde_json::from_str(&content).context("Failed to parse checkpoints")?;
        manager.retention = retention.max(1);
        while manager.checkpoints.len() > manager.retention {
            manager.checkpoints.pop_front();
        }
        if let Some(last) = manager.checkpoints.back() {
            manager.next_seq = manager.next_seq.max(last.seq + 1);
        }
        Ok(manager)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize checkpoints")?;
        write_atomic(path, content).context("Failed to write checkpoints")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactType;
    use crate::queue::Task;
    use tempfile::tempdir;

    struct State {
        decisions: DecisionStore,
        queue: TaskQueue,
        artifacts: ArtifactStore,
    }

    fn state() -> State {
        State {
            decisions: DecisionStore::new(),
            queue: TaskQueue::load(
                vec![],
                vec![Task::new("T1", "One"), Task::new("T2", "Two").with_depends_on(&["T1"])],
            )
            .unwrap(),
            artifacts: ArtifactStore::new(),
        }
    }

    fn checkpoint(manager: &mut CheckpointManager, s: &State, label: &str) -> u64 {
        manager.snapshot(&s.decisions, &s.queue, &s.artifacts, label).seq
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let s = state();
        let mut manager = CheckpointManager::new(3);
        for i in 0..5 {
            checkpoint(&mut manager, &s, &format!("cp{}", i));
        }
        let seqs: Vec<u64> = manager.list().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert!(manager.get(1).is_none());
    }

    #[test]
    fn test_rollback_restores_state_and_drops_newer() {
        let mut s = state();
        let mut manager = CheckpointManager::default();
        s.decisions.append("GEN", "Ship a CLI", "Terminal users").unwrap();
        s.artifacts.store(ArtifactType::BrandGuide, "v1");
        let first = checkpoint(&mut manager, &s, "after GEN");

        s.decisions.append("GEN", "Use Rust", "Speed").unwrap();
        s.artifacts.store(ArtifactType::BrandGuide, "v2");
        s.queue.begin("T1").unwrap();
        s.queue.complete("T1").unwrap();
        checkpoint(&mut manager, &s, "after T1");

        let restored = manager
            .rollback(Some(first), &mut s.decisions, &mut s.queue, &mut s.artifacts)
            .unwrap();
        assert_eq!(restored, first);
        assert_eq!(manager.len(), 1);
        assert_eq!(s.decisions.list(None).len(), 1);
        assert_eq!(s.queue.get("T1").unwrap().state, crate::queue::TaskState::Pending);
        assert_eq!(s.artifacts.current(ArtifactType::BrandGuide).unwrap().content, "v1");

        // Ids are never reissued after rollback.
        assert_eq!(s.decisions.append("GEN", "Use Go", "Simplicity").unwrap(), "GEN-03");
    }

    #[test]
    fn test_rollback_defaults_to_latest() {
        let mut s = state();
        let mut manager = CheckpointManager::default();
        checkpoint(&mut manager, &s, "a");
        let latest = checkpoint(&mut manager, &s, "b");
        s.queue.begin("T1").unwrap();
        let seq = manager
            .rollback(None, &mut s.decisions, &mut s.queue, &mut s.artifacts)
            .unwrap();
        assert_eq!(seq, latest);
        assert!(s.queue.active().is_none());
    }

    #[test]
    fn test_rollback_errors() {
        let mut s = state();
        let mut manager = CheckpointManager::default();
        assert_eq!(
            manager.rollback(None, &mut s.decisions, &mut s.queue, &mut s.artifacts),
            Err(CheckpointError::NoCheckpoints)
        );
        checkpoint(&mut manager, &s, "a");
        assert_eq!(
            manager.rollback(Some(42), &mut s.decisions, &mut s.queue, &mut s.artifacts),
            Err(CheckpointError::UnknownCheckpoint(42))
        );
    }

    #[test]
    fn test_seq_survives_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let s = state();
        let mut manager = CheckpointManager::new(2);
        for _ in 0..3 {
            checkpoint(&mut manager, &s, "cp");
        }
        manager.save(&path).unwrap();

        let mut loaded = CheckpointManager::load(&path, 2).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(checkpoint(&mut loaded, &s, "next"), 4);
    }

    #[test]
    fn test_load_with_smaller_retention_trims() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let s = state();
        let mut manager = CheckpointManager::new(5);
        for _ in 0..5 {
            checkpoint(&mut manager, &s, "cp");
        }
        manager.save(&path).unwrap();
        let loaded = CheckpointManager::load(&path, 2).unwrap();
        assert_eq!(loaded.list().map(|c| c.seq).collect::<Vec<_>>(), vec![4, 5]);
    }
}
