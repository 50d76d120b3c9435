//! In-memory decision store.

use crate::errors::DecisionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// A single recorded project decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// `PREFIX-NN` identifier
    pub id: String,
    pub prefix: String,
    pub text: String,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
    /// Decision this one replaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    /// Decision that replaced this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

impl Decision {
    /// Whether a newer decision has replaced this one.
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }

    /// Sequence number parsed from the id.
    pub fn seq(&self) -> u32 {
        parse_id(&self.id).map(|(_, n)| n).unwrap_or(0)
    }
}

/// Format a decision id. Numbers are zero padded to two digits.
pub fn format_id(prefix: &str, seq: u32) -> String {
    format!("{}-{:02}", prefix, seq)
}

/// Split a decision id into prefix and sequence number.
pub fn parse_id(id: &str) -> Option<(&str, u32)> {
    let (prefix, num) = id.rsplit_once('-')?;
    if validate_prefix(prefix).is_err() {
        return None;
    }
    num.parse().ok().map(|n| (prefix, n))
}

/// Check a prefix: uppercase ASCII letters and digits, starting with a letter.
pub fn validate_prefix(prefix: &str) -> Result<(), DecisionError> {
    let mut chars = prefix.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(DecisionError::InvalidPrefix(prefix.to_string()))
    }
}

/// Point-in-time copy of the store used by checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub decisions: Vec<Decision>,
    pub counters: BTreeMap<String, u32>,
}

/// Append-only decision ledger.
///
/// `decisions` holds the visible ledger in issue order. Decisions hidden by a
/// rollback move to `retired`: they are no longer listed but stay reachable
/// through [`DecisionStore::history`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStore {
    decisions: Vec<Decision>,
    #[serde(default)]
    retired: Vec<Decision>,
    counters: BTreeMap<String, u32>,
}

impl DecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted parts.
    ///
    /// Counters never fall below the highest sequence number seen for a prefix,
    /// so a missing or stale counters file cannot cause id reuse.
    pub fn from_parts(
        mut decisions: Vec<Decision>,
        retired: Vec<Decision>,
        counters: BTreeMap<String, u32>,
    ) -> Self {
        let mut counters = counters;
        for d in decisions.iter().chain(retired.iter()) {
            let seen = counters.entry(d.prefix.clone()).or_insert(0);
            *seen = (*seen).max(d.seq());
        }
        decisions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.prefix.cmp(&b.prefix))
                .then_with(|| a.seq().cmp(&b.seq()))
        });
        Self {
            decisions,
            retired,
            counters,
        }
    }

    /// Append a decision and return its new id.
    ///
    /// Fails with [`DecisionError::DuplicateRationale`] when the rationale is
    /// byte-identical to a visible decision under the same prefix. In that case
    /// nothing is stored and no sequence number is consumed.
    pub fn append(
        &mut self,
        prefix: &str,
        text: &str,
        rationale: &str,
    ) -> Result<String, DecisionError> {
        validate_prefix(prefix)?;
        if let Some(existing) = self
            .decisions
            .iter()
            .find(|d| d.prefix == prefix && d.rationale == rationale)
        {
            return Err(DecisionError::DuplicateRationale {
                prefix: prefix.to_string(),
                existing: existing.id.clone(),
            });
        }
        let id = self.issue(prefix, text, rationale, None);
        info!(id = %id, "Decision recorded");
        Ok(id)
    }

    /// Replace a decision with a new one under the same prefix.
    ///
    /// The old decision stays in the ledger, marked as superseded.
    pub fn supersede(&mut self, id: &str, new_text: &str) -> Result<String, DecisionError> {
        let old = self
            .decisions
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| DecisionError::UnknownDecision(id.to_string()))?;
        if let Some(by) = &old.superseded_by {
            return Err(DecisionError::AlreadySuperseded {
                id: id.to_string(),
                by: by.clone(),
            });
        }
        let prefix = old.prefix.clone();
        let rationale = old.rationale.clone();

        let new_id = self.issue(&prefix, new_text, &rationale, Some(id.to_string()));
        if let Some(old) = self.decisions.iter_mut().find(|d| d.id == id) {
            old.superseded_by = Some(new_id.clone());
        }
        info!(old = %id, new = %new_id, "Decision superseded");
        Ok(new_id)
    }

    fn issue(
        &mut self,
        prefix: &str,
        text: &str,
        rationale: &str,
        supersedes: Option<String>,
    ) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        let id = format_id(prefix, *counter);
        self.decisions.push(Decision {
            id: id.clone(),
            prefix: prefix.to_string(),
            text: text.to_string(),
            rationale: rationale.to_string(),
            created_at: Utc::now(),
            supersedes,
            superseded_by: None,
        });
        id
    }

    /// Visible decisions in issue order, superseded ones included.
    pub fn list(&self, prefix: Option<&str>) -> Vec<&Decision> {
        self.decisions
            .iter()
            .filter(|d| prefix.is_none_or(|p| d.prefix == p))
            .collect()
    }

    /// Visible decisions that have not been superseded.
    pub fn current(&self, prefix: Option<&str>) -> Vec<&Decision> {
        self.list(prefix)
            .into_iter()
            .filter(|d| !d.is_superseded())
            .collect()
    }

    /// Every decision ever issued, including ones hidden by rollback.
    pub fn history(&self, prefix: Option<&str>) -> Vec<&Decision> {
        let mut all: Vec<&Decision> = self
            .decisions
            .iter()
            .chain(self.retired.iter())
            .filter(|d| prefix.is_none_or(|p| d.prefix == p))
            .collect();
        all.sort_by(|a, b| a.prefix.cmp(&b.prefix).then_with(|| a.seq().cmp(&b.seq())));
        all
    }

    /// Look up a visible decision.
    pub fn get(&self, id: &str) -> Option<&Decision> {
        self.decisions.iter().find(|d| d.id == id)
    }

    /// Decisions hidden by rollback.
    pub fn retired(&self) -> &[Decision] {
        &self.retired
    }

    /// Prefixes with at least one visible or retired decision.
    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self
            .decisions
            .iter()
            .chain(self.retired.iter())
            .map(|d| d.prefix.clone())
            .collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes
    }

    /// Highest sequence number issued for a prefix.
    pub fn counter(&self, prefix: &str) -> u32 {
        self.counters.get(prefix).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> &BTreeMap<String, u32> {
        &self.counters
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Copy the visible ledger and counters.
    pub fn snapshot(&self) -> DecisionSnapshot {
        DecisionSnapshot {
            decisions: self.decisions.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Revert the visible ledger to a snapshot.
    ///
    /// Decisions issued after the snapshot are retired rather than deleted,
    /// and counters keep their highest value so ids are never reissued.
    pub fn restore(&mut self, snapshot: &DecisionSnapshot) {
        let keep: HashSet<&str> = snapshot.decisions.iter().map(|d| d.id.as_str()).collect();
        let known_retired: HashSet<String> = self.retired.iter().map(|d| d.id.clone()).collect();

        let mut hidden = 0;
        for decision in std::mem::take(&mut self.decisions) {
            if !keep.contains(decision.id.as_str()) && !known_retired.contains(&decision.id) {
                self.retired.push(decision);
                hidden += 1;
            }
        }
        self.decisions = snapshot.decisions.clone();
        self.retired.retain(|d| !keep.contains(d.id.as_str()));

        for (prefix, value) in &snapshot.counters {
            let counter = self.counters.entry(prefix.clone()).or_insert(0);
            *counter = (*counter).max(*value);
        }
        debug!(hidden, restored = self.decisions.len(), "Decision store restored");
    }
}
