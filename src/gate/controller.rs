//! Per-gate fix-cycle accounting.

use super::aggregate::Aggregate;
use super::verdict::Canonical;
use crate::errors::GateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

pub const DEFAULT_MAX_TASK_FIX_CYCLES: u32 = 3;
pub const DEFAULT_MAX_MILESTONE_FIX_CYCLES: u32 = 2;

/// Identity of a gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GateId {
    Task(String),
    Milestone(String),
    /// The optional QA pass after the last milestone
    Qa,
}

impl GateId {
    pub fn id(&self) -> &str {
        match self {
            Self::Task(id) | Self::Milestone(id) => id,
            Self::Qa => "qa",
        }
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task:{}", id),
            Self::Milestone(id) => write!(f, "milestone:{}", id),
            Self::Qa => write!(f, "qa"),
        }
    }
}

/// Fix-cycle caps per gate kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixCyclePolicy {
    pub max_task: u32,
    pub max_milestone: u32,
}

impl Default for FixCyclePolicy {
    fn default() -> Self {
        Self {
            max_task: DEFAULT_MAX_TASK_FIX_CYCLES,
            max_milestone: DEFAULT_MAX_MILESTONE_FIX_CYCLES,
        }
    }
}

impl FixCyclePolicy {
    pub fn max_for(&self, gate: &GateId) -> u32 {
        match gate {
            GateId::Task(_) => self.max_task,
            GateId::Milestone(_) | GateId::Qa => self.max_milestone,
        }
    }
}

/// The action a gate settles on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub gate: GateId,
    pub action: Canonical,
    /// Fix cycles used at this gate after the decision
    pub fix_cycle: u32,
    pub max_fix_cycles: u32,
    /// Escalation forced by the fix-cycle cap
    pub cap_reached: bool,
    pub aggregate: Aggregate,
}

impl GateDecision {
    pub fn reason(&self) -> String {
        if self.cap_reached {
            format!(
                "fix-cycle limit of {} reached ({})",
                self.max_fix_cycles,
                self.aggregate.reason()
            )
        } else {
            self.aggregate.reason()
        }
    }

    /// The terminal gate error, when the decision is an escalation.
    pub fn escalation(&self) -> Option<GateError> {
        (self.action == Canonical::Escalate).then(|| GateError::EscalationRequired {
            gate: self.gate.to_string(),
            reason: self.reason(),
        })
    }
}

/// Turns aggregates into decisions, tracking fix cycles per gate.
#[derive(Debug, Clone, Default)]
pub struct GateController {
    policy: FixCyclePolicy,
    counters: BTreeMap<String, u32>,
}

impl GateController {
    pub fn new(policy: FixCyclePolicy) -> Self {
        Self {
            policy,
            counters: BTreeMap::new(),
        }
    }

    /// Resume with counters persisted by an earlier run.
    pub fn with_counters(mut self, counters: BTreeMap<String, u32>) -> Self {
        self.counters = counters;
        self
    }

    pub fn policy(&self) -> FixCyclePolicy {
        self.policy
    }

    pub fn counters(&self) -> &BTreeMap<String, u32> {
        &self.counters
    }

    pub fn fix_cycles(&self, gate: &GateId) -> u32 {
        self.counters.get(&gate.to_string()).copied().unwrap_or(0)
    }

    /// Forget the fix cycles of a gate.
    pub fn reset(&mut self, gate: &GateId) {
        self.counters.remove(&gate.to_string());
    }

    /// Decide a gate.
    ///
    /// FIX_CYCLE increments the gate's counter; once the counter has reached
    /// the maximum the next FIX_CYCLE escalates instead. PROCEED resets it.
    pub fn evaluate(&mut self, gate: &GateId, aggregate: Aggregate) -> GateDecision {
        let key = gate.to_string();
        let max = self.policy.max_for(gate);
        let used = self.counters.get(&key).copied().unwrap_or(0);

        let (action, fix_cycle, cap_reached) = match aggregate.outcome {
            Canonical::Proceed => {
                self.counters.remove(&key);
                (Canonical::Proceed, 0, false)
            }
            Canonical::FixCycle if used >= max => (Canonical::Escalate, used, true),
            Canonical::FixCycle => {
                self.counters.insert(key, used + 1);
                (Canonical::FixCycle, used + 1, false)
            }
            Canonical::Escalate => (Canonical::Escalate, used, false),
        };

        let decision = GateDecision {
            gate: gate.clone(),
            action,
            fix_cycle,
            max_fix_cycles: max,
            cap_reached,
            aggregate,
        };
        if action == Canonical::Escalate {
            warn!(gate = %gate, reason = %decision.reason(), "Gate escalated");
        } else {
            info!(gate = %gate, action = %action, fix_cycle, max, "Gate decided");
        }
        decision
    }
}
