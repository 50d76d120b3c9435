//! The phase state machine driving one pipeline run.

use super::phase::{Phase, Stage};
use super::status::{PipelineStatus, phase_entries};
use crate::artifacts::{ArtifactStore, ArtifactType};
use crate::chain::StateChain;
use crate::checkpoint::CheckpointManager;
use crate::decisions::{DecisionStore, GENERAL_PREFIX, validate_prefix};
use crate::errors::{DecisionError, PipelineError, QueueError};
use crate::gate::{
    Canonical, FixCyclePolicy, GateController, GateDecision, GateId, Reviewer, Verdict, aggregate,
    collect,
};
use crate::queue::{MilestoneState, Task, TaskQueue, TaskState};
use crate::session::{DraftDecision, SessionStatus, SpecialistSession};
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything a run reads and writes besides its own phase.
pub struct RunStores {
    pub decisions: DecisionStore,
    pub artifacts: ArtifactStore,
    pub queue: TaskQueue,
    pub checkpoints: CheckpointManager,
    pub session: Option<SpecialistSession>,
    pub chain: StateChain,
}

/// Result of a gate evaluated by the run.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub decision: GateDecision,
    /// Phase after the gate
    pub phase: Phase,
    /// Checkpoint created by a passing gate
    pub checkpoint: Option<u64>,
}

impl GateOutcome {
    pub fn action(&self) -> Canonical {
        self.decision.action
    }

    /// What to fix before the gate is retried.
    pub fn fix_instruction(&self) -> Option<String> {
        if self.decision.action != Canonical::FixCycle {
            return None;
        }
        let mut lines = vec![format!(
            "Fix cycle {}/{} for {}: {}",
            self.decision.fix_cycle,
            self.decision.max_fix_cycles,
            self.decision.gate,
            self.decision.reason()
        )];
        for finding in &self.decision.aggregate.findings {
            lines.push(format!(
                "- [{}] {}: {}",
                finding.severity, finding.location, finding.description
            ));
        }
        Some(lines.join("\n"))
    }

    /// Turn an escalation into the terminal gate error.
    pub fn into_result(self) -> Result<Self, PipelineError> {
        match self.decision.escalation() {
            Some(e) => Err(e.into()),
            None => Ok(self),
        }
    }
}

/// Outcome of storing a batch of decisions.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub stored: Vec<String>,
    /// Advisory rejections; nothing was stored for these
    pub warnings: Vec<DecisionError>,
}

/// One pipeline run: the phase plus every store the phases act on.
///
/// The run owns the active task; the queue is consulted for eligibility and
/// lifecycle guards.
pub struct ActivePipelineRun {
    run_id: Uuid,
    pipeline_type: String,
    phase: Phase,
    last_stage: Option<Stage>,
    active_milestone: Option<String>,
    qa_enabled: bool,
    decisions: DecisionStore,
    artifacts: ArtifactStore,
    queue: TaskQueue,
    checkpoints: CheckpointManager,
    gates: GateController,
    session: Option<SpecialistSession>,
    chain: StateChain,
}

impl ActivePipelineRun {
    /// Start a fresh run in `discovery`.
    pub fn start(
        pipeline_type: &str,
        stores: RunStores,
        policy: FixCyclePolicy,
        qa_enabled: bool,
    ) -> Self {
        Self::resume_from(PipelineStatus::new(pipeline_type), stores, policy, qa_enabled)
    }

    /// Continue a run from its persisted status.
    pub fn resume_from(
        status: PipelineStatus,
        stores: RunStores,
        policy: FixCyclePolicy,
        qa_enabled: bool,
    ) -> Self {
        Self {
            run_id: status.run_id,
            pipeline_type: status.pipeline_type,
            phase: status.phase,
            last_stage: status.last_stage.or(status.phase.stage()),
            active_milestone: status.active_milestone,
            qa_enabled,
            decisions: stores.decisions,
            artifacts: stores.artifacts,
            queue: stores.queue,
            checkpoints: stores.checkpoints,
            gates: GateController::new(policy).with_counters(status.fix_cycles),
            session: stores.session,
            chain: stores.chain,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn decisions(&self) -> &DecisionStore {
        &self.decisions
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn gates(&self) -> &GateController {
        &self.gates
    }

    pub fn session(&self) -> Option<&SpecialistSession> {
        self.session.as_ref()
    }

    pub fn chain(&self) -> &StateChain {
        &self.chain
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.queue.active()
    }

    pub fn active_milestone(&self) -> Option<&str> {
        self.active_milestone.as_deref()
    }

    /// Snapshot of the run for `pipeline-status.json`.
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            run_id: self.run_id,
            pipeline_type: self.pipeline_type.clone(),
            current_phase: self.phase.name().to_string(),
            phase: self.phase,
            phases: phase_entries(self.phase, self.last_stage, self.qa_enabled),
            active_task: self.active_task().map(|t| t.id.clone()),
            active_milestone: self.active_milestone.clone(),
            fix_cycles: self.gates.counters().clone(),
            last_stage: self.last_stage,
            updated_at: Utc::now(),
        }
    }

    // Phase progression

    /// Move to the next stage, checking the inputs it needs.
    pub fn advance(&mut self) -> Result<Stage, PipelineError> {
        let stage = self.phase.stage().ok_or_else(|| self.invalid("advance"))?;
        let next = stage.manual_successor().ok_or_else(|| self.invalid("advance"))?;

        match next {
            Stage::SpecialistRounds => {
                if self.decisions.current(Some(GENERAL_PREFIX)).is_empty() {
                    return Err(missing(next, "at least one GEN decision"));
                }
            }
            Stage::Synthesize => {
                if let Some(session) = self.session.as_ref().filter(|s| s.is_active()) {
                    return Err(PipelineError::InvalidPhase {
                        action: "advance".to_string(),
                        phase: format!(
                            "{} with specialist {} still active",
                            stage, session.specialist
                        ),
                    });
                }
                let has_specialist_decision = self
                    .decisions
                    .current(None)
                    .iter()
                    .any(|d| d.prefix != GENERAL_PREFIX);
                if !has_specialist_decision {
                    return Err(missing(next, "at least one decision beyond GEN"));
                }
            }
            Stage::ExecuteTasks => {
                if self.queue.is_empty() {
                    return Err(missing(next, "a non-empty task queue"));
                }
            }
            _ => {}
        }

        self.set_phase(Phase::at(next));
        self.chain.append("run", "advance", "waypoint", next.as_str())?;
        info!(from = %stage, to = %next, "Pipeline advanced");
        Ok(next)
    }

    /// Re-enter the stage an escalation halted. Blocked tasks are re-queued.
    pub fn resume(&mut self) -> Result<Stage, PipelineError> {
        let Phase::BlockedOnUser { resume_to } = self.phase else {
            return Err(self.invalid("resume"));
        };

        let blocked: Vec<String> = self
            .queue
            .tasks()
            .iter()
            .filter(|t| t.state == TaskState::Blocked)
            .map(|t| t.id.clone())
            .collect();
        for id in blocked {
            self.queue.requeue(&id)?;
            self.gates.reset(&GateId::Task(id));
        }
        match resume_to {
            Stage::MilestoneReview => {
                if let Some(m) = self.active_milestone.clone() {
                    self.queue.set_milestone_state(&m, MilestoneState::Active)?;
                    self.gates.reset(&GateId::Milestone(m));
                }
            }
            Stage::QaPass => self.gates.reset(&GateId::Qa),
            _ => {}
        }

        self.set_phase(Phase::at(resume_to));
        self.chain.append("run", "resume", "human", resume_to.as_str())?;
        info!(stage = %resume_to, "Pipeline resumed");
        Ok(resume_to)
    }

    /// Abort between tasks, returning state to the last checkpoint.
    ///
    /// Returns the restored checkpoint, if there was one.
    pub fn abort(&mut self) -> Result<Option<u64>, PipelineError> {
        if let Some(task) = self.queue.active() {
            return Err(PipelineError::AbortMidTask(task.id.clone()));
        }
        if self.phase.is_terminal() {
            return Err(self.invalid("abort"));
        }

        let restored = if self.checkpoints.is_empty() {
            None
        } else {
            Some(self.checkpoints.rollback(
                None,
                &mut self.decisions,
                &mut self.queue,
                &mut self.artifacts,
            )?)
        };
        self.phase = Phase::Aborted;
        self.chain.append("run", "abort", "human", "aborted")?;
        warn!(checkpoint = ?restored, "Pipeline aborted");
        Ok(restored)
    }

    // Specialist rounds

    /// Open (or re-open) a specialist session.
    pub fn begin_specialist(
        &mut self,
        specialist: &str,
        focus_area: &str,
    ) -> Result<&SpecialistSession, PipelineError> {
        self.require(Stage::SpecialistRounds, "begin a specialist")?;
        let resume_existing = match self.session.as_ref().filter(|s| s.is_active()) {
            Some(s) if s.specialist == specialist => true,
            Some(s) => {
                return Err(PipelineError::InvalidPhase {
                    action: format!("begin specialist {}", specialist),
                    phase: format!("specialist_rounds with {} active", s.specialist),
                });
            }
            None => false,
        };
        if !resume_existing {
            self.session = Some(SpecialistSession::new(specialist, focus_area));
            info!(specialist, focus_area, "Specialist session started");
        }
        self.active_session()
    }

    /// Add a draft decision to the open session.
    pub fn draft_decision(
        &mut self,
        prefix: &str,
        text: &str,
        rationale: &str,
    ) -> Result<usize, PipelineError> {
        validate_prefix(prefix)?;
        let session = self.active_session_mut("draft a decision")?;
        session.draft_decisions.push(DraftDecision {
            prefix: prefix.to_string(),
            text: text.to_string(),
            rationale: rationale.to_string(),
        });
        Ok(session.draft_decisions.len())
    }

    /// Record a question for the human, answered outside the run.
    pub fn ask_question(&mut self, question: &str) -> Result<(), PipelineError> {
        let session = self.active_session_mut("ask a question")?;
        session.pending_questions.push(question.to_string());
        Ok(())
    }

    /// Flush the session's drafts into the decision store and close it.
    pub fn finish_specialist(&mut self) -> Result<BatchReport, PipelineError> {
        let drafts = self.active_session_mut("finish a specialist")?.draft_decisions.clone();
        let report = self.store_decisions(&drafts)?;

        let session = self.active_session_mut("finish a specialist")?;
        session.status = SessionStatus::Complete;
        session.draft_decisions.clear();
        session.last_gate = Some(format!("finished {}", Utc::now().to_rfc3339()));
        let label = format!("specialist {}", session.specialist);
        self.checkpoint(&label);
        Ok(report)
    }

    fn active_session(&self) -> Result<&SpecialistSession, PipelineError> {
        self.session
            .as_ref()
            .filter(|s| s.is_active())
            .ok_or_else(|| PipelineError::InvalidPhase {
                action: "use a specialist session".to_string(),
                phase: "no active specialist session".to_string(),
            })
    }

    fn active_session_mut(&mut self, action: &str) -> Result<&mut SpecialistSession, PipelineError> {
        self.session
            .as_mut()
            .filter(|s| s.is_active())
            .ok_or_else(|| PipelineError::InvalidPhase {
                action: action.to_string(),
                phase: "no active specialist session".to_string(),
            })
    }

    // Decisions and artifacts

    /// Append a batch of decisions. Duplicate rationales are reported as
    /// warnings and skipped; the rest of the batch is still stored.
    pub fn store_decisions(&mut self, drafts: &[DraftDecision]) -> Result<BatchReport, PipelineError> {
        for draft in drafts {
            validate_prefix(&draft.prefix)?;
        }
        let mut report = BatchReport::default();
        for draft in drafts {
            match self.decisions.append(&draft.prefix, &draft.text, &draft.rationale) {
                Ok(id) => report.stored.push(id),
                Err(e) if e.is_warning() => {
                    warn!(prefix = %draft.prefix, error = %e, "Decision skipped");
                    report.warnings.push(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(report)
    }

    pub fn supersede_decision(&mut self, id: &str, new_text: &str) -> Result<String, PipelineError> {
        Ok(self.decisions.supersede(id, new_text)?)
    }

    pub fn store_artifact(&mut self, artifact_type: ArtifactType, content: &str) -> u32 {
        self.artifacts.store(artifact_type, content)
    }

    // Task execution

    /// Begin the next eligible task, if any.
    pub fn start_next_task(&mut self) -> Result<Option<Task>, PipelineError> {
        self.require(Stage::ExecuteTasks, "start a task")?;
        let Some(next) = self.queue.next_eligible().map(|t| t.id.clone()) else {
            return Ok(None);
        };
        self.begin_task(&next).map(Some)
    }

    /// Begin a specific task.
    pub fn begin_task(&mut self, id: &str) -> Result<Task, PipelineError> {
        self.require(Stage::ExecuteTasks, "start a task")?;
        let task = self.queue.begin(id)?.clone();
        self.gates.reset(&GateId::Task(task.id.clone()));

        if let Some(ref m) = task.milestone {
            let state = self.queue.milestone(m).map(|m| m.state);
            if matches!(state, Some(MilestoneState::Pending | MilestoneState::Fixable)) {
                self.queue.set_milestone_state(m, MilestoneState::Active)?;
            }
        }
        self.chain.append(&task.id, "start", "waypoint", TaskState::InProgress.as_str())?;
        Ok(task)
    }

    pub fn defer_task(&mut self, id: &str, reason: &str) -> Result<(), PipelineError> {
        self.queue.defer(id, reason)?;
        self.gates.reset(&GateId::Task(id.to_string()));
        self.chain.append(id, "defer", "human", reason)?;
        Ok(())
    }

    pub fn requeue_task(&mut self, id: &str) -> Result<(), PipelineError> {
        self.queue.requeue(id)?;
        self.chain.append(id, "requeue", "human", TaskState::Pending.as_str())?;
        Ok(())
    }

    // Gates

    /// Evaluate the gate of the in-progress task.
    ///
    /// PROCEED completes the task and checkpoints; a finished milestone then
    /// goes to review. FIX_CYCLE leaves the task in progress. ESCALATE blocks
    /// the task and halts the run.
    pub fn submit_task_verdicts(
        &mut self,
        task_id: &str,
        verdicts: Vec<Verdict>,
        missing: Vec<String>,
    ) -> Result<GateOutcome, PipelineError> {
        self.require(Stage::ExecuteTasks, "gate a task")?;
        let task = self
            .queue
            .get(task_id)
            .ok_or_else(|| QueueError::UnknownTask(task_id.to_string()))?;
        if task.state != TaskState::InProgress {
            return Err(QueueError::InvalidTransition {
                task: task_id.to_string(),
                from: task.state.to_string(),
                to: TaskState::Done.to_string(),
            }
            .into());
        }
        let milestone = task.milestone.clone();

        self.record_verdicts(task_id, &verdicts, &missing)?;
        let gate = GateId::Task(task_id.to_string());
        let decision = self.gates.evaluate(&gate, aggregate(&verdicts, &missing));

        let mut checkpoint = None;
        match decision.action {
            Canonical::Proceed => {
                self.queue.complete(task_id)?;
                checkpoint = Some(self.checkpoint(&format!("task {} passed", task_id)));
                if let Some(m) = milestone
                    && self.queue.milestone_finished(&m)?
                {
                    info!(milestone = %m, "Milestone ready for review");
                    self.active_milestone = Some(m);
                    self.set_phase(Phase::at(Stage::MilestoneReview));
                } else if self.queue.is_finished() {
                    self.set_phase(Phase::at(self.after_last_milestone()));
                }
            }
            Canonical::FixCycle => {}
            Canonical::Escalate => {
                self.queue.block(task_id)?;
                self.set_phase(Phase::BlockedOnUser {
                    resume_to: Stage::ExecuteTasks,
                });
            }
        }

        Ok(GateOutcome {
            decision,
            phase: self.phase,
            checkpoint,
        })
    }

    /// Evaluate the review gate of the milestone under review.
    pub fn submit_milestone_verdicts(
        &mut self,
        milestone_id: &str,
        verdicts: Vec<Verdict>,
        missing: Vec<String>,
    ) -> Result<GateOutcome, PipelineError> {
        self.require(Stage::MilestoneReview, "review a milestone")?;
        if self.queue.milestone(milestone_id).is_none() {
            return Err(QueueError::UnknownMilestone(milestone_id.to_string()).into());
        }
        if self.active_milestone.as_deref() != Some(milestone_id) {
            return Err(PipelineError::InvalidPhase {
                action: format!("review milestone {}", milestone_id),
                phase: format!(
                    "milestone_review of {}",
                    self.active_milestone.as_deref().unwrap_or("nothing")
                ),
            });
        }

        self.record_verdicts(milestone_id, &verdicts, &missing)?;
        let gate = GateId::Milestone(milestone_id.to_string());
        let decision = self.gates.evaluate(&gate, aggregate(&verdicts, &missing));

        let mut checkpoint = None;
        match decision.action {
            Canonical::Proceed => {
                self.queue
                    .set_milestone_state(milestone_id, MilestoneState::Complete)?;
                checkpoint = Some(self.checkpoint(&format!("milestone {} complete", milestone_id)));
                self.active_milestone = None;
                let next = if self.queue.is_finished() {
                    self.after_last_milestone()
                } else {
                    Stage::ExecuteTasks
                };
                self.set_phase(Phase::at(next));
            }
            Canonical::FixCycle => {
                self.queue
                    .set_milestone_state(milestone_id, MilestoneState::Fixable)?;
            }
            Canonical::Escalate => {
                self.queue
                    .set_milestone_state(milestone_id, MilestoneState::Blocked)?;
                self.set_phase(Phase::BlockedOnUser {
                    resume_to: Stage::MilestoneReview,
                });
            }
        }

        Ok(GateOutcome {
            decision,
            phase: self.phase,
            checkpoint,
        })
    }

    /// Evaluate the final QA pass.
    pub fn submit_qa_verdicts(
        &mut self,
        verdicts: Vec<Verdict>,
        missing: Vec<String>,
    ) -> Result<GateOutcome, PipelineError> {
        self.require(Stage::QaPass, "run the QA gate")?;
        self.record_verdicts("qa", &verdicts, &missing)?;
        let decision = self.gates.evaluate(&GateId::Qa, aggregate(&verdicts, &missing));

        let mut checkpoint = None;
        match decision.action {
            Canonical::Proceed => {
                checkpoint = Some(self.checkpoint("qa passed"));
                self.set_phase(Phase::at(Stage::Done));
            }
            Canonical::FixCycle => {}
            Canonical::Escalate => self.set_phase(Phase::BlockedOnUser {
                resume_to: Stage::QaPass,
            }),
        }

        Ok(GateOutcome {
            decision,
            phase: self.phase,
            checkpoint,
        })
    }

    /// Route verdicts to the gate they belong to.
    pub fn submit_verdicts(
        &mut self,
        gate: &GateId,
        verdicts: Vec<Verdict>,
        missing: Vec<String>,
    ) -> Result<GateOutcome, PipelineError> {
        match gate {
            GateId::Task(id) => self.submit_task_verdicts(id, verdicts, missing),
            GateId::Milestone(id) => self.submit_milestone_verdicts(id, verdicts, missing),
            GateId::Qa => self.submit_qa_verdicts(verdicts, missing),
        }
    }

    /// Fan out to reviewers under `budget`, then evaluate the gate.
    pub async fn review(
        &mut self,
        gate: &GateId,
        reviewers: &[Box<dyn Reviewer>],
        budget: Duration,
    ) -> Result<GateOutcome, PipelineError> {
        let collected = collect(reviewers, gate, budget).await;
        self.submit_verdicts(gate, collected.verdicts, collected.missing)
    }

    // Checkpoints

    pub fn checkpoint(&mut self, label: &str) -> u64 {
        self.checkpoints
            .snapshot(&self.decisions, &self.queue, &self.artifacts, label)
            .seq
    }

    /// Restore a checkpoint and bring the phase back in line with the
    /// restored queue.
    pub fn rollback(&mut self, seq: Option<u64>) -> Result<u64, PipelineError> {
        let seq = self.checkpoints.rollback(
            seq,
            &mut self.decisions,
            &mut self.queue,
            &mut self.artifacts,
        )?;
        self.realign_execution();
        self.chain.append("run", "rollback", "human", &seq.to_string())?;
        info!(checkpoint = seq, phase = %self.phase, "Rolled back");
        Ok(seq)
    }

    /// Once execution has started, the stage follows from the queue: a
    /// finished but unreviewed milestone is under review, unfinished tasks
    /// mean `execute_tasks`, otherwise the run is past the last milestone.
    /// Gates of work the queue no longer counts as passed start over.
    fn realign_execution(&mut self) {
        let stage = match self.phase {
            Phase::Active { stage } => stage,
            Phase::BlockedOnUser { resume_to } => resume_to,
            Phase::Aborted => return,
        };
        if stage < Stage::ExecuteTasks {
            return;
        }

        let reopened_tasks: Vec<GateId> = self
            .queue
            .tasks()
            .iter()
            .filter(|t| t.state != TaskState::Done)
            .map(|t| GateId::Task(t.id.clone()))
            .collect();
        let reopened_milestones: Vec<GateId> = self
            .queue
            .milestones()
            .iter()
            .filter(|m| m.state != MilestoneState::Complete)
            .map(|m| GateId::Milestone(m.id.clone()))
            .collect();
        for gate in reopened_tasks.iter().chain(&reopened_milestones) {
            self.gates.reset(gate);
        }
        self.gates.reset(&GateId::Qa);

        let awaiting_review = self
            .queue
            .milestones()
            .iter()
            .find(|m| {
                m.state != MilestoneState::Complete
                    && !m.tasks.is_empty()
                    && m.tasks.iter().all(|id| {
                        self.queue
                            .get(id)
                            .is_some_and(|t| t.state == TaskState::Done)
                    })
            })
            .map(|m| m.id.clone());

        let next = match awaiting_review {
            Some(_) => Stage::MilestoneReview,
            None if self.queue.is_finished() => self.after_last_milestone(),
            None => Stage::ExecuteTasks,
        };
        self.active_milestone = awaiting_review;
        self.set_phase(Phase::at(next));
    }

    fn record_verdicts(
        &mut self,
        subject: &str,
        verdicts: &[Verdict],
        missing: &[String],
    ) -> Result<(), PipelineError> {
        for verdict in verdicts {
            let stage = verdict.namespace.as_str().to_lowercase();
            self.chain
                .append(subject, &stage, &verdict.agent, &verdict.outcome)?;
        }
        for name in missing {
            self.chain.append(subject, "review", name, "MISSING")?;
        }
        Ok(())
    }

    fn after_last_milestone(&self) -> Stage {
        if self.qa_enabled {
            Stage::QaPass
        } else {
            Stage::Done
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if let Some(stage) = phase.stage() {
            self.last_stage = Some(stage);
        }
        if phase != self.phase {
            info!(from = %self.phase, to = %phase, "Phase changed");
        }
        self.phase = phase;
    }

    fn require(&self, stage: Stage, action: &str) -> Result<(), PipelineError> {
        if self.phase.is(stage) {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &str) -> PipelineError {
        PipelineError::InvalidPhase {
            action: action.to_string(),
            phase: self.phase.to_string(),
        }
    }
}

fn missing(stage: Stage, input: &str) -> PipelineError {
    PipelineError::MissingRequiredInput {
        phase: stage.to_string(),
        input: input.to_string(),
    }
}
