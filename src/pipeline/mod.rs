//! Pipeline phases and the run state machine.
//!
//! A run moves forward through
//! `discovery → define → specialist_rounds → synthesize → decompose →
//! execute_tasks ⇄ milestone_review → [qa_pass] → done`.
//! The planning stages advance on request once their inputs exist; execution
//! stages move only through gates. An escalation parks the run in
//! `blocked_on_user` until a human resumes it, and `aborted` is terminal.

mod machine;
mod phase;
mod status;

pub use machine::{ActivePipelineRun, BatchReport, GateOutcome, RunStores};
pub use phase::{Phase, Stage};
pub use status::{PhaseEntry, PhaseState, PipelineStatus, phase_entries};
