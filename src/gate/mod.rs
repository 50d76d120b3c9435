//! Gate controller and verdict aggregator.
//!
//! A gate sits after every task and every milestone. Reviewers emit verdicts
//! in their own vocabularies ([`verdict`]); the aggregator reduces them to a
//! single canonical outcome ([`aggregate()`]); the controller applies the
//! fix-cycle cap and settles on PROCEED, FIX_CYCLE or ESCALATE
//! ([`GateController::evaluate`]).
//!
//! ## Example
//!
//! ```
//! use waypoint::gate::{aggregate, Canonical, GateController, GateId, Namespace, Verdict};
//!
//! let verdicts = vec![
//!     Verdict::new(Namespace::Review, "REVIEW_PASS", "code-reviewer").unwrap(),
//!     Verdict::new(Namespace::Sec, "CONCERN", "security").unwrap(),
//! ];
//! let mut controller = GateController::default();
//! let decision = controller.evaluate(&GateId::Task("T1".into()), aggregate(&verdicts, &[]));
//! assert_eq!(decision.action, Canonical::FixCycle);
//! assert_eq!(decision.fix_cycle, 1);
//! ```

pub mod aggregate;
pub mod collect;
pub mod controller;
pub mod verdict;

pub use aggregate::{Aggregate, SeverityCounts, aggregate};
pub use collect::{Collected, CommandReviewer, Reviewer, collect};
pub use controller::{
    DEFAULT_MAX_MILESTONE_FIX_CYCLES, DEFAULT_MAX_TASK_FIX_CYCLES, FixCyclePolicy, GateController,
    GateDecision, GateId,
};
pub use verdict::{Canonical, Finding, Namespace, RawVerdict, Severity, Verdict};
