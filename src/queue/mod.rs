//! Dependency-ordered task queue.
//!
//! Tasks are grouped into milestones and carry their own file scope. The queue
//! is loaded from `tasks.md` ([`parse_queue_document`]), validated as a whole
//! (duplicate ids, unknown dependencies, cycles), and then mutated only through
//! the lifecycle operations on [`TaskQueue`].

mod document;
mod graph;
mod task;
mod task_queue;

pub use document::{load_queue, parse_queue_document, render_queue_document, save_queue};
pub use graph::TaskGraph;
pub use task::{FileAction, FileScope, Milestone, MilestoneState, Task, TaskState};
pub use task_queue::{QueueProgress, QueueSnapshot, TaskQueue};
