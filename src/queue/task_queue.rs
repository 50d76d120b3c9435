//! The task queue: validated load, eligibility, and lifecycle transitions.

use super::graph::{TaskGraph, TaskIndex};
use super::task::{Milestone, MilestoneState, Task, TaskState};
use crate::errors::QueueError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Plain, serializable copy of queue contents used by checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub milestones: Vec<Milestone>,
    pub tasks: Vec<Task>,
}

/// Count of tasks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProgress {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub done: usize,
    pub deferred: usize,
}

impl QueueProgress {
    pub fn percent_done(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.done as f64 / self.total as f64) * 100.0
    }
}

/// Dependency-ordered queue of tasks grouped into milestones.
///
/// At most one task is `in_progress` at a time, and a task only starts once
/// every dependency is `done`. Every guard failure returns before mutating.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    milestones: Vec<Milestone>,
    tasks: Vec<Task>,
    graph: TaskGraph,
    /// Task indices in milestone-then-declaration order
    order: Vec<TaskIndex>,
}

impl TaskQueue {
    /// Validate and load a queue. Any structural problem rejects the whole load.
    pub fn load(milestones: Vec<Milestone>, tasks: Vec<Task>) -> Result<Self, QueueError> {
        let mut milestones = milestones;
        let mut tasks = tasks;

        let graph = TaskGraph::build(&tasks)?;
        reconcile_milestones(&mut milestones, &mut tasks)?;

        let in_progress: Vec<&str> = tasks
            .iter()
            .filter(|t| t.state == TaskState::InProgress)
            .map(|t| t.id.as_str())
            .collect();
        if in_progress.len() > 1 {
            return Err(QueueError::MalformedQueue(format!(
                "multiple tasks in progress: {}",
                in_progress.join(", ")
            )));
        }

        let states: HashMap<&str, TaskState> =
            tasks.iter().map(|t| (t.id.as_str(), t.state)).collect();
        for task in &tasks {
            if !matches!(task.state, TaskState::InProgress | TaskState::Done) {
                continue;
            }
            if let Some(dep) = task
                .depends_on
                .iter()
                .find(|d| states.get(d.as_str()) != Some(&TaskState::Done))
            {
                return Err(QueueError::MalformedQueue(format!(
                    "task {} is {} but dependency {} is not done",
                    task.id, task.state, dep
                )));
            }
        }

        let order = queue_order(&milestones, &tasks, &graph);
        debug!(
            tasks = tasks.len(),
            milestones = milestones.len(),
            "Task queue loaded"
        );
        Ok(Self {
            milestones,
            tasks,
            graph,
            order,
        })
    }

    /// Rebuild a queue from a checkpoint snapshot.
    pub fn from_snapshot(snapshot: &QueueSnapshot) -> Result<Self, QueueError> {
        Self::load(snapshot.milestones.clone(), snapshot.tasks.clone())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            milestones: self.milestones.clone(),
            tasks: self.tasks.clone(),
        }
    }

    /// The earliest pending task whose dependencies are all done.
    pub fn next_eligible(&self) -> Option<&Task> {
        self.order
            .iter()
            .map(|&i| &self.tasks[i])
            .find(|t| t.state == TaskState::Pending && self.unmet_dependency(t).is_none())
    }

    /// Move a pending task to `in_progress`.
    pub fn begin(&mut self, id: &str) -> Result<&Task, QueueError> {
        let idx = self.index(id)?;
        if let Some(running) = self.active()
            && running.id != id
        {
            return Err(QueueError::AlreadyRunning {
                running: running.id.clone(),
                requested: id.to_string(),
            });
        }
        let task = &self.tasks[idx];
        if task.state != TaskState::Pending {
            return Err(invalid(task, TaskState::InProgress));
        }
        if let Some(dep) = self.unmet_dependency(task) {
            return Err(QueueError::DependencyNotSatisfied {
                task: id.to_string(),
                dependency: dep.to_string(),
            });
        }
        self.tasks[idx].state = TaskState::InProgress;
        info!(task = %id, "Task started");
        Ok(&self.tasks[idx])
    }

    /// Mark the in-progress task done. The only way dependents become eligible.
    pub fn complete(&mut self, id: &str) -> Result<&Task, QueueError> {
        let idx = self.index(id)?;
        let task = &self.tasks[idx];
        if task.state != TaskState::InProgress {
            return Err(invalid(task, TaskState::Done));
        }
        self.tasks[idx].state = TaskState::Done;
        info!(task = %id, "Task completed");
        Ok(&self.tasks[idx])
    }

    /// Set a task aside. Dependents stay blocked until it is re-queued.
    pub fn defer(&mut self, id: &str, reason: &str) -> Result<&Task, QueueError> {
        let idx = self.index(id)?;
        let task = &self.tasks[idx];
        if !matches!(
            task.state,
            TaskState::Pending | TaskState::InProgress | TaskState::Blocked
        ) {
            return Err(invalid(task, TaskState::Deferred));
        }
        let task = &mut self.tasks[idx];
        task.state = TaskState::Deferred;
        task.deferred_reason = Some(reason.to_string());
        info!(task = %id, reason, "Task deferred");
        Ok(&self.tasks[idx])
    }

    /// Human re-queue of a deferred or blocked task.
    pub fn requeue(&mut self, id: &str) -> Result<&Task, QueueError> {
        let idx = self.index(id)?;
        let task = &self.tasks[idx];
        if !matches!(task.state, TaskState::Deferred | TaskState::Blocked) {
            return Err(invalid(task, TaskState::Pending));
        }
        let task = &mut self.tasks[idx];
        task.state = TaskState::Pending;
        task.deferred_reason = None;
        info!(task = %id, "Task re-queued");
        Ok(&self.tasks[idx])
    }

    /// Park the in-progress task after an escalation.
    pub fn block(&mut self, id: &str) -> Result<&Task, QueueError> {
        let idx = self.index(id)?;
        let task = &self.tasks[idx];
        if task.state != TaskState::InProgress {
            return Err(invalid(task, TaskState::Blocked));
        }
        self.tasks[idx].state = TaskState::Blocked;
        info!(task = %id, "Task blocked");
        Ok(&self.tasks[idx])
    }

    /// The task currently in progress, if any.
    pub fn active(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.state == TaskState::InProgress)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.graph.index_of(id).map(|i| &self.tasks[i])
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks in queue (eligibility) order.
    pub fn ordered_tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().map(|&i| &self.tasks[i])
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn milestone(&self, id: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == id)
    }

    /// Tasks belonging to a milestone, in milestone order.
    pub fn milestone_tasks(&self, id: &str) -> Result<Vec<&Task>, QueueError> {
        let milestone = self
            .milestone(id)
            .ok_or_else(|| QueueError::UnknownMilestone(id.to_string()))?;
        Ok(milestone
            .tasks
            .iter()
            .filter_map(|t| self.get(t))
            .collect())
    }

    /// Whether every task of a milestone is done.
    pub fn milestone_finished(&self, id: &str) -> Result<bool, QueueError> {
        Ok(self
            .milestone_tasks(id)?
            .iter()
            .all(|t| t.state == TaskState::Done))
    }

    pub fn set_milestone_state(
        &mut self,
        id: &str,
        state: MilestoneState,
    ) -> Result<(), QueueError> {
        let milestone = self
            .milestones
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| QueueError::UnknownMilestone(id.to_string()))?;
        if milestone.state != state {
            info!(milestone = %id, from = %milestone.state, to = %state, "Milestone state changed");
            milestone.state = state;
        }
        Ok(())
    }

    /// Tasks that depend directly on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.graph.dependents(id)
    }

    /// Whether every task is done.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Done)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn progress(&self) -> QueueProgress {
        let mut progress = QueueProgress {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.state {
                TaskState::Pending => progress.pending += 1,
                TaskState::InProgress => progress.in_progress += 1,
                TaskState::Blocked => progress.blocked += 1,
                TaskState::Done => progress.done += 1,
                TaskState::Deferred => progress.deferred += 1,
            }
        }
        progress
    }

    fn index(&self, id: &str) -> Result<TaskIndex, QueueError> {
        self.graph
            .index_of(id)
            .ok_or_else(|| QueueError::UnknownTask(id.to_string()))
    }

    fn unmet_dependency<'a>(&self, task: &'a Task) -> Option<&'a str> {
        task.depends_on
            .iter()
            .find(|dep| self.get(dep).is_none_or(|d| d.state != TaskState::Done))
            .map(String::as_str)
    }
}

fn invalid(task: &Task, to: TaskState) -> QueueError {
    QueueError::InvalidTransition {
        task: task.id.clone(),
        from: task.state.to_string(),
        to: to.to_string(),
    }
}

/// Make milestone task lists and task milestone fields agree.
fn reconcile_milestones(
    milestones: &mut [Milestone],
    tasks: &mut [Task],
) -> Result<(), QueueError> {
    let mut seen = HashMap::new();
    for (i, m) in milestones.iter().enumerate() {
        if seen.insert(m.id.clone(), i).is_some() {
            return Err(QueueError::MalformedQueue(format!(
                "duplicate milestone id {}",
                m.id
            )));
        }
    }

    let task_index: HashMap<String, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.clone(), i))
        .collect();

    for milestone in milestones.iter() {
        for task_id in &milestone.tasks {
            let idx = *task_index.get(task_id).ok_or_else(|| {
                QueueError::MalformedQueue(format!(
                    "milestone {} lists unknown task {}",
                    milestone.id, task_id
                ))
            })?;
            let task = &mut tasks[idx];
            match &task.milestone {
                None => task.milestone = Some(milestone.id.clone()),
                Some(m) if *m == milestone.id => {}
                Some(m) => {
                    return Err(QueueError::MalformedQueue(format!(
                        "task {} belongs to both {} and {}",
                        task_id, m, milestone.id
                    )));
                }
            }
        }
    }

    for task in tasks.iter() {
        let Some(ref m) = task.milestone else {
            continue;
        };
        let idx = *seen
            .get(m)
            .ok_or_else(|| QueueError::UnknownMilestone(m.clone()))?;
        if !milestones[idx].tasks.contains(&task.id) {
            milestones[idx].tasks.push(task.id.clone());
        }
    }
    Ok(())
}

fn queue_order(milestones: &[Milestone], tasks: &[Task], graph: &TaskGraph) -> Vec<TaskIndex> {
    let mut order: Vec<TaskIndex> = milestones
        .iter()
        .flat_map(|m| m.tasks.iter())
        .filter_map(|id| graph.index_of(id))
        .collect();
    order.extend(
        tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.milestone.is_none())
            .map(|(i, _)| i),
    );
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, &format!("Task {}", id)).with_depends_on(deps)
    }

    fn two_task_queue() -> TaskQueue {
        TaskQueue::load(vec![], vec![task("T1", &[]), task("T2", &["T1"])]).unwrap()
    }

    #[test]
    fn test_next_eligible_follows_dependencies() {
        let mut queue = two_task_queue();
        assert_eq!(queue.next_eligible().unwrap().id, "T1");

        queue.begin("T1").unwrap();
        assert!(queue.next_eligible().is_none());

        queue.complete("T1").unwrap();
        assert_eq!(queue.next_eligible().unwrap().id, "T2");
    }

    #[test]
    fn test_begin_out_of_order_fails_without_mutation() {
        let mut queue = two_task_queue();
        let err = queue.begin("T2").unwrap_err();
        assert_eq!(
            err,
            QueueError::DependencyNotSatisfied {
                task: "T2".into(),
                dependency: "T1".into()
            }
        );
        assert_eq!(queue.get("T2").unwrap().state, TaskState::Pending);
    }

    #[test]
    fn test_only_one_task_in_progress() {
        let mut queue =
            TaskQueue::load(vec![], vec![task("T1", &[]), task("T2", &[])]).unwrap();
        queue.begin("T1").unwrap();
        let err = queue.begin("T2").unwrap_err();
        assert!(matches!(err, QueueError::AlreadyRunning { ref running, .. } if running == "T1"));
        assert_eq!(queue.progress().in_progress, 1);
    }

    #[test]
    fn test_complete_requires_in_progress() {
        let mut queue = two_task_queue();
        assert!(matches!(
            queue.complete("T1"),
            Err(QueueError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_defer_keeps_dependents_blocked() {
        let mut queue = two_task_queue();
        queue.defer("T1", "waiting on design").unwrap();
        assert!(queue.next_eligible().is_none());
        assert_eq!(
            queue.get("T1").unwrap().deferred_reason.as_deref(),
            Some("waiting on design")
        );

        queue.requeue("T1").unwrap();
        assert_eq!(queue.next_eligible().unwrap().id, "T1");
        assert!(queue.get("T1").unwrap().deferred_reason.is_none());
    }

    #[test]
    fn test_block_and_requeue() {
        let mut queue = two_task_queue();
        queue.begin("T1").unwrap();
        queue.block("T1").unwrap();
        assert!(queue.active().is_none());
        assert!(queue.next_eligible().is_none());
        queue.requeue("T1").unwrap();
        assert_eq!(queue.next_eligible().unwrap().id, "T1");
    }

    #[test]
    fn test_milestone_then_declaration_order() {
        let mut m1 = Milestone::new("M1", "First");
        m1.tasks = vec!["T3".into()];
        let m2 = Milestone::new("M2", "Second");
        let tasks = vec![
            task("T0", &[]),
            task("T1", &[]).with_milestone("M2"),
            task("T2", &[]).with_milestone("M2"),
            task("T3", &[]),
        ];
        let queue = TaskQueue::load(vec![m1, m2], tasks).unwrap();
        let order: Vec<&str> = queue.ordered_tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["T3", "T1", "T2", "T0"]);
        assert_eq!(queue.next_eligible().unwrap().id, "T3");
        assert_eq!(queue.get("T3").unwrap().milestone.as_deref(), Some("M1"));
    }

    #[test]
    fn test_cyclic_load_loads_nothing() {
        let result = TaskQueue::load(vec![], vec![task("T1", &["T2"]), task("T2", &["T1"])]);
        match result {
            Err(QueueError::CyclicDependency { tasks }) => {
                assert_eq!(tasks, vec!["T1", "T2"]);
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_two_in_progress() {
        let tasks = vec![
            task("T1", &[]).with_state(TaskState::InProgress),
            task("T2", &[]).with_state(TaskState::InProgress),
        ];
        let err = TaskQueue::load(vec![], tasks).unwrap_err();
        assert!(err.to_string().contains("multiple tasks in progress"));
    }

    #[test]
    fn test_load_rejects_done_before_dependency() {
        let tasks = vec![task("T1", &[]), task("T2", &["T1"]).with_state(TaskState::Done)];
        assert!(matches!(
            TaskQueue::load(vec![], tasks),
            Err(QueueError::MalformedQueue(_))
        ));
    }

    #[test]
    fn test_load_rejects_unknown_milestone() {
        let tasks = vec![task("T1", &[]).with_milestone("M9")];
        assert_eq!(
            TaskQueue::load(vec![], tasks).unwrap_err(),
            QueueError::UnknownMilestone("M9".into())
        );
    }

    #[test]
    fn test_milestone_finished() {
        let m = Milestone::new("M1", "Only");
        let tasks = vec![task("T1", &[]).with_milestone("M1")];
        let mut queue = TaskQueue::load(vec![m], tasks).unwrap();
        assert!(!queue.milestone_finished("M1").unwrap());
        queue.begin("T1").unwrap();
        queue.complete("T1").unwrap();
        assert!(queue.milestone_finished("M1").unwrap());
        assert!(queue.is_finished());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut queue = two_task_queue();
        queue.begin("T1").unwrap();
        let snap = queue.snapshot();
        let rebuilt = TaskQueue::from_snapshot(&snap).unwrap();
        assert_eq!(rebuilt.snapshot(), snap);
        assert_eq!(rebuilt.active().unwrap().id, "T1");
    }
}
