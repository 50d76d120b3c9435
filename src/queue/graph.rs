//! Dependency graph over queued tasks.
//!
//! Built once when a queue is loaded. Building validates the structure:
//! duplicate ids, dependencies on unknown tasks, and cycles (Kahn's algorithm).

use super::task::Task;
use crate::errors::QueueError;
use std::collections::{HashMap, HashSet};

/// Index into the task list.
pub type TaskIndex = usize;

/// A validated, acyclic dependency graph.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    ids: Vec<String>,
    index_map: HashMap<String, TaskIndex>,
    /// index -> tasks that depend on it
    forward_edges: Vec<Vec<TaskIndex>>,
    /// index -> tasks it depends on
    reverse_edges: Vec<Vec<TaskIndex>>,
}

impl TaskGraph {
    /// Build and validate the graph for a task list.
    pub fn build(tasks: &[Task]) -> Result<Self, QueueError> {
        let mut index_map = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if index_map.insert(task.id.clone(), i).is_some() {
                return Err(QueueError::MalformedQueue(format!(
                    "duplicate task id {}",
                    task.id
                )));
            }
        }

        let mut forward_edges: Vec<Vec<TaskIndex>> = vec![Vec::new(); tasks.len()];
        let mut reverse_edges: Vec<Vec<TaskIndex>> = vec![Vec::new(); tasks.len()];
        for (to_idx, task) in tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| QueueError::UnknownDependency {
                            task: task.id.clone(),
                            dependency: dep.clone(),
                        })?;
                if reverse_edges[to_idx].contains(&from_idx) {
                    continue;
                }
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let graph = Self {
            ids: tasks.iter().map(|t| t.id.clone()).collect(),
            index_map,
            forward_edges,
            reverse_edges,
        };
        graph.validate_no_cycles()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<TaskIndex> {
        self.index_map.get(id).copied()
    }

    /// Ids of tasks that depend directly on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|i| {
                self.forward_edges[i]
                    .iter()
                    .map(|&d| self.ids[d].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of tasks `id` depends on directly.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|i| {
                self.reverse_edges[i]
                    .iter()
                    .map(|&d| self.ids[d].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate_no_cycles(&self) -> Result<(), QueueError> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(|d| d.len()).collect();
        let mut queue: Vec<TaskIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;
        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in &self.forward_edges[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed == self.len() {
            return Ok(());
        }

        // Everything left has an unresolved dependency. Peel off tasks that
        // merely hang downstream of a cycle so only cycle members are named.
        let mut remaining: HashSet<TaskIndex> =
            (0..self.len()).filter(|&i| in_degree[i] > 0).collect();
        loop {
            let sinks: Vec<TaskIndex> = remaining
                .iter()
                .copied()
                .filter(|&i| !self.forward_edges[i].iter().any(|d| remaining.contains(d)))
                .collect();
            if sinks.is_empty() {
                break;
            }
            for s in sinks {
                remaining.remove(&s);
            }
        }

        let mut tasks: Vec<TaskIndex> = remaining.into_iter().collect();
        tasks.sort_unstable();
        Err(QueueError::CyclicDependency {
            tasks: tasks.into_iter().map(|i| self.ids[i].clone()).collect(),
        })
    }
}
