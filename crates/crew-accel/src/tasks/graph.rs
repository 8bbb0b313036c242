//! Dependency-aware task bookkeeping.
//!
//! A [`TaskGraph`] holds named tasks, the tasks each one depends on, and
//! where each task is in its lifecycle. Tasks are grouped into execution
//! waves via topological sort: tasks within a wave are independent and can
//! run in parallel, and wave N must finish before wave N+1 starts.
//! [`TaskExecutor::execute_graph`](super::TaskExecutor::execute_graph) drives
//! a graph to completion wave by wave.
//!
//! Ordering is deterministic: within a wave, tasks appear in the order they
//! were first registered.

use super::types::{TaskDescriptor, TaskState};
use crate::error::TaskError;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct GraphNode {
    /// Registration position, used to order waves.
    seq: usize,
    descriptor: TaskDescriptor,
    dependencies: Vec<String>,
    state: TaskState,
    result: Option<String>,
    error: Option<String>,
}

/// Named tasks with dependencies and per-task state.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: HashMap<String, GraphNode>,
    next_seq: usize,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, or replace an existing one with the same id.
    ///
    /// A replaced task starts over as `Queued` but keeps its place in the
    /// registration order. Dependencies may name tasks registered later.
    pub fn register<I, S>(
        &mut self,
        task_id: impl Into<String>,
        descriptor: impl Into<TaskDescriptor>,
        dependencies: I,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let task_id = task_id.into();
        let seq = match self.nodes.get(&task_id) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.nodes.insert(
            task_id,
            GraphNode {
                seq,
                descriptor: descriptor.into(),
                dependencies: dependencies.into_iter().map(Into::into).collect(),
                state: TaskState::Queued,
                result: None,
                error: None,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.nodes.contains_key(task_id)
    }

    /// Drop every task.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.next_seq = 0;
    }

    pub fn state(&self, task_id: &str) -> Option<TaskState> {
        self.nodes.get(task_id).map(|n| n.state)
    }

    /// Output of a completed task.
    pub fn result(&self, task_id: &str) -> Option<&str> {
        self.nodes.get(task_id).and_then(|n| n.result.as_deref())
    }

    /// Failure message of a failed or timed-out task.
    pub fn error(&self, task_id: &str) -> Option<&str> {
        self.nodes.get(task_id).and_then(|n| n.error.as_deref())
    }

    pub fn descriptor(&self, task_id: &str) -> Option<&TaskDescriptor> {
        self.nodes.get(task_id).map(|n| &n.descriptor)
    }

    pub fn dependencies(&self, task_id: &str) -> Option<&[String]> {
        self.nodes.get(task_id).map(|n| n.dependencies.as_slice())
    }

    /// Whether every dependency of `task_id` has completed.
    pub fn can_run(&self, task_id: &str) -> Result<bool, TaskError> {
        let node = self.node(task_id)?;
        for dep in &node.dependencies {
            if self.node(dep)?.state != TaskState::Completed {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Queued tasks whose dependencies have all completed, in registration
    /// order. Tasks with an unregistered dependency are never ready.
    pub fn ready_tasks(&self) -> Vec<String> {
        let mut ready: Vec<(&String, &GraphNode)> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.state == TaskState::Queued)
            .filter(|(_, n)| {
                n.dependencies.iter().all(|dep| {
                    self.nodes
                        .get(dep)
                        .is_some_and(|d| d.state == TaskState::Completed)
                })
            })
            .collect();
        ready.sort_by_key(|(_, n)| n.seq);
        ready.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Every task in a valid execution order.
    pub fn execution_order(&self) -> Result<Vec<String>, TaskError> {
        Ok(self.execution_waves()?.concat())
    }

    /// Group all tasks into waves via Kahn's algorithm.
    ///
    /// Fails with [`TaskError::UnknownTask`] if a dependency was never
    /// registered and with [`TaskError::DependencyCycle`] if the dependencies
    /// contain a cycle.
    pub fn execution_waves(&self) -> Result<Vec<Vec<String>>, TaskError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (id, node) in &self.nodes {
            in_degree.entry(id).or_insert(0);
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(TaskError::UnknownTask(dep.clone()));
                }
                *in_degree.entry(id).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut wave: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        self.sort_by_registration(&mut wave);

        let total = self.nodes.len();
        let mut processed = 0;
        let mut waves = Vec::new();

        while !wave.is_empty() {
            processed += wave.len();
            let mut next = Vec::new();
            for id in &wave {
                // Release dependents.
                for dependent in dependents.get(id).into_iter().flatten() {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            self.sort_by_registration(&mut next);
            waves.push(wave.iter().map(|id| id.to_string()).collect());
            wave = next;
        }

        if processed < total {
            return Err(TaskError::DependencyCycle {
                unordered: total - processed,
                total,
            });
        }
        Ok(waves)
    }

    // ── State transitions ───────────────────────────────────────────

    pub fn mark_started(&mut self, task_id: &str) -> Result<(), TaskError> {
        self.transition(task_id, TaskState::Running)?;
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        task_id: &str,
        result: impl Into<String>,
    ) -> Result<(), TaskError> {
        let node = self.transition(task_id, TaskState::Completed)?;
        node.result = Some(result.into());
        Ok(())
    }

    /// Mark a running task failed, or a queued one that can no longer run.
    pub fn mark_failed(&mut self, task_id: &str, error: impl Into<String>) -> Result<(), TaskError> {
        let node = self.transition(task_id, TaskState::Failed)?;
        node.error = Some(error.into());
        Ok(())
    }

    pub fn mark_timed_out(&mut self, task_id: &str, after: Duration) -> Result<(), TaskError> {
        let node = self.transition(task_id, TaskState::TimedOut)?;
        node.error = Some(format!("timed out after {:.1}s", after.as_secs_f64()));
        Ok(())
    }

    /// Fail every queued task that depends, directly or transitively, on a
    /// failed or timed-out task. Returns the ids that were failed, in
    /// registration order.
    pub fn fail_blocked(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        loop {
            let mut blocked: Vec<(String, String)> = self
                .nodes
                .iter()
                .filter(|(_, n)| n.state == TaskState::Queued)
                .filter_map(|(id, n)| {
                    n.dependencies
                        .iter()
                        .find(|dep| {
                            self.nodes.get(*dep).is_some_and(|d| {
                                matches!(d.state, TaskState::Failed | TaskState::TimedOut)
                            })
                        })
                        .map(|dep| (id.clone(), dep.clone()))
                })
                .collect();
            if blocked.is_empty() {
                break;
            }
            blocked.sort_by_key(|(id, _)| self.nodes.get(id).map_or(usize::MAX, |n| n.seq));
            for (id, dep) in blocked {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.state = TaskState::Failed;
                    node.error = Some(format!("dependency '{dep}' did not complete"));
                }
                failed.push(id);
            }
        }
        failed
    }

    pub fn completed_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.state == TaskState::Completed)
            .count()
    }

    /// Queued tasks, in registration order.
    pub fn queued_tasks(&self) -> Vec<String> {
        let mut queued: Vec<&str> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.state == TaskState::Queued)
            .map(|(id, _)| id.as_str())
            .collect();
        self.sort_by_registration(&mut queued);
        queued.into_iter().map(str::to_string).collect()
    }

    fn node(&self, task_id: &str) -> Result<&GraphNode, TaskError> {
        self.nodes
            .get(task_id)
            .ok_or_else(|| TaskError::UnknownTask(task_id.to_string()))
    }

    fn transition(&mut self, task_id: &str, to: TaskState) -> Result<&mut GraphNode, TaskError> {
        let node = self
            .nodes
            .get_mut(task_id)
            .ok_or_else(|| TaskError::UnknownTask(task_id.to_string()))?;
        if !node.state.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                task: task_id.to_string(),
                from: node.state,
                to,
            });
        }
        node.state = to;
        Ok(node)
    }

    fn sort_by_registration(&self, ids: &mut [&str]) {
        ids.sort_by_key(|id| self.nodes.get(*id).map_or(usize::MAX, |n| n.seq));
    }
}
