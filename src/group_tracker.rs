//! Group Tracker — derives the execution-group index for any task ID and
//! reports group progress. A read-only component, separate from admission
//! scheduling, which only decides who may start next.

use crate::model::{Group, PlanSpec, TaskId};

#[derive(Debug, Clone, Copy, Default)]
pub struct GroupProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl GroupProgress {
    pub fn is_finished(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

pub struct GroupTracker<'a> {
    plan: &'a PlanSpec,
}

impl<'a> GroupTracker<'a> {
    pub fn new(plan: &'a PlanSpec) -> Self {
        Self { plan }
    }

    pub fn group_count(&self) -> usize {
        self.plan.execution_order().len()
    }

    pub fn group_of(&self, task: &TaskId) -> Option<usize> {
        self.plan.group_index_of(task)
    }

    pub fn group(&self, index: usize) -> Option<&Group> {
        self.plan.execution_order().get(index)
    }

    pub fn progress(
        &self,
        index: usize,
        completed: &std::collections::BTreeSet<TaskId>,
        failed: &std::collections::BTreeSet<TaskId>,
    ) -> GroupProgress {
        let Some(group) = self.group(index) else {
            return GroupProgress::default();
        };
        GroupProgress {
            completed: group.iter().filter(|t| completed.contains(*t)).count(),
            failed: group.iter().filter(|t| failed.contains(*t)).count(),
            total: group.len(),
        }
    }

    /// Tasks in `index` whose ancestors all completed and which are not
    /// themselves already completed/failed — i.e. ready to run.
    pub fn ready_in_group(
        &self,
        index: usize,
        completed: &std::collections::BTreeSet<TaskId>,
        failed: &std::collections::BTreeSet<TaskId>,
        started: &std::collections::BTreeSet<TaskId>,
    ) -> Vec<TaskId> {
        let Some(group) = self.group(index) else {
            return Vec::new();
        };
        let graph = self.plan.dependency_graph();
        group
            .iter()
            .filter(|t| !completed.contains(*t) && !failed.contains(*t) && !started.contains(*t))
            .filter(|t| {
                graph
                    .get(*t)
                    .map(|deps| deps.iter().all(|d| completed.contains(d)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Tasks in `index` that can never become ready because a dependency
    /// transitively failed.
    pub fn transitively_failed(
        &self,
        index: usize,
        failed: &std::collections::BTreeSet<TaskId>,
    ) -> Vec<TaskId> {
        let Some(group) = self.group(index) else {
            return Vec::new();
        };
        let graph = self.plan.dependency_graph();
        group
            .iter()
            .filter(|t| graph.get(*t).map(|deps| deps.iter().any(|d| failed.contains(d))).unwrap_or(false))
            .cloned()
            .collect()
    }
}
