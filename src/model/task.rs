//! `PlannedTask` — one node of a `PlanSpec`'s dependency DAG.
//!
//! Tasks carry a plan-local string `TaskId` rather than a numeric one,
//! since `.claudio-plan.json` tasks are JSON objects emitted by a planner
//! agent, free to choose their own identifiers within a plan.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ids::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    #[serde(default)]
    pub priority: Priority,
    pub complexity: Complexity,
}

impl PlannedTask {
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            files: Vec::new(),
            depends_on: BTreeSet::new(),
            priority: Priority::default(),
            complexity,
        }
    }

    /// Truncated, slugified title used for branch-name generation.
    pub fn title_slug(&self) -> String {
        let slug: String = self
            .title
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let collapsed = slug
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        collapsed.chars().take(30).collect()
    }
}

/// Generate a branch name for an instance executing `task`.
///
/// When `include_id` is true the instance's short ID is appended so two
/// tasks whose 30-character slugs collide still get distinct branches;
/// otherwise collisions are the caller's problem.
pub fn derive_branch_name(task: &PlannedTask, instance_short_id: Option<&str>) -> String {
    let slug = task.title_slug();
    match instance_short_id {
        Some(id) => format!("task/{slug}-{id}"),
        None => format!("task/{slug}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_truncates_to_30_chars() {
        let t = PlannedTask::new(
            "t1",
            "Refactor the entire authentication and authorization subsystem end to end",
            Complexity::High,
        );
        assert!(t.title_slug().len() <= 30);
    }

    #[test]
    fn slug_strips_non_alphanumeric() {
        let t = PlannedTask::new("t1", "Fix bug #42: null-pointer!", Complexity::Low);
        assert_eq!(t.title_slug(), "fix-bug-42-null-pointer");
    }

    #[test]
    fn branch_name_without_id() {
        let t = PlannedTask::new("t1", "Rename foo to bar", Complexity::Low);
        assert_eq!(derive_branch_name(&t, None), "task/rename-foo-to-bar");
    }

    #[test]
    fn branch_name_with_id_disambiguates_collisions() {
        let a = PlannedTask::new("t1", "Rename foo to bar", Complexity::Low);
        let b = PlannedTask::new("t2", "Rename foo to bar", Complexity::Low);
        let ba = derive_branch_name(&a, Some("aaaa1111"));
        let bb = derive_branch_name(&b, Some("bbbb2222"));
        assert_ne!(ba, bb);
    }
}
