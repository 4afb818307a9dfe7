//! `PlanSpec` — the planned-task DAG plus its derived execution order.
//!
//! `ExecutionOrder` is a precomputed, inspectable sequence of groups
//! rather than a live-only readiness predicate: every mutation to tasks
//! or dependencies eagerly recomputes a longest-path layering, so callers
//! can always ask "what group is task X in" without re-deriving it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::task::PlannedTask;
use crate::error::{CoreError, CoreResult};

pub type DependencyGraph = BTreeMap<TaskId, BTreeSet<TaskId>>;

/// One layer of the execution order: a set of mutually independent tasks.
pub type Group = BTreeSet<TaskId>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSpec {
    pub objective: String,
    pub summary: String,
    pub tasks: Vec<PlannedTask>,
    #[serde(skip)]
    dependency_graph: DependencyGraph,
    #[serde(skip)]
    execution_order: Vec<Group>,
}

/// Wire shape for `PlanSpec`: only the three fields that are actually
/// serialised. `dependency_graph`/`execution_order` are derived and must be
/// recomputed on every load, so `PlanSpec` cannot use `#[derive(Deserialize)]`
/// directly — that would leave them empty and silently break any session
/// resumed from disk.
#[derive(Deserialize)]
struct RawPlanSpec {
    objective: String,
    summary: String,
    tasks: Vec<PlannedTask>,
}

impl<'de> Deserialize<'de> for PlanSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawPlanSpec::deserialize(deserializer)?;
        PlanSpec::from_tasks(raw.objective, raw.summary, raw.tasks).map_err(serde::de::Error::custom)
    }
}

impl PlanSpec {
    pub fn new(objective: impl Into<String>, summary: impl Into<String>) -> Self {
        let mut plan = Self {
            objective: objective.into(),
            summary: summary.into(),
            tasks: Vec::new(),
            dependency_graph: DependencyGraph::new(),
            execution_order: Vec::new(),
        };
        plan.recompute().expect("empty plan is always valid");
        plan
    }

    pub fn from_tasks(
        objective: impl Into<String>,
        summary: impl Into<String>,
        tasks: Vec<PlannedTask>,
    ) -> CoreResult<Self> {
        let mut plan = Self {
            objective: objective.into(),
            summary: summary.into(),
            tasks,
            dependency_graph: DependencyGraph::new(),
            execution_order: Vec::new(),
        };
        plan.recompute()?;
        Ok(plan)
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.dependency_graph
    }

    pub fn execution_order(&self) -> &[Group] {
        &self.execution_order
    }

    pub fn task(&self, id: &TaskId) -> Option<&PlannedTask> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut PlannedTask> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.iter().any(|t| &t.id == id)
    }

    /// Which group index a task ID belongs to, if any.
    pub fn group_index_of(&self, id: &TaskId) -> Option<usize> {
        self.execution_order
            .iter()
            .position(|group| group.contains(id))
    }

    /// Recompute `dependency_graph` and `execution_order` atomically from
    /// `tasks`. Rejects the mutation (leaving nothing changed by the
    /// caller's perspective — the caller must not have already committed
    /// a bad `tasks` vector) if the dependency relation is not a DAG, has
    /// self-loops, or references a nonexistent task.
    pub fn recompute(&mut self) -> CoreResult<()> {
        let ids: HashSet<&TaskId> = self.tasks.iter().map(|t| &t.id).collect();

        let mut seen = HashSet::new();
        for t in &self.tasks {
            if !seen.insert(&t.id) {
                return Err(CoreError::DuplicateTaskId(t.id.clone()));
            }
        }

        for t in &self.tasks {
            if t.depends_on.contains(&t.id) {
                return Err(CoreError::SelfDependency(t.id.clone()));
            }
            for dep in &t.depends_on {
                if !ids.contains(dep) {
                    return Err(CoreError::InvalidArgument(format!(
                        "task {} depends on nonexistent task {}",
                        t.id, dep
                    )));
                }
            }
        }

        let graph: DependencyGraph = self
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.depends_on.clone()))
            .collect();

        let order = layer_by_longest_path(&graph)?;

        self.dependency_graph = graph;
        self.execution_order = order;
        Ok(())
    }
}

/// Longest-path layering: a task is placed in group *k* iff the longest
/// dependency chain from a root (a task with no deps) to it has length
/// *k*. Detects cycles via the classic "no progress in a full pass"
/// check on Kahn-style in-degree reduction.
fn layer_by_longest_path(graph: &DependencyGraph) -> CoreResult<Vec<Group>> {
    let mut longest: HashMap<TaskId, usize> = HashMap::new();
    let mut remaining: HashSet<TaskId> = graph.keys().cloned().collect();

    // Iteratively assign layer numbers to tasks whose dependencies are all
    // already assigned. Each full pass that assigns at least one task
    // makes progress; if a pass assigns nothing while tasks remain, those
    // tasks are part of a cycle.
    while !remaining.is_empty() {
        let mut assigned_this_pass = Vec::new();

        for id in &remaining {
            let deps = &graph[id];
            if deps.iter().all(|d| longest.contains_key(d)) {
                let layer = deps.iter().map(|d| longest[d] + 1).max().unwrap_or(0);
                assigned_this_pass.push((id.clone(), layer));
            }
        }

        if assigned_this_pass.is_empty() {
            let mut cyclic: Vec<TaskId> = remaining.into_iter().collect();
            cyclic.sort();
            return Err(CoreError::CyclicDependency(cyclic));
        }

        for (id, layer) in assigned_this_pass {
            longest.insert(id.clone(), layer);
            remaining.remove(&id);
        }
    }

    let max_layer = longest.values().copied().max().unwrap_or(0);
    let mut groups: Vec<Group> = vec![Group::new(); max_layer + 1];
    for (id, layer) in longest {
        groups[layer].insert(id);
    }
    if graph.is_empty() {
        groups.clear();
    }
    Ok(groups)
}
