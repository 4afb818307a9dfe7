//! Pure in-memory mutation operations on a `PlanSpec`.
//!
//! Every mutation builds a candidate plan, recomputes its dependency graph
//! and execution order, and only swaps it in if that recompute succeeds —
//! so a rejected mutation never leaves the caller's plan half-changed.

use super::ids::TaskId;
use super::plan::PlanSpec;
use super::task::{Complexity, PlannedTask};
use crate::error::{CoreError, CoreResult};

/// Update a task's title/description in place.
pub fn update_task_text(
    plan: &mut PlanSpec,
    id: &TaskId,
    title: Option<String>,
    description: Option<String>,
) -> CoreResult<()> {
    let task = plan
        .task_mut(id)
        .ok_or_else(|| CoreError::TaskNotFound(id.clone()))?;
    if let Some(t) = title {
        task.title = t;
    }
    if let Some(d) = description {
        task.description = d;
    }
    Ok(())
}

pub fn add_task(plan: &mut PlanSpec, task: PlannedTask) -> CoreResult<()> {
    if plan.contains(&task.id) {
        return Err(CoreError::DuplicateTaskId(task.id));
    }
    let mut candidate = plan.clone();
    candidate.tasks.push(task);
    candidate.recompute()?;
    *plan = candidate;
    Ok(())
}

pub fn delete_task(plan: &mut PlanSpec, id: &TaskId) -> CoreResult<()> {
    if !plan.contains(id) {
        return Err(CoreError::TaskNotFound(id.clone()));
    }
    let mut candidate = plan.clone();
    candidate.tasks.retain(|t| &t.id != id);
    for t in &mut candidate.tasks {
        t.depends_on.remove(id);
    }
    candidate.recompute()?;
    *plan = candidate;
    Ok(())
}

fn index_of(plan: &PlanSpec, id: &TaskId) -> CoreResult<usize> {
    plan.tasks
        .iter()
        .position(|t| &t.id == id)
        .ok_or_else(|| CoreError::TaskNotFound(id.clone()))
}

/// Swap a task with its predecessor in the task list's declared order.
/// This reorders the *authoring* list, not the derived execution order
/// (which remains governed solely by dependencies).
pub fn move_task_up(plan: &mut PlanSpec, id: &TaskId) -> CoreResult<()> {
    let idx = index_of(plan, id)?;
    if idx == 0 {
        return Err(CoreError::InvalidArgument(format!(
            "task {id} is already first"
        )));
    }
    plan.tasks.swap(idx, idx - 1);
    Ok(())
}

pub fn move_task_down(plan: &mut PlanSpec, id: &TaskId) -> CoreResult<()> {
    let idx = index_of(plan, id)?;
    if idx + 1 >= plan.tasks.len() {
        return Err(CoreError::InvalidArgument(format!(
            "task {id} is already last"
        )));
    }
    plan.tasks.swap(idx, idx + 1);
    Ok(())
}

/// Replace a task's `depends_on` set. Rejects self-loops, references to
/// nonexistent tasks, and additions that would close a cycle (checked via
/// a DFS over the proposed graph) without mutating the plan.
pub fn update_task_dependencies(
    plan: &mut PlanSpec,
    id: &TaskId,
    depends_on: impl IntoIterator<Item = TaskId>,
) -> CoreResult<()> {
    if !plan.contains(id) {
        return Err(CoreError::TaskNotFound(id.clone()));
    }
    let mut candidate = plan.clone();
    let task = candidate.task_mut(id).unwrap();
    task.depends_on = depends_on.into_iter().collect();
    if task.depends_on.contains(id) {
        return Err(CoreError::SelfDependency(id.clone()));
    }
    candidate.recompute()?;
    *plan = candidate;
    Ok(())
}

/// Replace one task with `k+1` tasks whose descriptions are slices of the
/// original description at the given character offsets. The first slice
/// keeps the original ID; the rest get fresh IDs derived from it.
/// Downstream tasks that depended on the original now depend on the last
/// slice. Fails without mutating on empty or out-of-range split points.
pub fn split_task(
    plan: &mut PlanSpec,
    id: &TaskId,
    split_points: &[usize],
) -> CoreResult<Vec<TaskId>> {
    if split_points.is_empty() {
        return Err(CoreError::InvalidArgument(
            "split_points must be non-empty".into(),
        ));
    }
    let original = plan
        .task(id)
        .ok_or_else(|| CoreError::TaskNotFound(id.clone()))?
        .clone();
    let chars: Vec<char> = original.description.chars().collect();
    let len = chars.len();
    if split_points.iter().any(|&p| p == 0 || p >= len) || !is_sorted(split_points) {
        return Err(CoreError::InvalidArgument(format!(
            "split points out of range for task {id} (description len {len})"
        )));
    }

    let mut bounds = vec![0];
    bounds.extend_from_slice(split_points);
    bounds.push(len);

    let mut candidate = plan.clone();
    let original_idx = index_of(&candidate, id)?;
    candidate.tasks.remove(original_idx);

    let mut new_ids = Vec::new();
    let mut new_tasks = Vec::new();
    for (i, window) in bounds.windows(2).enumerate() {
        let (start, end) = (window[0], window[1]);
        let new_id = if i == 0 {
            original.id.clone()
        } else {
            TaskId::new(format!("{}-split{}", original.id, i))
        };
        let mut t = original.clone();
        t.id = new_id.clone();
        t.description = chars[start..end].iter().collect();
        new_ids.push(new_id);
        new_tasks.push(t);
    }

    // Chain the slices: slice i+1 depends on slice i. The first slice
    // keeps the original's inbound dependencies.
    for i in 1..new_tasks.len() {
        let prev = new_ids[i - 1].clone();
        new_tasks[i].depends_on.insert(prev);
    }

    let last_id = new_ids.last().unwrap().clone();
    for t in &mut candidate.tasks {
        if t.depends_on.remove(id) {
            t.depends_on.insert(last_id.clone());
        }
    }

    for (pos, t) in new_tasks.into_iter().enumerate() {
        candidate.tasks.insert(original_idx + pos, t);
    }

    candidate.recompute()?;
    *plan = candidate;
    Ok(new_ids)
}

fn is_sorted(xs: &[usize]) -> bool {
    xs.windows(2).all(|w| w[0] < w[1])
}

/// Replace a contiguous sequence of tasks — which must themselves form a
/// dependency chain — with a single task. The merged task's complexity is
/// the max of the inputs, its files the union, and dependency edges are
/// rewired so its dependents become dependents of the merged task and it
/// inherits the chain's root dependencies.
pub fn merge_tasks(
    plan: &mut PlanSpec,
    ids: &[TaskId],
    new_title: impl Into<String>,
) -> CoreResult<TaskId> {
    if ids.len() < 2 {
        return Err(CoreError::InvalidArgument(
            "merge_tasks requires at least two task ids".into(),
        ));
    }

    let mut originals = Vec::new();
    for id in ids {
        originals.push(
            plan.task(id)
                .ok_or_else(|| CoreError::TaskNotFound(id.clone()))?
                .clone(),
        );
    }

    // Verify the ids form a dependency chain: ids[i+1] depends on ids[i]
    // (directly), and no other task outside `ids` depends on an interior
    // (non-last) member.
    for w in ids.windows(2) {
        if !originals
            .iter()
            .find(|t| &t.id == &w[1])
            .unwrap()
            .depends_on
            .contains(&w[0])
        {
            return Err(CoreError::InvalidArgument(format!(
                "tasks {} and {} do not form a dependency chain",
                w[0], w[1]
            )));
        }
    }
    let id_set: std::collections::BTreeSet<_> = ids.iter().cloned().collect();
    for t in &plan.tasks {
        if id_set.contains(&t.id) {
            continue;
        }
        let depends_on_interior = t
            .depends_on
            .iter()
            .any(|d| id_set.contains(d) && d != ids.last().unwrap());
        if depends_on_interior {
            return Err(CoreError::InvalidArgument(
                "an external task depends on an interior member of the merge chain".into(),
            ));
        }
    }

    let merged_id = TaskId::new(format!("{}-merged", ids[0]));
    let complexity = originals
        .iter()
        .map(|t| t.complexity)
        .max()
        .unwrap_or(Complexity::Low);
    let files: std::collections::BTreeSet<String> = originals
        .iter()
        .flat_map(|t| t.files.iter().cloned())
        .collect();
    let root_deps: std::collections::BTreeSet<TaskId> = originals[0]
        .depends_on
        .iter()
        .filter(|d| !id_set.contains(d))
        .cloned()
        .collect();

    let mut merged = PlannedTask::new(merged_id.clone(), new_title, complexity);
    merged.files = files.into_iter().collect();
    merged.depends_on = root_deps;
    merged.description = originals
        .iter()
        .map(|t| t.description.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut candidate = plan.clone();
    let first_idx = index_of(&candidate, &ids[0])?;
    candidate.tasks.retain(|t| !id_set.contains(&t.id));
    for t in &mut candidate.tasks {
        let depended_on_chain = t.depends_on.iter().any(|d| id_set.contains(d));
        if depended_on_chain {
            t.depends_on.retain(|d| !id_set.contains(d));
            t.depends_on.insert(merged_id.clone());
        }
    }
    let insert_at = first_idx.min(candidate.tasks.len());
    candidate.tasks.insert(insert_at, merged);

    candidate.recompute()?;
    *plan = candidate;
    Ok(merged_id)
}

/// Severity of an editor validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub message: String,
}

/// Validate a plan for editor display: errors (cycle, invalid dep, empty
/// task list), warnings (missing title/description, file conflicts
/// between siblings, high-complexity tasks), and info messages.
pub fn validate_plan_for_editor(plan: &PlanSpec) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();

    if plan.tasks.is_empty() {
        findings.push(ValidationFinding {
            severity: Severity::Error,
            message: "plan has no tasks".into(),
        });
        return findings;
    }

    // A rebuild failure surfaces the exact cycle participants / invalid ref.
    let mut probe = plan.clone();
    if let Err(e) = probe.recompute() {
        let message = match &e {
            CoreError::CyclicDependency(ids) => format!(
                "dependency cycle involves tasks: {}",
                ids.iter()
                    .map(|i| i.0.clone())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            other => other.to_string(),
        };
        findings.push(ValidationFinding {
            severity: Severity::Error,
            message,
        });
    }

    for t in &plan.tasks {
        if t.title.trim().is_empty() {
            findings.push(ValidationFinding {
                severity: Severity::Warning,
                message: format!("task {} has no title", t.id),
            });
        }
        if t.description.trim().is_empty() {
            findings.push(ValidationFinding {
                severity: Severity::Warning,
                message: format!("task {} has no description", t.id),
            });
        }
        if t.complexity == Complexity::High {
            findings.push(ValidationFinding {
                severity: Severity::Info,
                message: format!("task {} is marked high complexity", t.id),
            });
        }
    }

    for group in plan.execution_order() {
        let members: Vec<&PlannedTask> = group.iter().filter_map(|id| plan.task(id)).collect();
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                if files_conflict(&members[i].files, &members[j].files) {
                    findings.push(ValidationFinding {
                        severity: Severity::Warning,
                        message: format!(
                            "tasks {} and {} run in the same group and both touch overlapping files",
                            members[i].id, members[j].id
                        ),
                    });
                }
            }
        }
    }

    findings
}

fn files_conflict(a: &[String], b: &[String]) -> bool {
    a.iter().any(|pa| b.iter().any(|pb| path_overlaps(pa, pb)))
}

fn path_overlaps(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    a == b || a.starts_with(&format!("{b}/")) || b.starts_with(&format!("{a}/"))
}

fn normalize(path: &str) -> String {
    let p = path.strip_prefix("./").unwrap_or(path);
    p.strip_suffix('/').unwrap_or(p).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::Complexity;

    fn plan_with(tasks: Vec<PlannedTask>) -> PlanSpec {
        PlanSpec::from_tasks("obj", "sum", tasks).unwrap()
    }

    fn task(id: &str, deps: &[&str]) -> PlannedTask {
        let mut t = PlannedTask::new(id, format!("task {id}"), Complexity::Low);
        t.depends_on = deps.iter().map(|d| TaskId::new(*d)).collect();
        t
    }

    #[test]
    fn move_up_then_down_is_identity() {
        let mut plan = plan_with(vec![task("a", &[]), task("b", &[]), task("c", &[])]);
        let before: Vec<_> = plan.tasks.iter().map(|t| t.id.clone()).collect();
        move_task_down(&mut plan, &TaskId::new("b")).unwrap();
        move_task_up(&mut plan, &TaskId::new("b")).unwrap();
        let after: Vec<_> = plan.tasks.iter().map(|t| t.id.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn adding_cyclic_dependency_fails_without_mutating() {
        let mut plan = plan_with(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
        let snapshot = plan.clone();
        let err = update_task_dependencies(&mut plan, &TaskId::new("a"), [TaskId::new("c")])
            .unwrap_err();
        assert!(matches!(err, CoreError::CyclicDependency(_)));
        assert_eq!(plan.tasks.len(), snapshot.tasks.len());
        assert!(plan
            .task(&TaskId::new("a"))
            .unwrap()
            .depends_on
            .is_empty());
    }

    #[test]
    fn split_task_out_of_range_fails_without_mutating() {
        let mut t = task("a", &[]);
        t.description = "short".into();
        let mut plan = plan_with(vec![t]);
        let before = plan.tasks.len();
        let err = split_task(&mut plan, &TaskId::new("a"), &[999]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(plan.tasks.len(), before);
    }

    #[test]
    fn split_task_produces_chained_slices_with_redirected_dependents() {
        let mut a = task("a", &[]);
        a.description = "0123456789".into();
        let mut plan = plan_with(vec![a, task("b", &["a"])]);
        let new_ids = split_task(&mut plan, &TaskId::new("a"), &[5]).unwrap();
        assert_eq!(new_ids.len(), 2);
        assert_eq!(new_ids[0], TaskId::new("a"));
        let last = new_ids[1].clone();
        assert!(plan.task(&last).unwrap().depends_on.contains(&new_ids[0]));
        assert!(plan.task(&TaskId::new("b")).unwrap().depends_on.contains(&last));
    }

    #[test]
    fn split_task_handles_multibyte_descriptions_at_a_char_boundary() {
        let mut a = task("a", &[]);
        a.description = "caf\u{e9} re\u{9c}ille n\u{f1}o\u{f1}o".into();
        let char_count = a.description.chars().count();
        let mut plan = plan_with(vec![a]);
        let new_ids = split_task(&mut plan, &TaskId::new("a"), &[4]).unwrap();
        assert_eq!(new_ids.len(), 2);
        let rejoined: String = new_ids
            .iter()
            .map(|id| plan.task(id).unwrap().description.clone())
            .collect();
        assert_eq!(rejoined.chars().count(), char_count);
    }

    #[test]
    fn merge_fewer_than_two_fails_without_mutating() {
        let mut plan = plan_with(vec![task("a", &[])]);
        let before = plan.tasks.len();
        let err = merge_tasks(&mut plan, &[TaskId::new("a")], "merged").unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(plan.tasks.len(), before);
    }

    #[test]
    fn merge_chain_unions_files_and_maxes_complexity() {
        let mut a = task("a", &[]);
        a.files = vec!["src/a.rs".into()];
        a.complexity = Complexity::Low;
        let mut b = task("b", &["a"]);
        b.files = vec!["src/b.rs".into()];
        b.complexity = Complexity::High;
        let mut plan = plan_with(vec![a, b, task("c", &["b"])]);
        let merged_id =
            merge_tasks(&mut plan, &[TaskId::new("a"), TaskId::new("b")], "Merged").unwrap();
        let merged = plan.task(&merged_id).unwrap();
        assert_eq!(merged.complexity, Complexity::High);
        assert!(merged.files.contains(&"src/a.rs".to_string()));
        assert!(merged.files.contains(&"src/b.rs".to_string()));
        assert!(plan.task(&TaskId::new("c")).unwrap().depends_on.contains(&merged_id));
    }

    #[test]
    fn validator_reports_file_conflict_between_siblings() {
        let mut a = task("a", &[]);
        a.files = vec!["src/auth".into()];
        let mut b = task("b", &[]);
        b.files = vec!["src/auth/mod.rs".into()];
        let plan = plan_with(vec![a, b]);
        let findings = validate_plan_for_editor(&plan);
        assert!(findings
            .iter()
            .any(|f| f.severity == Severity::Warning && f.message.contains("overlapping files")));
    }

    #[test]
    fn validator_reports_empty_plan_error() {
        let plan = PlanSpec::new("obj", "sum");
        let findings = validate_plan_for_editor(&plan);
        assert!(findings
            .iter()
            .any(|f| f.severity == Severity::Error && f.message.contains("no tasks")));
    }
}
