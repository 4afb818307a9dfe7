//! Planning phase executor — spawns one or more planner agents, collects
//! their `.claudio-plan.json` output, and converts it into a `PlanSpec`.

use std::sync::Arc;

use tokio::sync::watch;

use crate::collaborators::{TerminalOps, WorkspaceOps};
use crate::completion::{CompletionDetector, CompletionFile};
use crate::error::{CoreError, CoreResult};
use crate::model::{InstanceId, PlanSpec, PlannedTask, TaskId};
use crate::supervisor::SupervisorConfig;

use super::{run_to_completion, RunOutcome};

/// Spawn `candidate_count` independent planner instances against fresh
/// worktrees off `base_branch`, each given `objective` as its prompt, and
/// return every candidate plan that produced a valid `.claudio-plan.json`.
/// A candidate that times out or errors is simply dropped from the result
/// rather than failing the whole phase — plan-selection only needs at
/// least one survivor.
#[allow(clippy::too_many_arguments)]
pub async fn run_planning(
    objective: &str,
    candidate_count: usize,
    base_branch: &str,
    workspace: Arc<dyn WorkspaceOps>,
    terminal: Arc<dyn TerminalOps>,
    supervisor_config: &SupervisorConfig,
    detector: &CompletionDetector,
    cancel: watch::Receiver<bool>,
) -> CoreResult<Vec<PlanSpec>> {
    let mut plans = Vec::new();
    for i in 0..candidate_count.max(1) {
        let instance_id = InstanceId::new();
        let branch = format!("plan/{}-{}", instance_id.short(), i);
        let dir = workspace.create_worktree(&branch, base_branch)?;
        let session_name = format!("planner-{}", instance_id.short());
        let prompt = planner_prompt(objective);

        let outcome = run_to_completion(
            instance_id.clone(),
            session_name,
            dir.clone(),
            prompt,
            branch,
            terminal.clone(),
            supervisor_config,
            detector,
            cancel.clone(),
            |_event| {},
        )
        .await;

        match outcome {
            Ok(RunOutcome::Finished { file: CompletionFile::Plan(plan), .. }) => {
                if let Ok(spec) = to_plan_spec(plan) {
                    plans.push(spec);
                }
            }
            _ => continue,
        }
        let _ = workspace.remove_worktree(&dir);
    }

    if plans.is_empty() {
        return Err(CoreError::RetriableTaskFailure {
            task: TaskId::new("planning"),
            reason: "no planner instance produced a valid plan".into(),
        });
    }
    Ok(plans)
}

fn planner_prompt(objective: &str) -> String {
    format!(
        "Produce a `.claudio-plan.json` decomposing this objective into a dependency DAG of tasks: {objective}"
    )
}

fn to_plan_spec(plan: crate::completion::PlanCompletion) -> CoreResult<PlanSpec> {
    let tasks = plan
        .tasks
        .into_iter()
        .map(|t| {
            let mut task = PlannedTask::new(TaskId::new(t.id), t.title, t.est_complexity);
            task.description = t.description;
            task.files = t.files;
            task.depends_on = t.depends_on.into_iter().map(TaskId::new).collect();
            task
        })
        .collect();
    PlanSpec::from_tasks(plan.objective, String::new(), tasks)
}
