//! Execute phase executor — drives one task to completion inside the DAG
//! scheduler's admission loop. [`crate::coordinator::Coordinator`] owns
//! group/concurrency bookkeeping; this module only knows how to run a
//! single admitted task and report its outcome back.

use std::sync::Arc;

use tokio::sync::watch;

use crate::collaborators::{TerminalOps, WorkspaceOps};
use crate::completion::{CompletionDetector, CompletionFile};
use crate::error::CoreResult;
use crate::model::{derive_branch_name, Instance, InstanceId, PlannedTask};
use crate::supervisor::{SupervisorConfig, SupervisorEvent, TimeoutKind};

use super::{run_to_completion, RunOutcome};

pub struct TaskRunOutcome {
    pub instance: Instance,
    /// `true` iff the sentinel reported `complete` and (when required) at
    /// least one commit landed since the task started.
    pub success: bool,
    pub retriable: bool,
    pub reason: String,
    pub issues: Vec<String>,
    /// Set when the run ended via `RunOutcome::TimedOut`, so the caller can
    /// map the instance onto `Stuck` (activity/stale) or `Timeout`
    /// (completion) instead of the generic `Error` status.
    pub timeout_kind: Option<TimeoutKind>,
}

/// Run one task's agent to completion and apply the success rule from the
/// completion-detector contract: a `complete` status is only a success if
/// `require_commits` is false or at least one commit landed since start.
#[allow(clippy::too_many_arguments)]
pub async fn run_execute_group(
    instance_id: InstanceId,
    task: &PlannedTask,
    base_branch: &str,
    include_id_in_branch: bool,
    require_commits: bool,
    prompt_prefix: &str,
    workspace: Arc<dyn WorkspaceOps>,
    terminal: Arc<dyn TerminalOps>,
    supervisor_config: &SupervisorConfig,
    detector: &CompletionDetector,
    cancel: watch::Receiver<bool>,
    mut on_event: impl FnMut(SupervisorEvent),
) -> CoreResult<TaskRunOutcome> {
    let branch = derive_branch_name(task, include_id_in_branch.then(|| instance_id.short()));
    let dir = workspace.create_worktree(&branch, base_branch)?;
    let baseline_commits = crate::completion::head_commit_count(&dir).await.unwrap_or(0);
    let session_name = format!("task-{}", instance_id.short());
    let prompt = format!("{prompt_prefix}\n\n# {}\n\n{}", task.title, task.description);

    let mut instance = Instance::new(task.id.clone(), task.title.clone(), dir.clone(), branch.clone());
    instance.id = instance_id.clone();

    let outcome = run_to_completion(
        instance_id,
        session_name,
        dir.clone(),
        prompt,
        branch,
        terminal,
        supervisor_config,
        detector,
        cancel,
        |event| on_event(event),
    )
    .await?;

    match outcome {
        RunOutcome::Finished { pid, file: CompletionFile::Task(t), info } => {
            instance.pid = Some(pid);
            instance.modified_files = t.files_modified.clone();
            let has_commit = !require_commits
                || crate::completion::commits_since(&dir, baseline_commits).await;
            let success = info.success && has_commit;
            Ok(TaskRunOutcome {
                instance,
                success,
                retriable: !success,
                reason: if success {
                    String::new()
                } else if !info.success {
                    format!("task reported status {:?}", t.status)
                } else {
                    "task completed with no commits".to_string()
                },
                issues: t.issues,
                timeout_kind: None,
            })
        }
        RunOutcome::Finished { .. } => Ok(TaskRunOutcome {
            instance,
            success: false,
            retriable: true,
            reason: "unexpected sentinel file variant for a task instance".to_string(),
            issues: Vec::new(),
            timeout_kind: None,
        }),
        RunOutcome::TimedOut(kind) => Ok(TaskRunOutcome {
            instance,
            success: false,
            retriable: false,
            reason: format!("timed out ({kind:?})"),
            issues: Vec::new(),
            timeout_kind: Some(kind),
        }),
        RunOutcome::Cancelled => Ok(TaskRunOutcome {
            instance,
            success: false,
            retriable: false,
            reason: "cancelled".to_string(),
            issues: Vec::new(),
            timeout_kind: None,
        }),
    }
}
