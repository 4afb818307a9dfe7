//! Synthesis phase executor — spawns one agent to review the completed
//! group's work as a whole and report whether it integrates cleanly or
//! needs a revision round.

use std::sync::Arc;

use tokio::sync::watch;

use crate::collaborators::{TerminalOps, WorkspaceOps};
use crate::completion::{CompletionDetector, CompletionFile};
use crate::error::{CoreError, CoreResult};
use crate::model::{InstanceId, RevisionSnapshot, SynthesisSnapshot, TaskId};
use crate::supervisor::SupervisorConfig;

use super::{run_to_completion, RunOutcome};

/// Spawn a synthesis-review agent against `working_dir` (typically the
/// group's consolidation worktree, once one exists) and return the parsed
/// `SynthesisSnapshot`. Callers decide whether `needs_revision()` routes to
/// `Revision` or straight on to `Consolidating`.
#[allow(clippy::too_many_arguments)]
pub async fn run_synthesis(
    objective: &str,
    working_dir: std::path::PathBuf,
    revision_round: u32,
    terminal: Arc<dyn TerminalOps>,
    _workspace: Arc<dyn WorkspaceOps>,
    supervisor_config: &SupervisorConfig,
    detector: &CompletionDetector,
    cancel: watch::Receiver<bool>,
) -> CoreResult<SynthesisSnapshot> {
    let instance_id = InstanceId::new();
    let session_name = format!("synth-{}", instance_id.short());
    let prompt = synthesis_prompt(objective, revision_round);
    let branch = format!("synthesis/{}", instance_id.short());

    let outcome = run_to_completion(
        instance_id,
        session_name,
        working_dir,
        prompt,
        branch,
        terminal,
        supervisor_config,
        detector,
        cancel,
        |_event| {},
    )
    .await?;

    match outcome {
        RunOutcome::Finished { file: CompletionFile::Synthesis(s), .. } => Ok(SynthesisSnapshot {
            status: s.status,
            revision_round: s.revision_round,
            issues_found: s.issues_found,
            tasks_affected: s.tasks_affected,
            integration_notes: s.integration_notes,
            recommendations: s.recommendations,
        }),
        RunOutcome::Finished { .. } => Err(CoreError::SupervisorFatal {
            instance: InstanceId::new(),
            reason: "unexpected sentinel file variant for a synthesis instance".into(),
        }),
        RunOutcome::TimedOut(_) | RunOutcome::Cancelled => Err(CoreError::RetriableTaskFailure {
            task: TaskId::new("synthesis"),
            reason: "synthesis instance did not report completion".into(),
        }),
    }
}

/// Re-run a single task's agent against a synthesis issue, expecting a
/// `.claudio-revision-complete.json` rather than the plain task-completion
/// sentinel — a revision pass reports which issues it addressed, not a
/// fresh status.
#[allow(clippy::too_many_arguments)]
pub async fn run_revision_task(
    task_id: &TaskId,
    working_dir: std::path::PathBuf,
    branch: String,
    revision_round: u32,
    issue_descriptions: &[String],
    terminal: Arc<dyn TerminalOps>,
    supervisor_config: &SupervisorConfig,
    detector: &CompletionDetector,
    cancel: watch::Receiver<bool>,
) -> CoreResult<RevisionSnapshot> {
    let instance_id = InstanceId::new();
    let session_name = format!("revise-{}", instance_id.short());
    let prompt = revision_prompt(task_id, revision_round, issue_descriptions);

    let outcome = run_to_completion(
        instance_id,
        session_name,
        working_dir,
        prompt,
        branch,
        terminal,
        supervisor_config,
        detector,
        cancel,
        |_event| {},
    )
    .await?;

    match outcome {
        RunOutcome::Finished { file: CompletionFile::Revision(r), .. } => Ok(RevisionSnapshot {
            task_id: r.task_id,
            revision_round: r.revision_round,
            issues_addressed: r.issues_addressed,
            remaining_issues: r.remaining_issues,
        }),
        RunOutcome::Finished { .. } => Err(CoreError::SupervisorFatal {
            instance: InstanceId::new(),
            reason: "unexpected sentinel file variant for a revision instance".into(),
        }),
        RunOutcome::TimedOut(_) | RunOutcome::Cancelled => Err(CoreError::RetriableTaskFailure {
            task: task_id.clone(),
            reason: "revision instance did not report completion".into(),
        }),
    }
}

fn revision_prompt(task_id: &TaskId, revision_round: u32, issues: &[String]) -> String {
    format!(
        "Revision round {revision_round} for task {task_id}. Address the following issues \
         raised by synthesis review:\n- {}\n\nProduce a `.claudio-revision-complete.json`.",
        issues.join("\n- ")
    )
}

fn synthesis_prompt(objective: &str, revision_round: u32) -> String {
    if revision_round == 0 {
        format!(
            "Review the completed work for \"{objective}\" as a whole. Produce a \
             `.claudio-synthesis-complete.json` describing whether it integrates cleanly."
        )
    } else {
        format!(
            "Re-review \"{objective}\" after revision round {revision_round}. Produce a \
             `.claudio-synthesis-complete.json`."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{FakeTerminal, FakeWorkspace};

    #[tokio::test]
    async fn synthesis_with_no_issues_needs_no_revision() {
        let tmp = tempfile::tempdir().unwrap();
        let synthesis_json = serde_json::json!({
            "status": "clean",
            "revision_round": 0,
            "issues_found": [],
        });
        tokio::fs::write(
            tmp.path().join(".claudio-synthesis-complete.json"),
            serde_json::to_vec(&synthesis_json).unwrap(),
        )
        .await
        .unwrap();

        let (_tx, cancel) = tokio::sync::watch::channel(false);
        let detector = CompletionDetector::new(std::time::Duration::from_millis(1));
        let supervisor_config = SupervisorConfig {
            capture_interval: std::time::Duration::from_millis(1),
            ..SupervisorConfig::default()
        };
        let snapshot = run_synthesis(
            "ship the feature",
            tmp.path().to_path_buf(),
            0,
            Arc::new(FakeTerminal::default()),
            Arc::new(FakeWorkspace),
            &supervisor_config,
            &detector,
            cancel,
        )
        .await
        .unwrap();
        assert!(snapshot.issues_found.is_empty());
    }
}
