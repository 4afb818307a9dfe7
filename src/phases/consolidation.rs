//! Group-consolidation phase executor — merges a finished group's task
//! branches into one consolidation branch, runs the project's verification
//! command there, then spawns an agent to summarize the result.

use std::sync::Arc;

use tokio::sync::watch;

use crate::collaborators::{TerminalOps, WorkspaceOps};
use crate::completion::{CompletionDetector, CompletionFile};
use crate::error::{CoreError, CoreResult};
use crate::model::{GroupConsolidationContext, InstanceId, TaskId, VerificationResult};
use crate::supervisor::SupervisorConfig;

use super::{run_to_completion, RunOutcome};

/// Merge every task branch in the finished group into `target_dir`, run
/// `verification_command` there, then spawn a consolidation agent to
/// summarize the outcome and report any carry-over issues for the next
/// group. A merge conflict or failed verification still produces a
/// `GroupConsolidationContext` — it is the coordinator's job to decide
/// whether that blocks the next group, not this function's.
#[allow(clippy::too_many_arguments)]
pub async fn run_group_consolidation(
    group_index: usize,
    objective: &str,
    target_dir: std::path::PathBuf,
    task_branches: &[String],
    verification_command: &str,
    workspace: Arc<dyn WorkspaceOps>,
    terminal: Arc<dyn TerminalOps>,
    supervisor_config: &SupervisorConfig,
    detector: &CompletionDetector,
    cancel: watch::Receiver<bool>,
) -> CoreResult<GroupConsolidationContext> {
    let mut conflicted = Vec::new();
    for branch in task_branches {
        let outcome = workspace.merge_branch(&target_dir, branch)?;
        if !outcome.succeeded {
            conflicted.extend(outcome.conflicted_files);
        }
    }

    let verification_run = workspace.run_verification(&target_dir, verification_command)?;

    let instance_id = InstanceId::new();
    let session_name = format!("consolidate-{}", instance_id.short());
    let prompt = consolidation_prompt(objective, group_index, &conflicted, &verification_run.combined_output);
    let branch = format!("consolidate/group-{group_index}");

    let run_outcome = run_to_completion(
        instance_id,
        session_name,
        target_dir,
        prompt,
        branch,
        terminal,
        supervisor_config,
        detector,
        cancel,
        |_event| {},
    )
    .await?;

    match run_outcome {
        RunOutcome::Finished { file: CompletionFile::GroupConsolidation(g), .. } => {
            Ok(GroupConsolidationContext {
                group_index: g.group_index,
                branch_name: g.branch_name,
                tasks_consolidated: g.tasks_consolidated,
                notes: g.notes,
                issues_for_next_group: g.issues_for_next_group,
                verification: VerificationResult {
                    project_type: String::new(),
                    commands_run: vec![verification_command.to_string()],
                    overall_success: verification_run.success,
                    summary: g.verification.summary,
                },
            })
        }
        RunOutcome::Finished { .. } => Err(CoreError::SupervisorFatal {
            instance: InstanceId::new(),
            reason: "unexpected sentinel file variant for a consolidation instance".into(),
        }),
        RunOutcome::TimedOut(_) | RunOutcome::Cancelled => Err(CoreError::RetriableTaskFailure {
            task: TaskId::new(format!("consolidate-group-{group_index}")),
            reason: "consolidation instance did not report completion".into(),
        }),
    }
}

fn consolidation_prompt(
    objective: &str,
    group_index: usize,
    conflicted_files: &[String],
    verification_output: &str,
) -> String {
    let conflicts = if conflicted_files.is_empty() {
        "none".to_string()
    } else {
        conflicted_files.join(", ")
    };
    format!(
        "Consolidate group {group_index} of \"{objective}\". Merge conflicts: {conflicts}.\n\
         Verification output:\n{verification_output}\n\n\
         Produce a `.claudio-group-consolidation-complete.json`."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::FakeTerminal;
    use crate::collaborators::{MergeOutcome, VerificationRun};
    use std::path::Path;

    struct FixedDirWorkspace {
        dir: std::path::PathBuf,
        merge_succeeds: bool,
    }

    impl WorkspaceOps for FixedDirWorkspace {
        fn create_worktree(&self, _branch: &str, _base: &str) -> CoreResult<std::path::PathBuf> {
            Ok(self.dir.clone())
        }
        fn remove_worktree(&self, _path: &Path) -> CoreResult<()> {
            Ok(())
        }
        fn merge_branch(&self, _target_dir: &Path, branch: &str) -> CoreResult<MergeOutcome> {
            Ok(MergeOutcome {
                succeeded: self.merge_succeeds,
                conflicted_files: if self.merge_succeeds {
                    Vec::new()
                } else {
                    vec![format!("{branch}.rs")]
                },
            })
        }
        fn commit_count(&self, _dir: &Path) -> CoreResult<u64> {
            Ok(2)
        }
        fn run_verification(&self, _dir: &Path, _command: &str) -> CoreResult<VerificationRun> {
            Ok(VerificationRun { success: true, combined_output: "ok".into() })
        }
    }

    #[tokio::test]
    async fn consolidation_merges_branches_then_collects_sentinel() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = Arc::new(FixedDirWorkspace { dir: tmp.path().to_path_buf(), merge_succeeds: true });
        let terminal = Arc::new(FakeTerminal::default());

        let consolidation_json = serde_json::json!({
            "group_index": 0,
            "status": "ok",
            "branch_name": "consolidate/group-0",
            "tasks_consolidated": ["t1", "t2"],
            "verification": {
                "project_type": "rust",
                "commands_run": ["cargo test"],
                "overall_success": true,
                "summary": "all good",
            },
        });
        tokio::fs::write(
            tmp.path().join(".claudio-group-consolidation-complete.json"),
            serde_json::to_vec(&consolidation_json).unwrap(),
        )
        .await
        .unwrap();

        let (_tx, cancel) = tokio::sync::watch::channel(false);
        let detector = CompletionDetector::new(std::time::Duration::from_millis(1));
        let supervisor_config = SupervisorConfig {
            capture_interval: std::time::Duration::from_millis(1),
            ..SupervisorConfig::default()
        };

        let ctx = run_group_consolidation(
            0,
            "ship the feature",
            tmp.path().to_path_buf(),
            &["task/a".to_string(), "task/b".to_string()],
            "cargo test",
            workspace,
            terminal,
            &supervisor_config,
            &detector,
            cancel,
        )
        .await
        .unwrap();
        assert_eq!(ctx.tasks_consolidated.len(), 2);
        assert!(ctx.verification.overall_success);
    }
}
