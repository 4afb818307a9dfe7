//! Phase Executors — one module per phase of the coordinator's state
//! machine. Each is pure orchestration logic over the collaborator traits
//! ([`crate::collaborators`]), the completion detector, and the instance
//! supervisor; none of them touch the `Session` directly. The coordinator
//! applies whatever mutation a phase executor's return value implies.

mod consolidation;
mod execute;
mod planning;
mod selection;
mod synthesis;

pub use consolidation::run_group_consolidation;
pub use execute::{run_execute_group, TaskRunOutcome};
pub use planning::run_planning;
pub use selection::select_plan;
pub use synthesis::{run_revision_task, run_synthesis};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use crate::collaborators::TerminalOps;
use crate::completion::{CompletionDetector, CompletionFile, Info};
use crate::error::{CoreError, CoreResult};
use crate::model::InstanceId;
use crate::supervisor::{InstanceSupervisor, SupervisorConfig, SupervisorEvent, TimeoutKind, TimeoutTracker};

/// What happened while driving one instance to completion, distinct from
/// the sentinel file's own success/failure so a timed-out or errored
/// instance can be told apart from one that finished and reported failure.
pub enum RunOutcome {
    Finished { pid: u32, file: CompletionFile, info: Info },
    TimedOut(TimeoutKind),
    Cancelled,
}

/// Spawn one agent in `working_dir` and drive it to completion: poll the
/// terminal for state/metrics/timeouts via the supervisor while polling the
/// working directory for a sentinel file via the completion detector, on
/// the same tick so no extra task-spawning or channel plumbing is needed
/// per instance. `on_event` receives every supervisor event (state change,
/// metrics, bell) so the caller can forward them to budget tracking and
/// callbacks without this function needing to know about either.
pub(crate) async fn run_to_completion(
    instance_id: InstanceId,
    session_name: String,
    working_dir: PathBuf,
    prompt: String,
    branch: String,
    terminal: Arc<dyn TerminalOps>,
    config: &SupervisorConfig,
    detector: &CompletionDetector,
    mut cancel: watch::Receiver<bool>,
    mut on_event: impl FnMut(SupervisorEvent),
) -> CoreResult<RunOutcome> {
    clear_stale_sentinels(&working_dir).await?;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let supervisor = InstanceSupervisor::new(
        instance_id,
        session_name,
        working_dir.clone(),
        terminal,
        SupervisorConfig {
            capture_interval: config.capture_interval,
            timeouts: config.timeouts.clone(),
            tail_lines: config.tail_lines,
        },
        events_tx,
    );
    let pid = supervisor.start(prompt, branch)?;

    let mut tracker = TimeoutTracker::new(config.timeouts.clone(), Instant::now());
    loop {
        if let Some((file, info)) = detector.scan_once(&working_dir).await? {
            let _ = supervisor.stop();
            return Ok(RunOutcome::Finished { pid, file, info });
        }

        supervisor.poll_once(&mut tracker, Instant::now())?;
        let mut timed_out = None;
        while let Ok(event) = events_rx.try_recv() {
            if let SupervisorEvent::TimedOut { kind, .. } = &event {
                timed_out = Some(*kind);
            }
            on_event(event);
        }
        if let Some(kind) = timed_out {
            let _ = supervisor.stop();
            return Ok(RunOutcome::TimedOut(kind));
        }

        tokio::select! {
            _ = tokio::time::sleep(config.capture_interval) => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    let _ = supervisor.stop();
                    return Ok(RunOutcome::Cancelled);
                }
            }
        }
    }
}

/// A worktree directory can be reused across runs — a retried task keeps
/// its branch (and thus its worktree) under the default config, and a
/// revision pass runs in the original task's own `working_dir` — so any
/// sentinel left behind by a previous run must be cleared before starting
/// a new one, or [`CompletionDetector::scan_once`] would report the old
/// run's result before the new instance ever gets a chance to run.
async fn clear_stale_sentinels(working_dir: &std::path::Path) -> CoreResult<()> {
    for name in crate::completion::SENTINEL_NAMES {
        match tokio::fs::remove_file(working_dir.join(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::Io(e)),
        }
    }
    Ok(())
}

pub(crate) fn fatal_spawn(instance: &InstanceId, reason: impl Into<String>) -> CoreError {
    CoreError::SupervisorFatal {
        instance: instance.clone(),
        reason: reason.into(),
    }
}
